use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the tracing subscriber used by binaries embedding this crate.
///
/// `RUST_LOG` takes precedence; otherwise `default_directive` (e.g. `"pocketlog_core=info"`)
/// is used. Calling it more than once is harmless; later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
