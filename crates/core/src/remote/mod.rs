pub mod http;
pub mod traits;

pub use http::HttpRemoteApi;
pub use traits::{replay_with_timeout, RemoteApi, RemoteOutcome};
