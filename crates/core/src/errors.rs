use thiserror::Error;

/// Unified error type for the entire pocketlog-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Local storage ───────────────────────────────────────────────
    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ── Remote / Network ────────────────────────────────────────────
    #[error("Remote call failed (retryable): {0}")]
    RemoteRetryable(String),

    #[error("Remote call rejected: {message}")]
    RemoteTerminal {
        status: Option<u16>,
        message: String,
    },

    #[error("Sync operation {operation_id} exhausted its retry budget after {attempts} attempts")]
    MaxAttemptsExceeded {
        operation_id: String,
        attempts: u32,
    },

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether a later attempt of the same remote call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::RemoteRetryable(_))
    }

    pub(crate) fn not_found(entity: &str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            CoreError::Deserialization(e.to_string())
        } else {
            CoreError::Serialization(e.to_string())
        }
    }
}

impl From<rust_decimal::Error> for CoreError {
    fn from(e: rust_decimal::Error) -> Self {
        CoreError::Deserialization(format!("invalid decimal: {e}"))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors carry the full URL; strip any query string before it reaches logs.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::RemoteRetryable(sanitized)
    }
}
