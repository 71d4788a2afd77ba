use thiserror::Error;

/// Errors surfaced by the session core and the protocol client seam.
#[derive(Debug, Error)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// The group or contact a remote call targets does not exist.
    #[error("target does not exist")]
    TargetNotFound,

    /// A remote protocol call failed. The cause is logged, never returned.
    #[error("operation failed")]
    OperationFailed,

    /// The protocol backend answered a request with an error.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("bridge transport: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("QR rendering failed: {0}")]
    Qr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
