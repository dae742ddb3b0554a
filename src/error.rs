use thiserror::Error;

/// Failure conditions surfaced by the bridge.
///
/// Cancellation through the phase counter is deliberately absent: an aborted
/// operation returns a partial or null result instead of an error.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The daemon stream closed or failed. The connection never recovers.
    #[error("connection to daemon lost: {0}")]
    TransportFatal(String),

    #[error("no reply to {module}.{method} before the timeout")]
    RequestTimeout { module: String, method: String },

    /// Application error reported by the daemon, message passed through as-is.
    #[error("{0}")]
    RemoteError(String),

    #[error("unexpected reply shape: {0}")]
    ProtocolError(String),

    #[error("voice recognition has not been started, call start_voice_recognition() first")]
    NotActive,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("no such method: {module}.{method}")]
    UnknownMethod { module: String, method: String },

    #[error("{0} is not available")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Stable name used in the façade failure envelope (`"<Kind>: <message>"`).
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::TransportFatal(_) => "TransportFatal",
            BridgeError::RequestTimeout { .. } => "RequestTimeout",
            BridgeError::RemoteError(_) => "RemoteError",
            BridgeError::ProtocolError(_) => "ProtocolError",
            BridgeError::NotActive => "NotActive",
            BridgeError::InvalidArgument(_) => "InvalidArgument",
            BridgeError::UnknownMethod { .. } => "UnknownMethod",
            BridgeError::Unavailable(_) => "Unavailable",
            BridgeError::Io(_) => "IoError",
            BridgeError::Json(_) => "JsonError",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(message.into())
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
