//! Bridge error types.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can end a bridge task or session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The backend connection closed without a clean close handshake.
    ///
    /// The only failure class the reconnect supervisor retries.
    #[error("backend connection closed abnormally: {0}")]
    AbnormalClosure(String),

    /// Sending to or receiving from the backend failed.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The local agent could not be created or failed mid-stream.
    #[error("local agent error: {0}")]
    Agent(String),

    /// The client connection is gone.
    #[error("client connection closed")]
    ClientClosed,

    /// Invalid or unresolvable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every reconnect attempt failed.
    #[error("backend unavailable after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<BridgeError>,
    },

    /// A backend frame was not valid JSON.
    #[error("invalid json from backend: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether the reconnect supervisor should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AbnormalClosure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_abnormal_closure_is_retryable() {
        assert!(BridgeError::AbnormalClosure("reset".into()).is_retryable());
        assert!(!BridgeError::Transport("send failed".into()).is_retryable());
        assert!(!BridgeError::ClientClosed.is_retryable());
        assert!(!BridgeError::Config("missing engine".into()).is_retryable());
        let exhausted = BridgeError::RetriesExhausted {
            attempts: 10,
            last: Box::new(BridgeError::AbnormalClosure("reset".into())),
        };
        assert!(!exhausted.is_retryable());
    }
}
