//! Error type shared by every broker operation.
//!
//! `TransferError` groups failures by what the caller can do about them:
//!
//! **Startup** (fix configuration and restart):
//! - `ClientSetup`, `ConfigError`, `Io` (certificate loading)
//!
//! **Per message** (log and move on):
//! - `InvalidMetadata`, `Serialization`, `ClientTransfer`
//!
//! **Connection** (handled by the connection kernel):
//! - `ClientConnection`, `RetriesPolicy`

use thiserror::Error;

use super::backoff::BackoffError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Topic/QoS metadata cannot be used, e.g. QoS outside `0..=2`.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The client could not be constructed (bad TLS material, missing paths).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// `Config` failed its `validator` rules.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request could not be queued for the event loop, usually because
    /// the connection kernel is gone.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network or protocol failure reported by the event loop.
    ///
    /// Boxed: `ConnectionError` is large compared to the other variants.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Reconnection attempts are exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] BackoffError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_metadata_display() {
        let err = TransferError::InvalidMetadata("QoS must be 0-2".into());
        assert_eq!(err.to_string(), "Invalid metadata: QoS must be 0-2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "ca.pem not found");
        let err: TransferError = io_err.into();
        assert!(matches!(err, TransferError::Io(_)));
        assert!(err.to_string().contains("ca.pem not found"));
    }

    #[test]
    fn test_backoff_error_conversion() {
        let err: TransferError = BackoffError::MaxAttemptLimitError(3).into();
        assert_eq!(
            err.to_string(),
            "Retry policy error: Maximum number of attempts exceeded: 3"
        );
    }

    #[test]
    fn test_connection_error_is_boxed() {
        let err: TransferError = rumqttc::ConnectionError::NetworkTimeout.into();
        assert!(matches!(err, TransferError::ClientConnection(_)));
    }
}
