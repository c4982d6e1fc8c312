use thiserror::Error;

/// Errors raised while building or driving a [`Simulator`](super::simulator::Simulator).
///
/// Validation variants display their message verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulatorError {
    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidSensorType(String),

    #[error("{0}")]
    InvalidPeriod(String),

    #[error("Failed to connect to broker: {0}")]
    BrokerConnect(String),

    #[error("Simulator is already running")]
    AlreadyRunning,

    #[error("Simulator is not running")]
    NotRunning,
}

/// Per-reading delivery failure. Stays inside the emitter that hit it.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl From<sensorsim_mqtt::TransferError> for SinkError {
    fn from(err: sensorsim_mqtt::TransferError) -> Self {
        SinkError::Publish(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
