use serde::Serialize;
use tracing::trace;

use super::{config::EndpointMetadata, error::TransferError, manager::MqttInstance};

/// Publishes serde values as JSON payloads.
#[derive(Debug, Clone)]
pub struct Publisher {
    instance: MqttInstance,
}

impl Publisher {
    pub fn new(instance: MqttInstance) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &MqttInstance {
        &self.instance
    }

    /// Serializes `data` and queues it on `metadata.topic` (below the base topic).
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        data: &T,
        metadata: &EndpointMetadata,
    ) -> Result<(), TransferError> {
        let qos = metadata.qos_level()?;
        let payload =
            serde_json::to_vec(data).map_err(|e| TransferError::Serialization(e.to_string()))?;

        trace!("Publishing {} bytes to {}", payload.len(), metadata.topic);
        self.instance
            .publish(&metadata.topic, payload, qos, metadata.retain)
    }
}
