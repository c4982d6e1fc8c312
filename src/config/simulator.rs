use sensorsim_mqtt::EndpointMetadata;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::core::sink::SinkMode;

pub const DEFAULT_TOPIC_TEMPLATE: &str = "sensors/{type}/{id}";

/// `[simulator]` section.
///
/// `sensors` is kept raw: its shape is checked when the simulator is built,
/// so configuration and programmatic input fail with the same errors.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulatorConfig {
    pub mode: SinkMode,

    pub sensors: Value,

    /// Broker mode only. `{id}` and `{type}` in the topic are expanded per sensor.
    #[serde(deserialize_with = "deserialize_publish")]
    #[validate(nested)]
    pub publish: EndpointMetadata,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mode: SinkMode::Log,
            sensors: json!([["humidity", 3], ["temperature", 1]]),
            publish: default_publish(),
        }
    }
}

fn default_publish() -> EndpointMetadata {
    EndpointMetadata {
        topic: DEFAULT_TOPIC_TEMPLATE.to_string(),
        ..Default::default()
    }
}

/// `[simulator.publish]` as written. Keys left out take the per-sensor defaults.
#[derive(Deserialize)]
struct PublishSection {
    topic: Option<String>,
    qos: Option<u8>,
    retain: Option<bool>,
}

fn deserialize_publish<'de, D>(deserializer: D) -> Result<EndpointMetadata, D::Error>
where
    D: Deserializer<'de>,
{
    let section = PublishSection::deserialize(deserializer)?;
    let defaults = default_publish();
    Ok(EndpointMetadata {
        topic: section.topic.unwrap_or(defaults.topic),
        qos: section.qos.unwrap_or(defaults.qos),
        retain: section.retain.unwrap_or(defaults.retain),
    })
}
