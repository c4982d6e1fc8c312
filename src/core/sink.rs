//! Reading destinations.
//!
//! The sink is picked once from [`SinkConfig`] and shared by every emitter as
//! an `Arc<dyn Sink>`.

use async_trait::async_trait;
use sensorsim_mqtt::{EndpointMetadata, Publisher};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error::SinkError, reading::Reading, sensor::Sensor};
use crate::config::TransportConfig;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, reading: &Reading, sensor: &Sensor) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    #[default]
    Log,
    #[serde(alias = "mqtt")]
    Broker,
}

/// Everything needed to build a sink.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    Log,
    Broker {
        transport: TransportConfig,
        publish: EndpointMetadata,
    },
}

impl SinkConfig {
    pub fn mode(&self) -> SinkMode {
        match self {
            SinkConfig::Log => SinkMode::Log,
            SinkConfig::Broker { .. } => SinkMode::Broker,
        }
    }
}

/// Writes each reading to the log as compact JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn deliver(&self, reading: &Reading, _sensor: &Sensor) -> Result<(), SinkError> {
        let json = serde_json::to_string(reading)?;
        info!("data received: {json}");
        Ok(())
    }
}

/// Publishes each reading as JSON to a per-sensor topic.
#[derive(Debug, Clone)]
pub struct BrokerSink {
    publisher: Publisher,
    metadata: EndpointMetadata,
}

impl BrokerSink {
    pub fn new(publisher: Publisher, metadata: EndpointMetadata) -> Self {
        Self {
            publisher,
            metadata,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn metadata_for(&self, sensor: &Sensor) -> EndpointMetadata {
        EndpointMetadata {
            topic: expand_topic(&self.metadata.topic, sensor),
            ..self.metadata.clone()
        }
    }
}

#[async_trait]
impl Sink for BrokerSink {
    async fn deliver(&self, reading: &Reading, sensor: &Sensor) -> Result<(), SinkError> {
        self.publisher.publish(reading, &self.metadata_for(sensor))?;
        Ok(())
    }
}

/// Replaces `{id}` and `{type}` in a topic template.
pub fn expand_topic(template: &str, sensor: &Sensor) -> String {
    template
        .replace("{id}", &sensor.id.to_string())
        .replace("{type}", sensor.kind.as_str())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sensorsim_mqtt::{test_support::FakeBroker, MqttManager};
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{reading::generate, sensor::SensorType};

    fn sensor() -> Sensor {
        Sensor {
            id: 3,
            kind: SensorType::Humidity,
            period: 1,
        }
    }

    #[test]
    fn test_expand_topic() {
        assert_eq!(expand_topic("sensors/{type}/{id}", &sensor()), "sensors/humidity/3");
        assert_eq!(expand_topic("fixed", &sensor()), "fixed");
        assert_eq!(expand_topic("{id}-{id}", &sensor()), "3-3");
    }

    #[test]
    fn test_mode_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: SinkMode,
        }
        let parse = |s: &str| toml::from_str::<Wrapper>(&format!("mode = \"{s}\"")).map(|w| w.mode);
        assert_eq!(parse("log").unwrap(), SinkMode::Log);
        assert_eq!(parse("broker").unwrap(), SinkMode::Broker);
        assert_eq!(parse("mqtt").unwrap(), SinkMode::Broker);
        assert!(parse("stdout").is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_sink_writes_json_line() {
        let sensor = sensor();
        let reading = Reading {
            value: 55.5,
            timestamp: 1700000000.25,
            ..generate(&sensor)
        };

        LogSink.deliver(&reading, &sensor).await.unwrap();

        assert!(logs_contain(
            r#"data received: {"id":3,"type":"humidity","period":1,"value":55.5,"timestamp":1700000000.25}"#
        ));
    }

    #[tokio::test]
    async fn test_broker_sink_publishes_to_expanded_topic() {
        let broker = FakeBroker::start().await;
        let transport = TransportConfig {
            host: "127.0.0.1".into(),
            port: broker.port(),
            base_topic: "lab".into(),
            ..Default::default()
        };
        let instance = MqttManager::from_config(transport)
            .unwrap()
            .build_and_start()
            .await
            .unwrap();
        instance
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();

        let sink = BrokerSink::new(
            Publisher::new(instance.clone()),
            EndpointMetadata {
                topic: "sensors/{type}/{id}".into(),
                qos: 1,
                retain: false,
            },
        );
        let sensor = sensor();
        sink.deliver(&generate(&sensor), &sensor).await.unwrap();

        assert!(
            broker
                .wait_until(Duration::from_secs(5), |b| {
                    !b.publishes_on("lab/sensors/humidity/3").is_empty()
                })
                .await
        );
        let payload = &broker.publishes_on("lab/sensors/humidity/3")[0].payload;
        let reading: Reading = serde_json::from_slice(payload).unwrap();
        assert_eq!(reading.id, 3);
        assert_eq!(reading.kind, SensorType::Humidity);

        instance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_broker_sink_maps_errors_to_publish() {
        let broker = FakeBroker::start().await;
        let transport = TransportConfig {
            host: "127.0.0.1".into(),
            port: broker.port(),
            ..Default::default()
        };
        let instance = MqttManager::from_config(transport)
            .unwrap()
            .build_and_start()
            .await
            .unwrap();
        instance
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();
        instance.shutdown().await.unwrap();

        // The connection kernel is gone, so the request queue is closed.
        let sink = BrokerSink::new(Publisher::new(instance), EndpointMetadata::default());
        let sensor = sensor();
        let err = sink.deliver(&generate(&sensor), &sensor).await.unwrap_err();
        assert!(matches!(err, SinkError::Publish(_)));
    }
}
