//! Wiring of client, connection kernel, supervisor and subscriptions.
//!
//! [`MqttManager::build_and_start`] spawns the connection kernel and returns
//! an [`MqttInstance`], the cloneable handle the rest of the application
//! talks to.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use rumqttc::{AsyncClient, QoS, SubscribeFilter};
use tokio::{sync::watch, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use validator::Validate;

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    error::TransferError, state::ConnectionState, supervisor::Supervisor,
};

pub struct MqttManager {
    config: Config,
    cancel_token: CancellationToken,
}

impl MqttManager {
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TransferError> {
        Self::from_config(Config {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns as soon as the kernel is running; use
    /// [`MqttInstance::wait_connected`] to wait for the first CONNACK.
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        let Self {
            config,
            cancel_token,
        } = self;

        let builder = ClientBuilder::from_config(&config).set_last_will(&config.base_topic);
        info!(
            "Connecting to MQTT broker at {}:{} as '{}'",
            config.host,
            config.port,
            builder.client_id()
        );
        let (client, event_loop) = builder.build()?;

        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(&config),
            cancel_token.clone(),
        );
        let state_rx = kernel.subscribe_state();

        let subscriptions = SubscriptionManager::new(&config.base_topic, client.clone());
        let supervisor = Supervisor::new(
            &config.base_topic,
            state_rx.clone(),
            client.clone(),
            subscriptions.clone(),
            cancel_token.clone(),
        );

        let handle = tokio::spawn(
            async move {
                let result = kernel.run().await;
                if let Err(e) = &result {
                    error!("MQTT connection kernel exited with error: {e}");
                }
                result
            }
            .instrument(tracing::Span::current()),
        );

        Ok(MqttInstance {
            client,
            supervisor,
            subscriptions,
            cancel_token,
            state_rx,
            base_topic: config.base_topic,
            kernel: Arc::new(Mutex::new(Some(handle))),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Topics tracked for restoration after reconnects. Stored without the base topic.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    base_topic: String,
    topics: Arc<RwLock<HashMap<String, QoS>>>,
    client: AsyncClient,
}

impl SubscriptionManager {
    pub fn new(base_topic: &str, client: AsyncClient) -> Self {
        Self {
            base_topic: base_topic.trim_end_matches('/').to_string(),
            topics: Arc::new(RwLock::new(HashMap::new())),
            client,
        }
    }

    pub fn with_base_topic(&self, topic: &str) -> String {
        if self.base_topic.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{}", self.base_topic, topic.trim_start_matches('/'))
        }
    }

    pub fn strip_base_topic<'a>(&self, topic: &'a str) -> &'a str {
        if self.base_topic.is_empty() {
            return topic;
        }
        topic
            .strip_prefix(self.base_topic.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(topic)
    }

    /// Tracks the topic and queues a SUBSCRIBE. If queueing fails the topic
    /// is still restored on the next reconnect.
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransferError> {
        if let Ok(mut topics) = self.topics.write() {
            topics.insert(topic.to_string(), qos);
        }

        let full_topic = self.with_base_topic(topic);
        match self.client.try_subscribe(full_topic.clone(), qos) {
            Ok(()) => info!("Subscribing to {full_topic} with {qos:?}"),
            Err(e) => warn!("Subscription to '{full_topic}' deferred until reconnect: {e}"),
        }
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), TransferError> {
        if let Ok(mut topics) = self.topics.write() {
            topics.remove(topic);
        }
        let full_topic = self.with_base_topic(topic);
        self.client.try_unsubscribe(full_topic.clone())?;
        info!("Unsubscribed from {full_topic}");
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics
            .read()
            .map(|t| t.contains_key(topic))
            .unwrap_or(false)
    }

    pub fn resubscribe_all(&self) -> Result<(), TransferError> {
        let filters: Vec<SubscribeFilter> = match self.topics.read() {
            Ok(topics) => topics
                .iter()
                .map(|(topic, qos)| SubscribeFilter::new(self.with_base_topic(topic), *qos))
                .collect(),
            Err(_) => return Ok(()),
        };

        if filters.is_empty() {
            return Ok(());
        }
        debug!("Restoring {} subscriptions", filters.len());
        self.client.try_subscribe_many(filters)?;
        Ok(())
    }
}

/// Handle to a running broker connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MqttInstance {
    client: AsyncClient,
    supervisor: Supervisor,
    subscriptions: SubscriptionManager,
    cancel_token: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
    base_topic: String,
    kernel: Arc<Mutex<Option<JoinHandle<Result<(), TransferError>>>>>,
}

impl MqttInstance {
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn with_base_topic(&self, topic: &str) -> String {
        self.subscriptions.with_base_topic(topic)
    }

    pub fn subscription_manager(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Starts the supervisor: status announcements and subscription restore.
    pub fn start_monitoring(&self) {
        self.supervisor.monitor();
    }

    /// Waits for the first successful CONNACK.
    ///
    /// Fails early if the kernel gives up, and with the last observed state
    /// if `timeout` elapses first.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), String> {
        let mut rx = self.state_rx.clone();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_connected() || matches!(s, ConnectionState::Disconnected(_))),
        )
        .await;

        match waited {
            Ok(Ok(state)) if state.is_connected() => Ok(()),
            Ok(Ok(state)) => Err(state.to_string()),
            Ok(Err(_)) => Err("connection kernel stopped".into()),
            Err(_) => Err(format!(
                "no CONNACK within {:.1}s (last state: {})",
                timeout.as_secs_f64(),
                *self.state_rx.borrow()
            )),
        }
    }

    /// Queues a PUBLISH on `{base_topic}/{topic}`.
    ///
    /// Never waits for queue space: a full request queue is reported as
    /// `ClientTransfer` so callers on a fixed schedule are not stalled.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransferError> {
        let full_topic = self.with_base_topic(topic);
        self.client
            .try_publish(full_topic, qos, retain, payload.into())?;
        Ok(())
    }

    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransferError> {
        self.subscriptions.subscribe(topic, qos)
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), TransferError> {
        self.subscriptions.unsubscribe(topic)
    }

    /// Announces `offline`, disconnects and waits for the connection kernel.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        let Some(handle) = self.kernel.lock().await.take() else {
            return Ok(());
        };

        if self.is_connected() {
            if let Err(e) = self.supervisor.publish_status("offline") {
                warn!("Failed to publish offline status: {e}");
            }
        }
        self.cancel_token.cancel();

        match handle.await {
            Ok(Ok(())) => Ok(()),
            // The failure was already logged when the kernel exited.
            Ok(Err(_)) => Ok(()),
            Err(join_err) => {
                error!("Connection kernel task failed: {join_err}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBroker;

    fn instance_config(port: u16) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port,
            base_topic: "sim".into(),
            client_id: "manager-test".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_manager_creation() {
        let manager = MqttManager::new("localhost", 1883).unwrap();
        assert_eq!(manager.config().host, "localhost");
        assert_eq!(manager.config().base_topic, "sensorsim");
        assert!(!manager.cancel_token().is_cancelled());
    }

    #[test]
    fn test_manager_rejects_invalid_config() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            MqttManager::from_config(config),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_base_topic_handling() {
        let (client, _) =
            rumqttc::AsyncClient::new(rumqttc::MqttOptions::new("test", "localhost", 1883), 10);

        let manager = SubscriptionManager::new("myapp/", client.clone());
        assert_eq!(manager.with_base_topic("sensor/temp"), "myapp/sensor/temp");
        assert_eq!(manager.with_base_topic("/sensor/temp"), "myapp/sensor/temp");
        assert_eq!(manager.strip_base_topic("myapp/sensor/temp"), "sensor/temp");
        assert_eq!(manager.strip_base_topic("myappx/temp"), "myappx/temp");

        let bare = SubscriptionManager::new("", client);
        assert_eq!(bare.with_base_topic("sensor/temp"), "sensor/temp");
        assert_eq!(bare.strip_base_topic("sensor/temp"), "sensor/temp");
    }

    #[tokio::test]
    async fn test_subscriptions_are_tracked() {
        let (client, _event_loop) =
            rumqttc::AsyncClient::new(rumqttc::MqttOptions::new("test", "localhost", 1883), 10);
        let manager = SubscriptionManager::new("sim", client);

        manager.subscribe("commands", QoS::AtLeastOnce).unwrap();
        assert!(manager.is_subscribed("commands"));

        manager.unsubscribe("commands").unwrap();
        assert!(!manager.is_subscribed("commands"));
        assert!(manager.topics().is_empty());
    }

    #[tokio::test]
    async fn test_publish_and_status_roundtrip_with_broker() {
        let broker = FakeBroker::start().await;
        let instance = MqttManager::from_config(instance_config(broker.port()))
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        instance
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();
        instance.start_monitoring();
        instance.subscribe("commands", QoS::AtMostOnce).unwrap();
        instance
            .publish("sensors/1", b"{\"value\":1}".to_vec(), QoS::AtLeastOnce, false)
            .unwrap();

        assert!(
            broker
                .wait_until(Duration::from_secs(5), |b| {
                    !b.publishes_on("sim/sensors/1").is_empty()
                        && !b.publishes_on("sim/status").is_empty()
                        && b.subscriptions().contains(&"sim/commands".to_string())
                })
                .await
        );

        instance.shutdown().await.unwrap();
        assert!(broker.wait_until(Duration::from_secs(5), |b| b.disconnects() == 1).await);

        let statuses: Vec<Vec<u8>> = broker
            .publishes_on("sim/status")
            .into_iter()
            .map(|p| p.payload)
            .collect();
        assert_eq!(statuses.first().map(Vec::as_slice), Some(&b"online"[..]));
        assert_eq!(statuses.last().map(Vec::as_slice), Some(&b"offline"[..]));
        assert!(broker.publishes_on("sim/status").iter().all(|p| p.retain));
    }

    #[tokio::test]
    async fn test_wait_connected_reports_refusal() {
        let broker = FakeBroker::start_with_code(5).await;
        let instance = MqttManager::from_config(instance_config(broker.port()))
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        let err = instance
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.starts_with("Disconnected"));
        instance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_noop() {
        let broker = FakeBroker::start().await;
        let instance = MqttManager::from_config(instance_config(broker.port()))
            .unwrap()
            .build_and_start()
            .await
            .unwrap();
        instance
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();

        instance.shutdown().await.unwrap();
        instance.shutdown().await.unwrap();
        assert!(instance.cancel_token().is_cancelled());
    }
}
