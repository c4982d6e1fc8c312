//! Reacts to connection state changes.
//!
//! On every (re)connect the supervisor announces a retained `online` on the
//! status topic and restores tracked subscriptions, which a clean session
//! loses.

use rumqttc::{AsyncClient, QoS};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::{
    client::status_topic, error::TransferError, manager::SubscriptionManager,
    state::ConnectionState,
};

#[derive(Debug, Clone)]
pub struct Supervisor {
    state_rx: watch::Receiver<ConnectionState>,
    status_topic: String,
    client: AsyncClient,
    subscriptions: SubscriptionManager,
    cancel_token: CancellationToken,
}

impl Supervisor {
    pub fn new(
        base_topic: &str,
        state_rx: watch::Receiver<ConnectionState>,
        client: AsyncClient,
        subscriptions: SubscriptionManager,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            state_rx,
            status_topic: status_topic(base_topic),
            client,
            subscriptions,
            cancel_token,
        }
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    pub(crate) fn publish_status(&self, status: &str) -> Result<(), TransferError> {
        self.client.try_publish(
            self.status_topic.clone(),
            QoS::AtLeastOnce,
            true,
            status.as_bytes().to_vec(),
        )?;
        debug!("Published {status} status to {}", self.status_topic);
        Ok(())
    }

    fn on_connect(&self) {
        if let Err(e) = self.publish_status("online") {
            warn!("Failed to publish online status: {e}");
        }
        if let Err(e) = self.subscriptions.resubscribe_all() {
            warn!("Failed to restore subscriptions: {e}");
        }
    }

    /// Spawns the monitoring task. Handles an already established connection first.
    pub fn monitor(&self) {
        if self.state_rx.borrow().is_connected() {
            self.on_connect();
        }

        let supervisor = self.clone();
        tokio::spawn(
            async move { supervisor.run_monitor_loop().await }.instrument(tracing::Span::current()),
        );
    }

    async fn run_monitor_loop(mut self) {
        debug!("Supervisor monitoring started");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        debug!("State channel closed, supervisor exiting");
                        break;
                    }
                    let state = self.state_rx.borrow_and_update().clone();
                    match state {
                        ConnectionState::Connected => self.on_connect(),
                        ConnectionState::Disconnected(reason) => {
                            info!("Broker connection lost: {reason}");
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!("Supervisor monitoring stopped");
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}
