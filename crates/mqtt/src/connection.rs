//! Connection kernel: the single task that drives rumqttc's `EventLoop`.
//!
//! The kernel polls the event loop until cancelled, publishes every link
//! change on a `watch` channel and retries transient failures with
//! [`Backoff`]. Fatal failures (bad credentials, TLS, protocol violations)
//! and an exhausted retry budget end the task with an error.
//!
//! On cancellation it queues a DISCONNECT and keeps polling briefly so that
//! requests already queued (including the DISCONNECT) reach the broker.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    is_connected: bool,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            is_connected: false,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            debug!("Connection state changed to: {state}");
        }
    }

    /// Runs until cancelled (`Ok`) or until the connection cannot be recovered (`Err`).
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.set_state(ConnectionState::Connecting);
        self.backoff.reset();
        info!("Starting connection event loop...");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.drain_and_disconnect().await;
                    info!("Connection kernel stopped");
                    return Ok(());
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => self.handle_error(e).await?,
                },
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                info!("Connected to MQTT broker successfully.");
                self.is_connected = true;
                self.backoff.reset();
                self.set_state(ConnectionState::Connected);
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                error!("Failed to connect, return code {:?}", ack.code);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                info!(
                    "Received message on {}: {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                );
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                info!(
                    "Subscribed successfully, pkid: {}, QoS: {:?}",
                    ack.pkid, ack.return_codes
                );
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                debug!("Message published successfully, pkid: {}", ack.pkid);
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                debug!("Message published successfully, pkid: {}", comp.pkid);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected from MQTT broker.");
                self.is_connected = false;
                self.set_state(ConnectionState::Disconnected("Disconnected by broker".into()));
            }
            Event::Incoming(packet) => trace!("Incoming packet: {packet:?}"),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {outgoing:?}"),
        }
    }

    async fn handle_error(&mut self, err: ConnectionError) -> Result<(), TransferError> {
        if self.is_connected {
            warn!("Disconnected from MQTT broker.");
            self.is_connected = false;
        }
        if let ConnectionError::ConnectionRefused(code) = &err {
            error!("Failed to connect, return code {code:?}");
        }

        if is_fatal_error(&err) {
            error!("Fatal connection error: {}", root_cause(&err));
            self.set_state(ConnectionState::Disconnected(err.to_string()));
            return Err(err.into());
        }

        let delay = match self.backoff.next_sleep() {
            Ok(delay) => delay,
            Err(exhausted) => {
                error!("Giving up on broker connection: {exhausted}");
                self.set_state(ConnectionState::Disconnected(exhausted.to_string()));
                return Err(exhausted.into());
            }
        };

        warn!(
            "Reconnecting in {:.2} seconds due to error: {}",
            delay.as_secs_f64(),
            root_cause(&err)
        );
        self.set_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => self.set_state(ConnectionState::Connecting),
        }
        Ok(())
    }

    async fn drain_and_disconnect(&mut self) {
        if !self.is_connected {
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Error queueing disconnect packet: {e}");
            return;
        }

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        debug!("Event loop closed while draining: {e}");
                        break;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Timed out flushing pending requests before disconnect");
        }
        self.is_connected = false;
        info!("Disconnected from MQTT broker.");
        self.set_state(ConnectionState::Disconnected("Client shutdown".into()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::Tls(_)
        | ConnectionError::MqttState(_)
        | ConnectionError::NotConnAck(_)
        | ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::ConnectionRefused(
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized,
        ) => Fatal,

        // Timeouts, broker unavailable and anything newer.
        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

/// Innermost error message, without the quoting some io errors carry.
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
