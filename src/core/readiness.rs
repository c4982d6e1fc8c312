//! Broker readiness tracking.
//!
//! Translates the MQTT connection state into a coarser readiness state that
//! the simulator can wait on before it starts emitting.

use std::{fmt, time::Duration};

use sensorsim_mqtt::ConnectionState;
use tokio::sync::watch;
use tracing::{debug, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessState {
    Ready,
    /// Still trying; carries what it is waiting on.
    NotReadyYet(String),
    /// A connection attempt failed.
    Unavailable(String),
    /// Nothing observed yet.
    Unknown,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReadinessState::Ready => "Ready",
            ReadinessState::NotReadyYet(_) => "NotReadyYet",
            ReadinessState::Unavailable(_) => "Unavailable",
            ReadinessState::Unknown => "Unknown",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReadyYet(reason) | ReadinessState::Unavailable(reason) => reason,
            _ => "",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::NotReadyYet(reason) | ReadinessState::Unavailable(reason) => {
                write!(f, "{}: {}", self.as_str(), reason)
            }
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<&ConnectionState> for ReadinessState {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => ReadinessState::Ready,
            ConnectionState::Connecting => ReadinessState::NotReadyYet("Connecting...".into()),
            ConnectionState::Disconnected(reason) => {
                ReadinessState::Unavailable(format!("Disconnected: {reason}"))
            }
            ConnectionState::Reconnecting(secs) => {
                ReadinessState::Unavailable(format!("Reconnecting in {secs:.1} sec"))
            }
        }
    }
}

async fn listen(
    mut connection_rx: watch::Receiver<ConnectionState>,
    state_tx: watch::Sender<ReadinessState>,
) {
    loop {
        let readiness = ReadinessState::from(&*connection_rx.borrow_and_update());
        debug!("Readiness: {readiness}");
        state_tx.send_replace(readiness);

        tokio::select! {
            changed = connection_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = state_tx.closed() => break,
        }
    }
    debug!("Connection state channel closed, readiness listener stopped");
}

#[derive(Debug, Clone)]
pub struct Readiness {
    state_tx: watch::Sender<ReadinessState>,
    state_rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ReadinessState::Unknown);
        Self { state_tx, state_rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ReadinessState {
        self.state_rx.borrow().clone()
    }

    pub fn set_state(&self, state: ReadinessState) {
        let old = self.state_tx.send_replace(state.clone());
        debug!("The readiness status has changed: {old} -> {state}");
    }

    /// Follows `connection_rx` on a background task until either side closes.
    pub fn start_listening(&self, connection_rx: watch::Receiver<ConnectionState>) {
        let state_tx = self.state_tx.clone();
        tokio::spawn(listen(connection_rx, state_tx).instrument(tracing::Span::current()));
    }

    /// Waits until `Ready`.
    ///
    /// Returns the failure reason as soon as the state turns `Unavailable`,
    /// or the last observed state when `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), String> {
        let mut rx = self.state_rx.clone();
        let outcome = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_ready() || matches!(s, ReadinessState::Unavailable(_))),
        )
        .await;

        match outcome {
            Ok(Ok(state)) if state.is_ready() => Ok(()),
            Ok(Ok(state)) => Err(state.reason().to_string()),
            Ok(Err(_)) => Err("readiness channel closed".into()),
            Err(_) => Err(format!(
                "not ready after {:.1}s ({})",
                timeout.as_secs_f64(),
                self.current_state()
            )),
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
