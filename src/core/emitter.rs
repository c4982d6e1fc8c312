//! Per-sensor periodic task.
//!
//! ```text
//! Idle ──spawn──> Running ──stop observed──> Stopping ──task returns──> Stopped
//! ```
//!
//! The stop signal is checked at the top of each tick only; a sleep in
//! progress always runs to completion. The state turns `Stopping` as soon as
//! the signal is seen, which may be in the middle of that sleep.

use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::{AbortHandle, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::{reading, sensor::Sensor, sink::Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl EmitterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitterState::Idle => "Idle",
            EmitterState::Running => "Running",
            EmitterState::Stopping => "Stopping",
            EmitterState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for EmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Emitter {
    sensor: Sensor,
    sink: Arc<dyn Sink>,
    state_tx: watch::Sender<EmitterState>,
}

impl Emitter {
    pub fn new(sensor: Sensor, sink: Arc<dyn Sink>) -> Self {
        let (state_tx, _) = watch::channel(EmitterState::Idle);
        Self {
            sensor,
            sink,
            state_tx,
        }
    }

    pub fn state(&self) -> EmitterState {
        *self.state_tx.borrow()
    }

    /// Moves the emitter onto its own task. It runs until `stop` is cancelled.
    pub fn spawn(self, stop: CancellationToken) -> EmitterHandle {
        let sensor_id = self.sensor.id;
        let state_rx = self.state_tx.subscribe();
        self.state_tx.send_replace(EmitterState::Running);

        let span = info_span!("emitter", sensor = sensor_id, "type" = %self.sensor.kind);
        let join = tokio::spawn(self.run(stop).instrument(span));

        EmitterHandle {
            sensor_id,
            state_rx,
            join,
        }
    }

    async fn run(self, stop: CancellationToken) {
        let period = Duration::from_secs(self.sensor.period);
        debug!("Emitter started with period {}s", self.sensor.period);

        while !stop.is_cancelled() {
            let reading = reading::generate(&self.sensor);
            if let Err(e) = self.sink.deliver(&reading, &self.sensor).await {
                error!("Error in emitter for sensor {}: {e}", self.sensor.id);
            }
            self.sleep_through(period, &stop).await;
        }

        self.mark_stopping();
        info!("Emitter for sensor {} stopped.", self.sensor.id);
        self.state_tx.send_replace(EmitterState::Stopped);
    }

    /// Sleeps the full `period`. A stop signal only changes the reported state.
    async fn sleep_through(&self, period: Duration, stop: &CancellationToken) {
        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => {}
            _ = stop.cancelled() => {
                self.mark_stopping();
                sleep.await;
            }
        }
    }

    fn mark_stopping(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == EmitterState::Running {
                *state = EmitterState::Stopping;
                true
            } else {
                false
            }
        });
    }
}

/// Owner's view of a spawned emitter.
#[derive(Debug)]
pub struct EmitterHandle {
    sensor_id: usize,
    state_rx: watch::Receiver<EmitterState>,
    join: JoinHandle<()>,
}

impl EmitterHandle {
    pub fn sensor_id(&self) -> usize {
        self.sensor_id
    }

    pub fn state(&self) -> EmitterState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<EmitterState> {
        self.state_rx.clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Outlives the handle, so liveness can still be checked after `join`.
    pub fn abort_handle(&self) -> AbortHandle {
        self.join.abort_handle()
    }

    /// Waits for the task to return.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.join.await
    }
}
