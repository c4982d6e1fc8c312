//! Orchestrates one emitter per sensor over a shared sink.
//!
//! The simulator owns everything it starts: the emitter tasks, the stop
//! signal of the current run and, in broker mode, the MQTT connection.

use std::{collections::HashMap, sync::Arc, time::Duration};

use sensorsim_mqtt::{MqttInstance, MqttManager, Publisher};
use serde_json::Value;
use tokio::{sync::watch, task::AbortHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    emitter::{Emitter, EmitterHandle, EmitterState},
    error::{Result, SimulatorError},
    readiness::Readiness,
    sensor::{self, Sensor},
    sink::{BrokerSink, LogSink, Sink, SinkConfig},
};

pub struct Simulator {
    sensors: Vec<Sensor>,
    sink: Arc<dyn Sink>,
    broker: Option<MqttInstance>,
    stop: Option<CancellationToken>,
    emitters: Vec<EmitterHandle>,
}

impl Simulator {
    /// Validates `raw` and builds the configured sink.
    ///
    /// In broker mode this connects and waits up to the transport's
    /// `connection_timeout` for the broker to accept us. Any failure along the
    /// way is `BrokerConnect` and leaves no connection behind.
    pub async fn new(raw: &Value, sink: SinkConfig) -> Result<Self> {
        let sensors = sensor::validate(raw)?;

        match sink {
            SinkConfig::Log => Ok(Self::from_parts(sensors, Arc::new(LogSink), None)),
            SinkConfig::Broker { transport, publish } => {
                let timeout = Duration::from_secs(transport.connection_timeout);
                let instance = connect_broker(transport, timeout).await?;
                let sink = BrokerSink::new(Publisher::new(instance.clone()), publish);
                Ok(Self::from_parts(sensors, Arc::new(sink), Some(instance)))
            }
        }
    }

    /// Validates `raw` and delivers to an arbitrary sink.
    pub fn with_sink(raw: &Value, sink: Arc<dyn Sink>) -> Result<Self> {
        Ok(Self::from_parts(sensor::validate(raw)?, sink, None))
    }

    fn from_parts(sensors: Vec<Sensor>, sink: Arc<dyn Sink>, broker: Option<MqttInstance>) -> Self {
        Self {
            sensors,
            sink,
            broker,
            stop: None,
            emitters: Vec::new(),
        }
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Emitter tasks that have not returned yet.
    pub fn running_emitters(&self) -> usize {
        self.emitters.iter().filter(|e| e.is_alive()).count()
    }

    pub fn emitter_states(&self) -> HashMap<usize, watch::Receiver<EmitterState>> {
        self.emitters
            .iter()
            .map(|e| (e.sensor_id(), e.state_receiver()))
            .collect()
    }

    /// Task handles of the current run, keyed by sensor id.
    pub fn emitter_tasks(&self) -> HashMap<usize, AbortHandle> {
        self.emitters
            .iter()
            .map(|e| (e.sensor_id(), e.abort_handle()))
            .collect()
    }

    pub fn broker(&self) -> Option<&MqttInstance> {
        self.broker.as_ref()
    }

    /// Spawns one emitter per sensor under a fresh stop signal.
    /// Returns once all are launched.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(SimulatorError::AlreadyRunning);
        }

        let stop = CancellationToken::new();
        self.emitters = self
            .sensors
            .iter()
            .cloned()
            .map(|sensor| Emitter::new(sensor, self.sink.clone()).spawn(stop.clone()))
            .collect();
        self.stop = Some(stop);

        info!("Started {} emitters", self.emitters.len());
        Ok(())
    }

    /// Signals every emitter and waits for all of them to finish.
    ///
    /// May take up to the longest sensor period. Returns how many emitters
    /// stopped; a panicked emitter is logged and still counted.
    pub async fn stop(&mut self) -> Result<usize> {
        let stop = self.stop.take().ok_or(SimulatorError::NotRunning)?;
        stop.cancel();

        let mut stopped = 0;
        for handle in self.emitters.drain(..) {
            let sensor_id = handle.sensor_id();
            if let Err(e) = handle.join().await {
                error!("Emitter for sensor {sensor_id} ended abnormally: {e}");
            }
            stopped += 1;
        }

        info!("All emitters stopped.");
        Ok(stopped)
    }

    /// Stops emitters if running, then closes the broker connection.
    pub async fn shutdown(mut self) {
        if self.is_running() {
            if let Err(e) = self.stop().await {
                warn!("Failed to stop emitters: {e}");
            }
        }
        if let Some(instance) = self.broker.take() {
            if let Err(e) = instance.shutdown().await {
                warn!("Failed to close broker connection: {e}");
            }
        }
    }
}

impl Drop for Simulator {
    /// Emitters never outlive their simulator. They finish their current
    /// sleep and exit on their own; nothing waits for them here.
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
            debug!("Simulator dropped while running, stop signal set");
        }
    }
}

async fn connect_broker(
    transport: sensorsim_mqtt::Config,
    timeout: Duration,
) -> Result<MqttInstance> {
    let address = format!("{}:{}", transport.host, transport.port);
    let instance = MqttManager::from_config(transport)
        .map_err(|e| SimulatorError::BrokerConnect(e.to_string()))?
        .build_and_start()
        .await
        .map_err(|e| SimulatorError::BrokerConnect(e.to_string()))?;

    let readiness = Readiness::new();
    readiness.start_listening(instance.state_receiver());

    if let Err(reason) = readiness.wait_until_ready(timeout).await {
        if let Err(e) = instance.shutdown().await {
            warn!("Failed to close broker connection: {e}");
        }
        return Err(SimulatorError::BrokerConnect(format!("{address}: {reason}")));
    }

    instance.start_monitoring();
    info!("Broker connection to {address} ready");
    Ok(instance)
}
