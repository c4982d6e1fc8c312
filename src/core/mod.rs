//! Simulation engine: sensor validation, reading generation, per-sensor
//! emitters, sinks and the orchestrating [`simulator::Simulator`].

pub mod emitter;
pub mod error;
pub mod readiness;
pub mod reading;
pub mod sensor;
pub mod simulator;
pub mod sink;
