//! sensorsim: periodic telemetry sensor simulator.
//!
//! A declarative list of `(type, period)` pairs becomes a fleet of
//! independent emitters. Each one produces a synthetic humidity or
//! temperature reading every `period` seconds and hands it to a sink: the
//! log, or an MQTT broker through the `sensorsim-mqtt` crate.
//!
//! ```ignore
//! use serde_json::json;
//! use sensorsim::core::{simulator::Simulator, sink::SinkConfig};
//!
//! let mut sim = Simulator::new(&json!([["humidity", 3], ["temperature", 1]]), SinkConfig::Log).await?;
//! sim.start()?;
//! // ...
//! sim.shutdown().await;
//! ```
//!
//! ## Modules
//!
//! * `config`: TOML configuration with `validator` rules, and the
//!   `print_*!` macros used before logging is up.
//! * `core`: sensor validation, reading generation, emitters, sinks,
//!   broker readiness and the `Simulator` itself.
//! * `logger`: `tracing` subscriber setup (console and journald).

pub mod config;
pub mod core;
pub mod logger;
