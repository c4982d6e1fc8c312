//! Logging initialization.
//!
//! `LoggerManager` validates a [`LoggerConfig`] and installs the global
//! `tracing` subscriber: a console `fmt` layer and, optionally, a systemd
//! journald layer. Each layer is filtered by `RUST_LOG` when set, otherwise
//! by the configured level.

use std::{fmt as std_fmt, io};

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        time::{FormatTime, SystemTime, UtcTime},
    },
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    #[error(
        "Failed to initialize journald logger, and console logger is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Seconds since the epoch with microsecond precision.
struct UnixTime;

impl FormatTime for UnixTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std_fmt::Result {
        let now = time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9;
        write!(w, "{now:.6}")
    }
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Installs the global subscriber. Fails if no layer could be set up
    /// or a subscriber is already installed.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let layers = self.build_layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn build_layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.console_layer(console)?);
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match tracing_journald::layer() {
                Ok(layer) => {
                    layers.push(
                        layer
                            .with_syslog_identifier(journald.identifier.clone())
                            .with_filter(self.filter())
                            .boxed(),
                    );
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    fn console_layer(&self, config: &ConsoleConfig) -> Result<BoxedLayer, LoggerError> {
        let layer = match &self.config.timestamp_format {
            TimestampFormat::Rfc3339 => self.fmt_layer(config, SystemTime),
            TimestampFormat::Unix => self.fmt_layer(config, UnixTime),
            TimestampFormat::Custom(description) => {
                let format = time::format_description::parse_owned::<2>(description)
                    .map_err(|e| LoggerError::InitializationError(e.to_string()))?;
                self.fmt_layer(config, UtcTime::new(format))
            }
        };
        Ok(layer)
    }

    fn fmt_layer<T>(&self, config: &ConsoleConfig, timer: T) -> BoxedLayer
    where
        T: FormatTime + Send + Sync + 'static,
    {
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_timer(timer)
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_span_events(span_events)
            .with_ansi(config.ansi_colors)
            .with_writer(io::stdout);

        match config.format {
            LogFormat::Json => base.json().with_filter(self.filter()).boxed(),
            LogFormat::Pretty => base.pretty().with_filter(self.filter()).boxed(),
            LogFormat::Compact => base.compact().with_filter(self.filter()).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::logger::JournaldConfig;

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoggerConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_no_layers() {
        let config = LoggerConfig {
            console: None,
            journald: None,
            ..Default::default()
        };
        let manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.build_layers(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }

    #[test]
    fn test_console_layer_for_each_format() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            for timestamp_format in [
                TimestampFormat::Rfc3339,
                TimestampFormat::Unix,
                TimestampFormat::Custom("[hour]:[minute]".into()),
            ] {
                let config = LoggerConfig {
                    timestamp_format,
                    console: Some(ConsoleConfig {
                        format,
                        ..Default::default()
                    }),
                    journald: Some(JournaldConfig::default()),
                    ..Default::default()
                };
                let layers = LoggerManager::new(config).unwrap().build_layers().unwrap();
                assert_eq!(layers.len(), 1);
            }
        }
    }
}
