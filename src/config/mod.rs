//! Application configuration loading and validation.
//!
//! The top-level `Config` aggregates the logger, simulator and transport
//! sections of a TOML file. It is loaded once at startup and stays immutable.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};
use validator::Validate;

use crate::core::sink::{SinkConfig, SinkMode};

pub mod logger;
pub mod simulator;

use logger::LoggerConfig;
use simulator::SimulatorConfig;

pub type TransportConfig = sensorsim_mqtt::Config;

const CONFIG_ENV: &str = "SENSORSIM_CONFIG";
const FALLBACK_PATH: &str = "/etc/sensorsim/config.toml";

/// Timestamp used by the bootstrap print macros, before tracing is up.
#[doc(hidden)]
pub fn bootstrap_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default()
}

#[doc(hidden)]
#[macro_export]
macro_rules! __print_line {
    ($level:expr, $($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::bootstrap_timestamp()).dim(),
            $level,
            format_args!($($arg)*)
        )
    };
}

/// Prints an INFO line to stdout. For use before the logger is initialized.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("INFO").green(), $($arg)*) };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("WARN").yellow(), $($arg)*) };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("ERROR").red(), $($arg)*) };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub simulator: SimulatorConfig,

    #[validate(nested)]
    pub transport: TransportConfig,
}

impl Config {
    /// Loads from `$SENSORSIM_CONFIG`, then `/etc/sensorsim/config.toml`,
    /// else falls back to built-in defaults.
    pub fn new() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) => Self::load(&path),
            None => {
                print_warn!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    fn get_config_path() -> Option<PathBuf> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {CONFIG_ENV}: {}", path.display());
            return Some(path);
        }

        let fallback = Path::new(FALLBACK_PATH);
        fallback.exists().then(|| fallback.to_path_buf())
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let config = Self::from_toml(&fs::read_to_string(path)?)?;
        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// The sink the simulator should deliver readings to.
    pub fn sink_config(&self) -> SinkConfig {
        match self.simulator.mode {
            SinkMode::Log => SinkConfig::Log,
            SinkMode::Broker => SinkConfig::Broker {
                transport: self.transport.clone(),
                publish: self.simulator.publish.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = Config::default();
        assert_eq!(config.simulator.mode, SinkMode::Log);
        assert_eq!(
            config.simulator.sensors,
            json!([["humidity", 3], ["temperature", 1]])
        );
        assert!(config.validate().is_ok());
        assert!(matches!(config.sink_config(), SinkConfig::Log));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[logger]
level = "debug"

[simulator]
mode = "mqtt"
sensors = [["temperature", 2]]

[simulator.publish]
topic = "lab/{{type}}/{{id}}"
qos = 0

[transport]
host = "broker.local"
port = 1884
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.simulator.mode, SinkMode::Broker);
        assert_eq!(config.simulator.sensors, json!([["temperature", 2]]));
        assert_eq!(config.simulator.publish.topic, "lab/{type}/{id}");

        match config.sink_config() {
            SinkConfig::Broker { transport, publish } => {
                assert_eq!(transport.host, "broker.local");
                assert_eq!(transport.port, 1884);
                assert_eq!(publish.qos, 0);
            }
            SinkConfig::Log => panic!("expected broker sink"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/sensorsim.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml("[simulator\nmode = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let err = Config::from_toml("[simulator]\nmode = \"stdout\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_error() {
        let err = Config::from_toml("[transport]\nkeep_alive = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = Config::from_toml("[simulator.publish]\nqos = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_bootstrap_timestamp_format() {
        let ts = bootstrap_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000Z".len());
    }
}
