//! Broker connection settings and per-topic publish metadata.
//!
//! Loaded from the `[transport]` table of the application config:
//!
//! ```toml
//! [transport]
//! host = "broker.local"
//! port = 1883
//! base_topic = "sensorsim"
//! keep_alive = 60
//!
//! [transport.tls]
//! ca_cert_path = "/etc/ssl/certs/ca.pem"
//! ```

use std::path::Path;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::error::TransferError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Prefix prepended to every published and subscribed topic.
    /// Empty disables prefixing. The status topic is `{base_topic}/status`.
    #[validate(length(max = 255, message = "Base topic must not exceed 255 characters"))]
    pub base_topic: String,

    #[validate(length(min = 1, message = "Broker host must not be empty"))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Empty means `sensorsim_<unix seconds>` is generated at build time.
    #[validate(length(max = 36, message = "Client id must not exceed 36 characters"))]
    pub client_id: String,

    pub username: Option<String>,
    pub password: Option<String>,

    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    pub clean_session: bool,

    /// Seconds to wait for the TCP/TLS handshake and, at startup, for the
    /// first CONNACK.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    #[validate(range(min = 1, max = 1000, message = "Max inflight must be between 1 and 1000"))]
    pub max_inflight: u16,

    #[validate(range(
        min = 64,
        max = 65535,
        message = "Max packet size must be between 64 and 65535 bytes"
    ))]
    pub max_packet_size: Option<u16>,

    /// Capacity of the request queue between `AsyncClient` and the event loop.
    #[validate(range(min = 1, message = "Request channel capacity must be at least 1"))]
    pub request_channel_capacity: Option<u8>,

    /// First reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect max delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_max_delay: u64,

    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect backoff multiplier must be between 1.0 and 30.0"
    ))]
    pub reconnect_backoff_multiplier: f64,

    /// 0 derives the budget from the delay bounds.
    #[validate(range(
        max = 100,
        message = "Max reconnect attempts must be between 0 and 100"
    ))]
    pub max_reconnect_attempts: u32,

    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_topic: "sensorsim".into(),
            host: "localhost".into(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            connection_timeout: 10,
            max_inflight: 10,
            max_packet_size: Some(65_535),
            request_channel_capacity: Some(10),
            reconnect_delay: 1,
            reconnect_max_delay: 30,
            reconnect_backoff_multiplier: 2.0,
            max_reconnect_attempts: 10,
            tls: None,
        }
    }
}

/// Certificate paths for TLS. Files are checked for existence during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    #[validate(custom(function = "validate_file_path"))]
    pub ca_cert_path: Option<String>,

    #[validate(custom(function = "validate_file_path"))]
    pub client_cert_path: Option<String>,

    #[validate(custom(function = "validate_file_path"))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Mutual TLS.
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// Cross-field checks that the derive cannot express.
    pub fn validate_pairing(&self) -> Result<(), ValidationError> {
        if !self.is_enabled() {
            return Err(ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into()));
        }
        if !self.has_client_auth()
            && (self.client_cert_path.is_some() || self.client_key_path.is_some())
        {
            return Err(ValidationError::new("incomplete_client_auth").with_message(
                "Both client certificate and key must be provided or neither".into(),
            ));
        }
        Ok(())
    }
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }
    if !Path::new(path).is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    Ok(())
}

/// Where and how one message stream is published.
///
/// `topic` may contain placeholders; they are expanded by the caller
/// before publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EndpointMetadata {
    #[validate(range(max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    #[validate(length(min = 1, message = "Topic must not be empty"))]
    pub topic: String,

    pub retain: bool,
}

impl Default for EndpointMetadata {
    fn default() -> Self {
        Self {
            qos: 1,
            topic: "telemetry".into(),
            retain: false,
        }
    }
}

impl EndpointMetadata {
    pub fn qos_level(&self) -> Result<QoS, TransferError> {
        qos_from_u8(self.qos)
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value: {other}"
        ))),
    }
}
