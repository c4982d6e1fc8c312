//! Construction of the rumqttc `AsyncClient`/`EventLoop` pair.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?
//!     .set_last_will(&config.base_topic)
//!     .build()?;
//! ```

use std::{
    fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, TlsConfiguration, Transport};

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 10;

pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
    tls_config: Option<TlsConfig>,
    connection_timeout: Option<u64>,
}

impl ClientBuilder {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            tls_config: None,
            connection_timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let client_id = if config.client_id.is_empty() {
            generated_client_id()
        } else {
            config.client_id.clone()
        };
        let cap = config
            .request_channel_capacity
            .map_or(DEFAULT_CHANNEL_CAPACITY, usize::from);

        let mut builder = Self::new(client_id, config.host.clone(), config.port, cap)
            .keep_alive(config.keep_alive)
            .clean_session(config.clean_session)
            .max_inflight(config.max_inflight);

        if let Some(size) = config.max_packet_size {
            builder = builder.max_packet_size(size as usize, size as usize);
        }
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(user.clone(), pass.clone());
        }
        builder.tls_config = config.tls.clone().filter(TlsConfig::is_enabled);
        builder.connection_timeout = Some(config.connection_timeout);
        builder
    }

    pub fn with_tls(
        mut self,
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.tls_config = Some(TlsConfig::new(ca_cert_path, client_cert_path, client_key_path));
        self
    }

    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<String>) -> Self {
        self.tls_config = Some(TlsConfig::with_ca_only(ca_cert_path));
        self
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn max_packet_size(mut self, incoming: usize, outgoing: usize) -> Self {
        self.opts.set_max_packet_size(incoming, outgoing);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Broker publishes a retained `offline` to `{base_topic}/status` if we
    /// vanish without a DISCONNECT.
    pub fn set_last_will(mut self, base_topic: &str) -> Self {
        self.opts.set_last_will(LastWill::new(
            status_topic(base_topic),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
        self
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    fn build_tls_transport(tls: &TlsConfig) -> Result<Transport, TransferError> {
        tls.validate_pairing()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let read = |path: &Option<String>| -> Result<Vec<u8>, TransferError> {
            let path = path
                .as_deref()
                .ok_or_else(|| TransferError::ClientSetup("TLS path is not set".into()))?;
            Ok(fs::read(path)?)
        };

        let ca = read(&tls.ca_cert_path)?;
        let client_auth = if tls.has_client_auth() {
            Some((read(&tls.client_cert_path)?, read(&tls.client_key_path)?))
        } else {
            None
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    pub fn build(mut self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let transport = match &self.tls_config {
            Some(tls) => Self::build_tls_transport(tls)?,
            None => Transport::Tcp,
        };
        self.opts.set_transport(transport);

        let (client, mut event_loop) = AsyncClient::new(self.opts, self.cap);
        if let Some(secs) = self.connection_timeout {
            event_loop.network_options.set_connection_timeout(secs);
        }
        Ok((client, event_loop))
    }
}

pub fn status_topic(base_topic: &str) -> String {
    if base_topic.is_empty() {
        "status".to_string()
    } else {
        format!("{base_topic}/status")
    }
}

fn generated_client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("sensorsim_{secs}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_client_id_when_empty() {
        let builder = ClientBuilder::from_config(&Config::default());
        assert!(builder.client_id().starts_with("sensorsim_"));
    }

    #[test]
    fn test_explicit_client_id_kept() {
        let config = Config {
            client_id: "bench-01".into(),
            ..Default::default()
        };
        assert_eq!(ClientBuilder::from_config(&config).client_id(), "bench-01");
    }

    #[test]
    fn test_status_topic() {
        assert_eq!(status_topic("sensorsim"), "sensorsim/status");
        assert_eq!(status_topic(""), "status");
    }

    #[tokio::test]
    async fn test_build_plain_tcp() {
        let result = ClientBuilder::new("test", "localhost", 1883, 10)
            .keep_alive(30)
            .set_last_will("sim")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_tls_missing_ca_fails() {
        let result = ClientBuilder::new("test", "localhost", 8883, 10)
            .with_tls_ca_only("/nonexistent/ca.pem")
            .build();
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn test_build_tls_half_client_auth_fails() {
        let mut builder = ClientBuilder::new("test", "localhost", 8883, 10);
        builder.tls_config = Some(TlsConfig {
            ca_cert_path: Some("ca.pem".into()),
            client_cert_path: None,
            client_key_path: Some("client.key".into()),
        });
        assert!(matches!(
            builder.build(),
            Err(TransferError::ClientSetup(_))
        ));
    }
}
