//! MQTT plumbing for sensorsim.
//!
//! # Layout
//!
//! ```text
//! MqttManager::build_and_start()
//!   ├─ ClientBuilder       rumqttc AsyncClient + EventLoop, TLS, last will
//!   ├─ ConnectionKernel    polls the event loop, backoff, state watch (spawned)
//!   ├─ SubscriptionManager tracked topics, restored on reconnect
//!   └─ Supervisor          retained online/offline on {base_topic}/status
//!        │
//!        ▼
//!   MqttInstance ──> Publisher (JSON payloads per EndpointMetadata)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start().await?;
//! instance.wait_connected(Duration::from_secs(10)).await?;
//! instance.start_monitoring();
//!
//! let publisher = Publisher::new(instance.clone());
//! publisher.publish(&reading, &EndpointMetadata::default())?;
//!
//! instance.shutdown().await?;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod state;
pub mod supervisor;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::{qos_from_u8, Config, EndpointMetadata, TlsConfig};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager, SubscriptionManager};
pub use publisher::Publisher;
pub use rumqttc::QoS;
pub use state::ConnectionState;
pub use supervisor::Supervisor;

pub type Result<T> = std::result::Result<T, TransferError>;
