//! Observable connection state.
//!
//! The connection kernel publishes a `ConnectionState` on a `watch` channel
//! every time the link to the broker changes:
//!
//! ```text
//! Connecting ──(CONNACK)──> Connected ──(error)──> Disconnected
//!      ▲                                                │
//!      └──────────── Reconnecting(secs) <──(backoff)────┘
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent (or about to be), waiting for CONNACK.
    Connecting,
    /// CONNACK received with a success code.
    Connected,
    /// The link is down. Carries the reason reported by the event loop.
    Disconnected(String),
    /// Waiting this many seconds before the next attempt.
    Reconnecting(f64),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True for the states that follow a failed attempt.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected(_) | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "Disconnected ({reason})"),
            ConnectionState::Reconnecting(secs) => {
                write!(f, "Reconnecting (in {secs} seconds)")
            }
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionState::Reconnecting(2.0).to_string(),
            "Reconnecting (in 2 seconds)"
        );
        assert_eq!(
            ConnectionState::Disconnected("broker closed".into()).to_string(),
            "Disconnected (broker closed)"
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Reconnecting(1.0).is_failure());
        assert!(ConnectionState::Disconnected("refused".into()).is_failure());
        assert!(!ConnectionState::Connecting.is_failure());
        assert!(!ConnectionState::Connected.is_failure());
    }
}
