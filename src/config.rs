//! Console configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default fixed delay between reconnect attempts (reference behavior: 1 s,
/// constant, no backoff)
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Configuration for a console instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Signaling server WebSocket URL (`ws://` or `wss://`)
    pub server_url: String,

    /// Fixed delay before re-opening the control channel after a close or
    /// error. No message queue is retained across reconnects.
    #[serde(with = "duration_millis")]
    pub reconnect_delay: Duration,

    /// STUN/TURN server URLs handed to the peer connection
    pub ice_servers: Vec<String>,

    /// Capacity of the channel event broadcast
    pub event_capacity: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            event_capacity: 128,
        }
    }
}

impl ConsoleConfig {
    /// Create a configuration pointing at the given signaling server
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid server URL: {e}")))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::Config(format!(
                    "unsupported signaling scheme '{other}', expected ws or wss"
                )))
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
