use crate::client::types::CloseKind;
use crate::ws::{CLOSE_CONFLICT, CLOSE_NORMAL, CLOSE_REJECTED};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy for a socket connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Reconnect attempts before giving up
    pub max_retries: u32,
    /// Fixed delay before each reconnect attempt
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
    /// Close codes that end the session without retrying
    pub fatal_close_codes: Vec<u16>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            reconnect_delay: Duration::from_millis(1000),
            fatal_close_codes: vec![CLOSE_REJECTED, CLOSE_CONFLICT],
        }
    }
}

impl SocketConfig {
    pub fn classify(&self, code: u16) -> CloseKind {
        if code == CLOSE_NORMAL {
            CloseKind::Normal
        } else if self.fatal_close_codes.contains(&code) {
            CloseKind::Fatal
        } else {
            CloseKind::Transient
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
