use crate::domain::hex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Traffic direction relative to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Data written to the endpoint
    #[serde(rename = "send")]
    Sent,
    /// Data read from the endpoint
    #[serde(rename = "receive")]
    Received,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Sent => write!(f, "send"),
            Direction::Received => write!(f, "receive"),
        }
    }
}

/// One captured unit of traffic. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub direction: Direction,
    /// Hex pairs when `is_hex`, otherwise the payload decoded as UTF-8
    pub content: String,
    pub is_hex: bool,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Raw byte count on the wire
    pub byte_length: usize,
}

impl MessageRecord {
    /// Capture `data` now, encoding it according to `hex_mode`
    pub fn capture(direction: Direction, data: &[u8], hex_mode: bool) -> Self {
        Self::capture_at(direction, data, hex_mode, now_millis())
    }

    pub fn capture_at(direction: Direction, data: &[u8], hex_mode: bool, timestamp: u64) -> Self {
        let content = if hex_mode {
            hex::encode_spaced(data)
        } else {
            String::from_utf8_lossy(data).into_owned()
        };

        Self {
            direction,
            content,
            is_hex: hex_mode,
            timestamp,
            byte_length: data.len(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
