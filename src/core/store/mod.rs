//! Per-session append-only message log.
//!
//! Every session gets its own ordered log keyed by capture timestamp plus a
//! per-log sequence number, so records captured within the same millisecond
//! keep distinct, insertion-ordered keys.

pub mod manager;
pub mod memory;
pub mod sqlite;

use crate::core::communication::message::MessageRecord;
use crate::domain::error::CommHubResult;

pub use manager::{MessageHistory, StoreManager};
pub use memory::MemoryLog;
pub use sqlite::SqliteLog;

/// Extension of per-session store files
pub const STORE_EXTENSION: &str = "dm";

/// Ordered key: capture timestamp, then insertion sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    pub timestamp: u64,
    pub seq: u64,
}

impl StoreKey {
    pub const LEN: usize = 16;

    pub fn new(timestamp: u64, seq: u64) -> Self {
        Self { timestamp, seq }
    }

    /// Big-endian encoding; byte order equals key order
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut ts = [0u8; 8];
        let mut seq = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        seq.copy_from_slice(&bytes[8..]);
        Some(Self::new(u64::from_be_bytes(ts), u64::from_be_bytes(seq)))
    }
}

/// Storage backend for one session's records
pub trait MessageLog: Send {
    fn append(&mut self, key: StoreKey, record: &MessageRecord) -> CommHubResult<()>;

    /// Records in key order, skipping `offset` then taking at most `limit`
    /// (`None` is unbounded)
    fn range(&self, limit: Option<usize>, offset: usize) -> CommHubResult<Vec<MessageRecord>>;

    fn count(&self) -> CommHubResult<usize>;

    fn clear(&mut self) -> CommHubResult<()>;

    /// Highest key present, used to resume the sequence on reopen
    fn last_key(&self) -> CommHubResult<Option<StoreKey>>;

    /// Release the backing storage entirely
    fn destroy(self: Box<Self>) -> CommHubResult<()>;

    /// Whether this log survives a restart
    fn is_persistent(&self) -> bool;
}
