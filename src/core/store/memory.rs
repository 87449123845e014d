use super::{MessageLog, StoreKey};
use crate::core::communication::message::MessageRecord;
use crate::domain::error::CommHubResult;
use std::collections::BTreeMap;

/// In-memory ordered log, used when the data directory is unavailable
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: BTreeMap<StoreKey, MessageRecord>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageLog for MemoryLog {
    fn append(&mut self, key: StoreKey, record: &MessageRecord) -> CommHubResult<()> {
        self.records.insert(key, record.clone());
        Ok(())
    }

    fn range(&self, limit: Option<usize>, offset: usize) -> CommHubResult<Vec<MessageRecord>> {
        let iter = self.records.values().skip(offset).cloned();
        Ok(match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    fn count(&self) -> CommHubResult<usize> {
        Ok(self.records.len())
    }

    fn clear(&mut self) -> CommHubResult<()> {
        self.records.clear();
        Ok(())
    }

    fn last_key(&self) -> CommHubResult<Option<StoreKey>> {
        Ok(self.records.keys().next_back().copied())
    }

    fn destroy(self: Box<Self>) -> CommHubResult<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
