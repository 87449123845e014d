use super::{MemoryLog, MessageLog, SqliteLog, StoreKey, STORE_EXTENSION};
use crate::core::communication::message::MessageRecord;
use crate::core::event::{EngineEvent, EventBus};
use crate::domain::error::{CommHubError, CommHubResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// One page of a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistory {
    pub session_id: String,
    pub records: Vec<MessageRecord>,
    pub total: usize,
}

struct SessionStore {
    log: Box<dyn MessageLog>,
    last_timestamp: u64,
    next_seq: u64,
}

impl SessionStore {
    fn new(log: Box<dyn MessageLog>) -> CommHubResult<Self> {
        let (last_timestamp, next_seq) = match log.last_key()? {
            Some(key) => (key.timestamp, key.seq + 1),
            None => (0, 0),
        };
        Ok(Self {
            log,
            last_timestamp,
            next_seq,
        })
    }

    fn append(&mut self, mut record: MessageRecord) -> CommHubResult<MessageRecord> {
        // Keys must follow insertion order even if the wall clock steps back.
        record.timestamp = record.timestamp.max(self.last_timestamp);
        let key = StoreKey::new(record.timestamp, self.next_seq);
        self.log.append(key, &record)?;
        self.last_timestamp = record.timestamp;
        self.next_seq += 1;
        Ok(record)
    }
}

type SharedStore = Arc<Mutex<SessionStore>>;

/// Owns one message log per session, opened lazily on first use.
///
/// Logs live in `<data_dir>/<session_id>.dm`. When that file cannot be
/// opened the session falls back to an in-memory log and the degradation is
/// logged and published instead of failing the caller.
pub struct StoreManager {
    data_dir: Option<PathBuf>,
    /// A data directory was configured but could not be created
    fallback: bool,
    stores: Mutex<HashMap<String, SharedStore>>,
    events: Option<Arc<EventBus>>,
}

impl StoreManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let data_dir = match std::fs::create_dir_all(&data_dir) {
            Ok(()) => {
                info!("Message stores under {}", data_dir.display());
                Some(data_dir)
            }
            Err(e) => {
                warn!(
                    "Data directory {} unavailable, keeping messages in memory: {}",
                    data_dir.display(),
                    e
                );
                None
            }
        };

        Self {
            fallback: data_dir.is_none(),
            data_dir,
            stores: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Manager that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            fallback: false,
            stores: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Publish degradation notices on `bus`
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// File backing the session's log, if stores are persistent
    pub fn store_path(&self, session_id: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", session_id, STORE_EXTENSION)))
    }

    pub fn append(&self, session_id: &str, record: MessageRecord) -> CommHubResult<MessageRecord> {
        let store = self.open(session_id)?;
        let mut store = lock(&store);
        store.append(record)
    }

    /// `limit <= 0` returns everything after `offset`
    pub fn range(&self, session_id: &str, limit: i64, offset: usize) -> CommHubResult<Vec<MessageRecord>> {
        let limit = if limit <= 0 { None } else { Some(limit as usize) };
        let store = self.open(session_id)?;
        let store = lock(&store);
        store.log.range(limit, offset)
    }

    pub fn count(&self, session_id: &str) -> CommHubResult<usize> {
        let store = self.open(session_id)?;
        let store = lock(&store);
        store.log.count()
    }

    pub fn history(&self, session_id: &str, limit: i64, offset: usize) -> CommHubResult<MessageHistory> {
        let store = self.open(session_id)?;
        let store = lock(&store);
        let limit = if limit <= 0 { None } else { Some(limit as usize) };
        Ok(MessageHistory {
            session_id: session_id.to_string(),
            records: store.log.range(limit, offset)?,
            total: store.log.count()?,
        })
    }

    /// Drop every record, keeping the store allocated
    pub fn clear(&self, session_id: &str) -> CommHubResult<()> {
        let store = self.open(session_id)?;
        let mut store = lock(&store);
        store.log.clear()?;
        info!("Cleared messages for session '{}'", session_id);
        Ok(())
    }

    /// Close the session's log and delete its file
    pub fn destroy(&self, session_id: &str) -> CommHubResult<()> {
        let store = lock(&self.stores).remove(session_id);

        if let Some(store) = store {
            match Arc::try_unwrap(store) {
                Ok(store) => {
                    let store = store.into_inner().unwrap_or_else(|p| p.into_inner());
                    store.log.destroy()?;
                }
                Err(shared) => {
                    // Another caller still holds it; empty it and let the
                    // last reference close the connection.
                    lock(&shared).log.clear()?;
                }
            }
        }

        if let Some(path) = self.store_path(session_id) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Destroyed store for session '{}'", session_id);
        Ok(())
    }

    /// Release every open log without deleting files
    pub fn close_all(&self) {
        let stores: Vec<_> = lock(&self.stores).drain().collect();
        debug!("Closed {} message stores", stores.len());
    }

    pub fn is_persistent(&self, session_id: &str) -> bool {
        lock(&self.stores)
            .get(session_id)
            .map(|store| lock(store).log.is_persistent())
            .unwrap_or(self.data_dir.is_some())
    }

    fn open(&self, session_id: &str) -> CommHubResult<SharedStore> {
        let mut stores = lock(&self.stores);
        if let Some(store) = stores.get(session_id) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(Mutex::new(SessionStore::new(self.open_log(session_id))?));
        stores.insert(session_id.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn open_log(&self, session_id: &str) -> Box<dyn MessageLog> {
        let Some(path) = self.store_path(session_id) else {
            if self.fallback {
                self.report_degraded(session_id, "data directory unavailable".to_string());
            }
            return Box::new(MemoryLog::new());
        };

        match SqliteLog::open(&path) {
            Ok(log) => Box::new(log),
            Err(e) => {
                self.report_degraded(session_id, format!("{}: {}", path.display(), e));
                Box::new(MemoryLog::new())
            }
        }
    }

    fn report_degraded(&self, session_id: &str, detail: String) {
        let error = CommHubError::StorageDegraded {
            message: format!("using in-memory store for session '{}'", session_id),
        };
        warn!("{} ({})", error, detail);

        if let Some(bus) = &self.events {
            bus.publish(EngineEvent::error(&error, Some(session_id), Some(detail)));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
