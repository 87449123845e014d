use super::{MessageLog, StoreKey};
use crate::core::communication::message::MessageRecord;
use crate::domain::error::CommHubResult;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS records (
        key   BLOB PRIMARY KEY,
        value BLOB NOT NULL
    ) WITHOUT ROWID;
";

/// SQLite file holding one session's records as an ordered key/value table
pub struct SqliteLog {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLog {
    pub fn open(path: &Path) -> CommHubResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened message store {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageLog for SqliteLog {
    fn append(&mut self, key: StoreKey, record: &MessageRecord) -> CommHubResult<()> {
        let value = serde_json::to_vec(record)?;
        self.conn.execute(
            "INSERT INTO records (key, value) VALUES (?1, ?2)",
            params![&key.to_bytes()[..], value],
        )?;
        Ok(())
    }

    fn range(&self, limit: Option<usize>, offset: usize) -> CommHubResult<Vec<MessageRecord>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM records ORDER BY key LIMIT ?1 OFFSET ?2")?;
        let rows = stmt.query_map(params![limit, offset as i64], |row| row.get::<_, Vec<u8>>(0))?;

        let mut records = Vec::new();
        for value in rows {
            records.push(serde_json::from_slice(&value?)?);
        }
        Ok(records)
    }

    fn count(&self) -> CommHubResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&mut self) -> CommHubResult<()> {
        self.conn.execute("DELETE FROM records", [])?;
        Ok(())
    }

    fn last_key(&self) -> CommHubResult<Option<StoreKey>> {
        let key: Option<Vec<u8>> = self
            .conn
            .query_row("SELECT key FROM records ORDER BY key DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(key.and_then(|k| StoreKey::from_bytes(&k)))
    }

    fn destroy(self: Box<Self>) -> CommHubResult<()> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| e)?;

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Destroyed message store {}", path.display());
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
