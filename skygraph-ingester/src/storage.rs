use crate::config::{CURSOR_SAVE_INTERVAL, CURSOR_TTL};
use crate::IngesterError;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Durable single-value cursor record. Entries older than the cursor TTL are
/// ignored on load so a long-dead deployment resubscribes live instead of
/// asking the relay for history it no longer holds.
#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    cursor: i64,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// A message whose processing threw, kept for startup replay together with
/// its retry counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMessage {
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
    pub retries: u32,
}

pub struct Storage {
    #[allow(dead_code)] // partitions reference the keyspace internally
    db: Keyspace,
    cursors: PartitionHandle,
    failed: PartitionHandle,
}

impl Storage {
    pub fn new(path: PathBuf) -> Result<Self, IngesterError> {
        let db = Config::new(path).open()?;
        let cursors = db.open_partition("cursor", PartitionCreateOptions::default())?;
        let failed = db.open_partition("failed_messages", PartitionCreateOptions::default())?;
        Ok(Self {
            db,
            cursors,
            failed,
        })
    }

    pub fn load_cursor(&self, name: &str) -> Result<Option<i64>, IngesterError> {
        let Some(value) = self.cursors.get(name.as_bytes())? else {
            return Ok(None);
        };
        let record: CursorRecord = serde_json::from_slice(value.as_ref())
            .map_err(|e| IngesterError::Serialization(format!("invalid cursor record: {e}")))?;
        let age = chrono::Utc::now().signed_duration_since(record.saved_at);
        if age > chrono::Duration::from_std(CURSOR_TTL).unwrap_or_default() {
            tracing::warn!("cursor for {name} is {age} old, ignoring");
            return Ok(None);
        }
        Ok(Some(record.cursor))
    }

    pub fn store_cursor(&self, name: &str, cursor: i64) -> Result<(), IngesterError> {
        self.store_cursor_at(name, cursor, chrono::Utc::now())
    }

    fn store_cursor_at(
        &self,
        name: &str,
        cursor: i64,
        saved_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), IngesterError> {
        let record = CursorRecord { cursor, saved_at };
        let value = serde_json::to_vec(&record)
            .map_err(|e| IngesterError::Serialization(format!("cursor encode failed: {e}")))?;
        self.cursors.insert(name.as_bytes(), value)?;
        Ok(())
    }

    pub fn push_failed(&self, key: &str, message: &[u8], retries: u32) -> Result<(), IngesterError> {
        let record = FailedMessage {
            message: message.to_vec(),
            retries,
        };
        let mut value = Vec::new();
        ciborium::ser::into_writer(&record, &mut value)
            .map_err(|e| IngesterError::Serialization(format!("failed-message encode: {e}")))?;
        self.failed.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn remove_failed(&self, key: &str) -> Result<(), IngesterError> {
        self.failed.remove(key.as_bytes())?;
        Ok(())
    }

    /// Snapshot of every captured message, oldest key first. Entries are not
    /// removed; replay decides what happens to each.
    pub fn iter_failed(&self) -> Result<Vec<(String, FailedMessage)>, IngesterError> {
        let mut entries = Vec::new();
        for item in self.failed.iter() {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(key.as_ref()).into_owned();
            let record: FailedMessage = ciborium::de::from_reader(value.as_ref())
                .map_err(|e| IngesterError::Serialization(format!("failed-message decode: {e}")))?;
            entries.push((key, record));
        }
        Ok(entries)
    }

    pub fn failed_len(&self) -> Result<usize, IngesterError> {
        Ok(self.failed.len()?)
    }
}

/// In-memory cursor with coalesced durable writes. `advance` is cheap and
/// monotonic; a background tick persists the latest value.
pub struct CursorStore {
    storage: Arc<Storage>,
    name: String,
    latest: AtomicI64,
    dirty: AtomicBool,
}

impl CursorStore {
    pub fn new(storage: Arc<Storage>, name: &str) -> Self {
        Self {
            storage,
            name: name.to_owned(),
            latest: AtomicI64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn load(&self) -> Result<Option<i64>, IngesterError> {
        self.storage.load_cursor(&self.name)
    }

    pub fn advance(&self, seq: i64) {
        self.latest.fetch_max(seq, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn flush(&self) -> Result<(), IngesterError> {
        if self.dirty.swap(false, Ordering::Relaxed) {
            self.storage
                .store_cursor(&self.name, self.latest.load(Ordering::Relaxed))?;
        }
        Ok(())
    }

    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(*CURSOR_SAVE_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = store.flush() {
                    tracing::error!("cursor flush failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Storage, TempDir) {
        let dir = TempDir::with_prefix("skygraph_test_").unwrap();
        let storage = Storage::new(dir.path().join("state")).unwrap();
        (storage, dir)
    }

    #[test]
    fn cursor_roundtrip() {
        let (storage, _dir) = setup();

        assert!(storage.load_cursor("relay").unwrap().is_none());
        storage.store_cursor("relay", 42).unwrap();
        assert_eq!(storage.load_cursor("relay").unwrap(), Some(42));
        storage.store_cursor("relay", 100).unwrap();
        assert_eq!(storage.load_cursor("relay").unwrap(), Some(100));
    }

    #[test]
    fn stale_cursor_is_ignored() {
        let (storage, _dir) = setup();

        let old = chrono::Utc::now() - chrono::Duration::hours(80);
        storage.store_cursor_at("relay", 42, old).unwrap();
        assert!(storage.load_cursor("relay").unwrap().is_none());
    }

    #[test]
    fn failed_queue_keeps_retry_counts() {
        let (storage, _dir) = setup();

        storage
            .push_failed("did:plc:a::3kzz", b"raw frame", 0)
            .unwrap();
        assert_eq!(storage.failed_len().unwrap(), 1);

        let entries = storage.iter_failed().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "did:plc:a::3kzz");
        assert_eq!(entries[0].1.message, b"raw frame");
        assert_eq!(entries[0].1.retries, 0);

        // reinsert with a bumped counter, as replay does on failure
        storage
            .push_failed("did:plc:a::3kzz", b"raw frame", 1)
            .unwrap();
        let entries = storage.iter_failed().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.retries, 1);

        storage.remove_failed("did:plc:a::3kzz").unwrap();
        assert!(storage.iter_failed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_store_coalesces_and_flushes() {
        let (storage, _dir) = setup();
        let storage = Arc::new(storage);
        let cursor = CursorStore::new(Arc::clone(&storage), "relay");

        cursor.advance(5);
        cursor.advance(9);
        cursor.advance(7);
        // nothing durable until flushed
        assert!(storage.load_cursor("relay").unwrap().is_none());

        cursor.flush().unwrap();
        assert_eq!(storage.load_cursor("relay").unwrap(), Some(9));

        // clean flush is a no-op
        cursor.flush().unwrap();
        assert_eq!(storage.load_cursor("relay").unwrap(), Some(9));
    }
}
