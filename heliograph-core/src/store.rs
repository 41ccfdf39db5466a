//! Durable key-value state for the client.
//!
//! The whole key space lives in one JSON object persisted to a single local
//! file; every write rewrites the full blob through a temp-file rename so a
//! crash mid-write leaves the previous blob intact. A missing or corrupt
//! file loads as an empty store.
//!
//! Two durability levels are offered: `Sync` writes before returning (device
//! identity, crash flush) and `Lazy` hands the snapshot to a background
//! writer (queue and timed-event updates, where a replay on next start
//! tolerates a short loss window).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{Error, Result};

/// Key holding the ordered array of pending request envelopes.
pub const QUEUE_KEY: &str = "cly_queue";

/// Key holding the timed-event table (event key → start timestamp).
pub const TIMED_EVENTS_KEY: &str = "cly_timed";

/// Key holding the device identifier string.
pub const DEVICE_ID_KEY: &str = "cly_id";

/// How urgently a write must reach disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Written before `set` returns; failures are logged.
    Sync,
    /// Handed to a background writer; failures are logged.
    Lazy,
}

/// Durable key-value store backed by a single JSON file.
pub struct Store {
    path: PathBuf,
    data: serde_json::Map<String, Value>,
    /// Generation of the most recently produced snapshot.
    next_gen: Arc<AtomicU64>,
    /// Generation of the most recently written snapshot; background writers
    /// skip snapshots older than what is already on disk.
    written_gen: Arc<Mutex<u64>>,
}

impl Store {
    /// Open the store at `path`, loading the existing blob if present.
    ///
    /// A missing or unparsable file yields an empty store; corruption is
    /// logged and the old file will be overwritten on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "state file is not a JSON object, starting empty");
                    serde_json::Map::new()
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt state file, starting empty");
                    serde_json::Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::Map::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read state file, starting empty");
                serde_json::Map::new()
            }
        };

        Self {
            path,
            data,
            next_gen: Arc::new(AtomicU64::new(0)),
            written_gen: Arc::new(Mutex::new(0)),
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Insert or replace a value and persist the full blob.
    pub fn set(&mut self, key: &str, value: Value, durability: Durability) {
        self.data.insert(key.to_string(), value);
        match durability {
            Durability::Sync => {
                if let Err(e) = self.flush() {
                    tracing::error!(key, error = %e, "synchronous state write failed");
                }
            }
            Durability::Lazy => self.flush_background(),
        }
    }

    /// Synchronously persist the current blob.
    pub fn flush(&self) -> Result<()> {
        let generation = self.next_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = serde_json::to_vec(&Value::Object(self.data.clone()))?;
        write_snapshot(&self.path, &self.written_gen, generation, &bytes)
    }

    /// Hand the current blob to a background writer.
    ///
    /// Snapshots carry a generation number; a writer that loses the race to
    /// a newer snapshot skips its write, so the file content is always the
    /// newest snapshot that reached disk.
    fn flush_background(&self) {
        let generation = self.next_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = match serde_json::to_vec(&Value::Object(self.data.clone())) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize state blob");
                return;
            }
        };

        let path = self.path.clone();
        let written_gen = Arc::clone(&self.written_gen);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = write_snapshot(&path, &written_gen, generation, &bytes) {
                        tracing::error!(path = %path.display(), error = %e, "background state write failed");
                    }
                });
            }
            // No runtime (e.g. a synchronous caller): write inline.
            Err(_) => {
                if let Err(e) = write_snapshot(&path, &written_gen, generation, &bytes) {
                    tracing::error!(path = %self.path.display(), error = %e, "state write failed");
                }
            }
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write one snapshot atomically, unless a newer snapshot already landed.
fn write_snapshot(
    path: &Path,
    written_gen: &Mutex<u64>,
    generation: u64,
    bytes: &[u8],
) -> Result<()> {
    let mut last = written_gen
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if generation <= *last {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Storage(format!("failed to create {}: {}", parent.display(), e)))?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| Error::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Storage(format!("failed to replace {}: {}", path.display(), e)))?;

    *last = generation;
    Ok(())
}
