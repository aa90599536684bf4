//! Durable dedup-key store (C2). Tracks which `subject:methodName:schemaId`
//! keys have already produced a downstream notification, bounded to
//! `MAX_DEDUP_EVENTS` and persisted as a JSON array of strings.

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notifier_core::MAX_DEDUP_EVENTS;

/// The capability the runner depends on. Kept as a trait (mirroring the
/// storage-trait seam the rest of the workspace uses for its persistence
/// layers) so tests can swap in an in-memory fake without touching disk.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_duplicate(&self, key: &str) -> bool;
    /// Returns whether `key` was newly added (`false` if already present).
    async fn mark_processed(&self, key: &str) -> bool;
    async fn size(&self) -> usize;
    async fn clear(&self);
    /// Flushes to disk (if backed by one) and releases resources.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Fraction of `MAX_DEDUP_EVENTS` removed, in insertion-iteration order,
/// once the bound is reached. Specified as 20% of the maximum, not of
/// the current size.
const PRUNE_FRACTION: f64 = 0.2;

struct Inner {
    keys: HashSet<String>,
    /// Insertion order, used only to decide *which* keys to prune first.
    /// `HashSet` alone has no stable iteration order guarantee across
    /// inserts/removals, so we track insertion order explicitly.
    order: Vec<String>,
}

impl Inner {
    fn prune_if_needed(&mut self) {
        if self.keys.len() < MAX_DEDUP_EVENTS {
            return;
        }
        let to_remove = ((MAX_DEDUP_EVENTS as f64) * PRUNE_FRACTION) as usize;
        let mut removed = 0;
        let mut remaining_order = Vec::with_capacity(self.order.len());
        for key in self.order.drain(..) {
            if removed < to_remove && self.keys.remove(&key) {
                removed += 1;
            } else {
                remaining_order.push(key);
            }
        }
        self.order = remaining_order;
        tracing::warn!(removed, bound = MAX_DEDUP_EVENTS, "pruned dedup store");
    }

    fn insert(&mut self, key: &str) -> bool {
        self.prune_if_needed();
        if self.keys.insert(key.to_string()) {
            self.order.push(key.to_string());
            true
        } else {
            false
        }
    }
}

/// A [`DedupStore`] backed by a JSON file on local disk, matching the
/// "write to `<path>.tmp` then atomically rename" persistence pattern
/// used elsewhere in the workspace for durable state.
pub struct JsonFileDedupStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonFileDedupStore {
    /// Loads `path` if it exists and parses as a JSON array of strings.
    /// Any I/O or parse failure is logged and treated as an empty store;
    /// construction never fails on account of a missing or corrupt file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let keys = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "dedup state file is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read dedup state file, starting empty");
                Vec::new()
            }
        };
        let order = keys.clone();
        let set: HashSet<String> = keys.into_iter().collect();
        JsonFileDedupStore {
            path,
            inner: Mutex::new(Inner { keys: set, order }),
        }
    }

    fn flush_to_disk(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock().expect("dedup mutex poisoned");
        let payload: Vec<&String> = inner.order.iter().collect();
        let text = serde_json::to_string(&payload)?;
        drop(inner);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for JsonFileDedupStore {
    async fn is_duplicate(&self, key: &str) -> bool {
        self.inner.lock().expect("dedup mutex poisoned").keys.contains(key)
    }

    async fn mark_processed(&self, key: &str) -> bool {
        self.inner.lock().expect("dedup mutex poisoned").insert(key)
    }

    async fn size(&self) -> usize {
        self.inner.lock().expect("dedup mutex poisoned").keys.len()
    }

    async fn clear(&self) {
        let mut inner = self.inner.lock().expect("dedup mutex poisoned");
        inner.keys.clear();
        inner.order.clear();
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.flush_to_disk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_processed_reports_newly_added() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDedupStore::open(dir.path().join("state.json"));
        assert!(store.mark_processed("a:b:1").await);
        assert!(!store.mark_processed("a:b:1").await);
        assert!(store.is_duplicate("a:b:1").await);
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = JsonFileDedupStore::open(&path);
            store.mark_processed("a:b:1").await;
            store.mark_processed("c:d:2").await;
            store.close().await.unwrap();
        }
        let reopened = JsonFileDedupStore::open(&path);
        assert!(reopened.is_duplicate("a:b:1").await);
        assert!(reopened.is_duplicate("c:d:2").await);
        assert!(!reopened.is_duplicate("e:f:3").await);
    }

    #[tokio::test]
    async fn tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDedupStore::open(dir.path().join("missing.json"));
        assert_eq!(store.size().await, 0);
    }

    #[tokio::test]
    async fn tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let store = JsonFileDedupStore::open(&path);
        assert_eq!(store.size().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDedupStore::open(dir.path().join("state.json"));
        store.mark_processed("a:b:1").await;
        store.clear().await;
        assert_eq!(store.size().await, 0);
    }
}
