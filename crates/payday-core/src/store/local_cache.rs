//! Key-value local cache that survives restarts.
//!
//! Values are JSON, stored together in one versioned file inside the data
//! directory. Keys are namespaced (`payday:identity`,
//! `payday:<user_id>:progress`, ...) so one user's state can be purged without
//! touching another's.
//!
//! # Degraded mode
//! If the data directory cannot be created or a write fails, the cache keeps
//! working from memory for the rest of the process and logs a warning. The
//! cache never makes an engine operation fail.
//!
//! # Invalidation
//! The file is discarded on load when its `schema_version` differs from
//! [`cache::SCHEMA_VERSION`] or when it cannot be parsed.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use crate::constants::cache;
use crate::error::CacheError;

const CHANGE_CHANNEL_CAPACITY: usize = 128;

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    schema_version: u32,
    /// Unix seconds when this file was written.
    saved_at: u64,
    entries: BTreeMap<String, serde_json::Value>,
}

struct Inner {
    /// `None` once the cache runs memory-only.
    path: Option<PathBuf>,
    entries: BTreeMap<String, serde_json::Value>,
}

pub struct LocalCache {
    inner: Mutex<Inner>,
    change_tx: broadcast::Sender<String>,
}

pub fn identity_key() -> String {
    format!("{}:{}", cache::NAMESPACE, cache::IDENTITY_KEY)
}

pub fn user_key(user_id: &str, name: &str) -> String {
    format!("{}:{}:{}", cache::NAMESPACE, user_id, name)
}

fn user_prefix(user_id: &str) -> String {
    format!("{}:{}:", cache::NAMESPACE, user_id)
}

impl LocalCache {
    /// Open (or create) the cache file in `data_dir`. Never fails: an
    /// unusable directory yields a memory-only cache.
    pub fn open(data_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            tracing::warn!(
                "local_cache: cannot use {} ({}), running memory-only",
                data_dir.display(),
                e
            );
            return Self::in_memory();
        }

        let path = data_dir.join(cache::FILE_NAME);
        let entries = match Self::load_file(&path) {
            Ok(Some(entries)) => entries,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("local_cache: discarding unreadable {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self::with_inner(Inner {
            path: Some(path),
            entries,
        })
    }

    pub fn in_memory() -> Self {
        Self::with_inner(Inner {
            path: None,
            entries: BTreeMap::new(),
        })
    }

    fn with_inner(inner: Inner) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(inner),
            change_tx,
        }
    }

    fn load_file(path: &Path) -> Result<Option<BTreeMap<String, serde_json::Value>>, CacheError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: CacheEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.schema_version != cache::SCHEMA_VERSION {
            tracing::info!(
                "local_cache: schema version mismatch (cached={} current={}), discarding",
                envelope.schema_version,
                cache::SCHEMA_VERSION
            );
            return Ok(None);
        }
        Ok(Some(envelope.entries))
    }

    /// Write-to-temp-then-rename so a crash mid-write never leaves a torn file.
    fn save_file(
        path: &Path,
        entries: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), CacheError> {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let envelope = CacheEnvelope {
            schema_version: cache::SCHEMA_VERSION,
            saved_at,
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, &bytes)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }

    /// Persist the current entries, switching to memory-only on failure.
    fn flush(inner: &mut Inner) {
        let Some(path) = inner.path.clone() else {
            return;
        };
        if let Err(e) = Self::save_file(&path, &inner.entries) {
            tracing::warn!(
                "local_cache: write to {} failed ({}), running memory-only",
                path.display(),
                e
            );
            inner.path = None;
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.lock().path.is_some()
    }

    /// Keys of every write, for consumers that mirror cache state.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.change_tx.subscribe()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.lock().entries.get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("local_cache: entry {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("local_cache: cannot serialize {}: {}", key, e);
                return;
            }
        };
        {
            let mut inner = self.inner.lock();
            inner.entries.insert(key.to_string(), value);
            Self::flush(&mut inner);
        }
        let _ = self.change_tx.send(key.to_string());
    }

    pub fn remove(&self, key: &str) {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.entries.remove(key).is_some();
            if removed {
                Self::flush(&mut inner);
            }
            removed
        };
        if removed {
            let _ = self.change_tx.send(key.to_string());
        }
    }

    /// Remove every per-user key for `user_id`, plus the cached identity if it
    /// belongs to that user. Returns the number of entries removed.
    pub fn purge_user(&self, user_id: &str) -> usize {
        let prefix = user_prefix(user_id);
        let identity_key = identity_key();
        let removed: Vec<String> = {
            let mut inner = self.inner.lock();
            let mut keys: Vec<String> = inner
                .entries
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            let owns_identity = inner
                .entries
                .get(&identity_key)
                .and_then(|v| v.get("id"))
                .and_then(|id| id.as_str())
                == Some(user_id);
            if owns_identity {
                keys.push(identity_key);
            }
            for key in &keys {
                inner.entries.remove(key);
            }
            if !keys.is_empty() {
                Self::flush(&mut inner);
            }
            keys
        };
        for key in &removed {
            let _ = self.change_tx.send(key.clone());
        }
        tracing::debug!("local_cache: purged {} entries for {}", removed.len(), user_id);
        removed.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let cache = LocalCache::open(dir.path());
            assert!(cache.is_persistent());
            cache.set(&user_key("u1", "progress"), &vec![1, 2, 3]);
        }
        let cache = LocalCache::open(dir.path());
        assert_eq!(cache.get::<Vec<i32>>(&user_key("u1", "progress")), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_schema_mismatch_discards_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(cache::FILE_NAME);
        std::fs::write(
            &path,
            r#"{"schema_version": 999, "saved_at": 0, "entries": {"payday:identity": 1}}"#,
        )
        .unwrap();
        let cache = LocalCache::open(dir.path());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(cache::FILE_NAME), b"not json").unwrap();
        let cache = LocalCache::open(dir.path());
        assert!(cache.keys().is_empty());
        assert!(cache.is_persistent());
    }

    #[test]
    fn test_unwritable_location_falls_back_to_memory() {
        let dir = tempdir().unwrap();
        // A file where the data directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();

        let cache = LocalCache::open(&blocker);
        assert!(!cache.is_persistent());
        cache.set("payday:k", &42);
        assert_eq!(cache.get::<i32>("payday:k"), Some(42));
    }

    #[test]
    fn test_failed_write_degrades_to_memory() {
        let dir = tempdir().unwrap();
        let cache = LocalCache::open(dir.path());
        // Replace the target file with a directory so rename fails
        std::fs::create_dir(dir.path().join(cache::FILE_NAME)).unwrap();
        cache.set("payday:k", &"v");
        assert!(!cache.is_persistent());
        assert_eq!(cache.get::<String>("payday:k").as_deref(), Some("v"));
    }

    #[test]
    fn test_purge_user_leaves_other_users() {
        let cache = LocalCache::in_memory();
        cache.set(&identity_key(), &Identity::new("u1", "a@example.com"));
        cache.set(&user_key("u1", "progress"), &1);
        cache.set(&user_key("u1", "transactions"), &2);
        cache.set(&user_key("u2", "progress"), &3);

        assert_eq!(cache.purge_user("u1"), 3);
        assert!(cache.get::<Identity>(&identity_key()).is_none());
        assert_eq!(cache.get::<i32>(&user_key("u2", "progress")), Some(3));
    }

    #[test]
    fn test_purge_keeps_identity_of_other_user() {
        let cache = LocalCache::in_memory();
        cache.set(&identity_key(), &Identity::new("u2", "b@example.com"));
        cache.set(&user_key("u1", "progress"), &1);
        assert_eq!(cache.purge_user("u1"), 1);
        assert!(cache.get::<Identity>(&identity_key()).is_some());
    }

    #[tokio::test]
    async fn test_writes_are_broadcast() {
        let cache = LocalCache::in_memory();
        let mut rx = cache.subscribe();
        cache.set("payday:a", &1);
        cache.remove("payday:a");
        cache.remove("payday:missing");
        assert_eq!(rx.recv().await.unwrap(), "payday:a");
        assert_eq!(rx.recv().await.unwrap(), "payday:a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wrong_shape_reads_as_none() {
        let cache = LocalCache::in_memory();
        cache.set("payday:k", &"text");
        assert_eq!(cache.get::<u64>("payday:k"), None);
    }
}
