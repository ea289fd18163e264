// src/store/seen.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{load_or_default, write_json_atomic, StoreError};
use crate::ingest::types::ItemKey;

/// Keys that were already published or permanently dropped.
pub trait SeenStore: Send + Sync {
    fn has(&self, key: &ItemKey) -> bool;
    /// Idempotent. The key is remembered in memory even when persisting fails.
    fn mark(&self, key: &ItemKey) -> Result<(), StoreError>;
    fn size(&self) -> usize;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenDoc {
    /// "provider:raw_id" -> when it was marked
    #[serde(default)]
    entries: HashMap<String, DateTime<Utc>>,
}

/// File-backed seen set. Every `mark` rewrites the whole document.
pub struct JsonSeenStore {
    path: PathBuf,
    inner: Mutex<SeenDoc>,
}

impl JsonSeenStore {
    /// Load `path`, dropping entries older than `retention`. Any read failure
    /// starts from an empty set.
    pub fn open(path: impl Into<PathBuf>, retention: Duration) -> Self {
        let path = path.into();
        let mut doc: SeenDoc = load_or_default(&path, "seen");
        let cutoff = Utc::now() - retention;
        let before = doc.entries.len();
        doc.entries.retain(|_, at| *at >= cutoff);
        let pruned = before - doc.entries.len();
        if pruned > 0 {
            tracing::info!(pruned, kept = doc.entries.len(), "pruned expired seen keys");
        }
        Self {
            path,
            inner: Mutex::new(doc),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SeenDoc> {
        // a panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SeenStore for JsonSeenStore {
    fn has(&self, key: &ItemKey) -> bool {
        self.lock().entries.contains_key(&key.to_string())
    }

    fn mark(&self, key: &ItemKey) -> Result<(), StoreError> {
        let mut doc = self.lock();
        let k = key.to_string();
        if doc.entries.contains_key(&k) {
            return Ok(());
        }
        doc.entries.insert(k, Utc::now());
        write_json_atomic(&self.path, &*doc)
    }

    fn size(&self) -> usize {
        self.lock().entries.len()
    }
}

/// Non-persistent seen set for tests and dry runs.
#[derive(Default)]
pub struct MemorySeenStore {
    keys: Mutex<HashMap<ItemKey, DateTime<Utc>>>,
}

impl SeenStore for MemorySeenStore {
    fn has(&self, key: &ItemKey) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(key)
    }

    fn mark(&self, key: &ItemKey) -> Result<(), StoreError> {
        self.keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(key.clone())
            .or_insert_with(Utc::now);
        Ok(())
    }

    fn size(&self) -> usize {
        self.keys.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn marks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seen.json");
        let k = ItemKey::new("telegram", "-100/1");

        let s = JsonSeenStore::open(&p, Duration::days(30));
        assert!(!s.has(&k));
        s.mark(&k).unwrap();
        s.mark(&k).unwrap();
        assert_eq!(s.size(), 1);

        let reopened = JsonSeenStore::open(&p, Duration::days(30));
        assert!(reopened.has(&k));
        // same raw id under another provider is a different key
        assert!(!reopened.has(&ItemKey::new("twitter", "-100/1")));
    }

    #[test]
    fn expired_entries_are_pruned_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seen.json");
        let old = (Utc::now() - Duration::days(40)).to_rfc3339();
        let fresh = Utc::now().to_rfc3339();
        fs::write(
            &p,
            format!(r#"{{"entries":{{"telegram:1":"{old}","telegram:2":"{fresh}"}}}}"#),
        )
        .unwrap();

        let s = JsonSeenStore::open(&p, Duration::days(30));
        assert_eq!(s.size(), 1);
        assert!(s.has(&ItemKey::new("telegram", "2")));
    }

    #[test]
    fn unreadable_file_means_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seen.json");
        fs::write(&p, "garbage").unwrap();
        let s = JsonSeenStore::open(&p, Duration::days(30));
        assert_eq!(s.size(), 0);
        s.mark(&ItemKey::new("fixture", "a")).unwrap();
        assert!(p.exists());
    }

    #[test]
    fn failed_persist_still_marks_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // parent is a file, so create_dir_all fails
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let s = JsonSeenStore::open(blocker.join("seen.json"), Duration::days(30));
        let k = ItemKey::new("fixture", "a");
        assert!(s.mark(&k).is_err());
        assert!(s.has(&k));
    }
}
