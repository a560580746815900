use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;

use super::{StateStore, StoreChange, CHANGE_CHANNEL_CAPACITY};

#[derive(Default)]
struct MemoryData {
    values: HashMap<String, String>,
    logs: HashMap<String, Vec<(String, String)>>,
    revision: u64,
}

struct MemoryInner {
    data: Mutex<MemoryData>,
    changes: broadcast::Sender<StoreChange>,
    available: AtomicBool,
}

/// In-process store with pub/sub notifications. Clones share the same data,
/// so several instances in one process see each other's writes.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                data: Mutex::new(MemoryData::default()),
                changes,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates the backing storage going away (quota, permissions, ...).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    fn data(&self) -> std::sync::MutexGuard<'_, MemoryData> {
        self.inner.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the data lock held so notifications leave in apply order.
    fn announce(&self, data: &mut MemoryData, key: &str) -> u64 {
        data.revision += 1;
        let _ = self.inner.changes.send(StoreChange {
            key: key.to_string(),
            revision: data.revision,
        });
        data.revision
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(self.data().values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut data = self.data();
        data.values.insert(key.to_string(), value);
        Ok(self.announce(&mut data, key))
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut data = self.data();
        if data.values.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        data.values.insert(key.to_string(), value);
        self.announce(&mut data, key);
        Ok(true)
    }

    async fn append(&self, key: &str, entry_id: &str, value: String) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut data = self.data();
        let log = data.logs.entry(key.to_string()).or_default();
        if log.iter().any(|(id, _)| id == entry_id) {
            return Ok(false);
        }
        log.push((entry_id.to_string(), value));
        self.announce(&mut data, key);
        Ok(true)
    }

    async fn entries(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self
            .data()
            .logs
            .get(key)
            .map(|log| log.iter().map(|(_, value)| value.clone()).collect())
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_clone_is_notified_in_write_order() {
        let store = MemoryStore::new();
        let other = store.clone();
        let mut own_rx = store.subscribe();
        let mut other_rx = other.subscribe();

        store.put("a", "1".into()).await.unwrap();
        other.put("b", "2".into()).await.unwrap();

        for rx in [&mut own_rx, &mut other_rx] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!((first.key.as_str(), first.revision), ("a", 1));
            assert_eq!((second.key.as_str(), second.revision), ("b", 2));
        }
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn duplicate_append_is_silent() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        assert!(store.append("log", "x", "1".into()).await.unwrap());
        assert!(!store.append("log", "x", "2".into()).await.unwrap());

        assert_eq!(rx.recv().await.unwrap().revision, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.entries("log").await.unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn compare_and_put_only_replaces_the_expected_value() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        assert!(store.compare_and_put("k", None, "1".into()).await.unwrap());
        assert!(!store.compare_and_put("k", None, "2".into()).await.unwrap());
        assert!(!store.compare_and_put("k", Some("0"), "2".into()).await.unwrap());
        assert!(store.compare_and_put("k", Some("1"), "2".into()).await.unwrap());

        assert_eq!(rx.recv().await.unwrap().revision, 1);
        assert_eq!(rx.recv().await.unwrap().revision, 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn unavailable_store_rejects_io() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.put("a", "1".into()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.put("a", "1".into()).await.is_ok());
    }
}
