use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use tokio::sync::Mutex;

use crate::store::CoordinationStore;

enum Value {
    Scalar(String),
    Set(HashSet<String>),
    List(Vec<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory coordination store with real TTL semantics. Used by tests
/// and single-process runs; also scriptable as an unreachable store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    fail: AtomicBool,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail.store(unavailable, Ordering::SeqCst);
    }

    /// Number of operations that reached the transport, including
    /// failed ones. Short-circuited breaker calls never increment this.
    pub fn transport_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> FleetResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(FleetError::store_unavailable("memory store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> FleetResult<()> {
        self.check_available()
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(Entry {
                value: Value::Scalar(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(FleetError::store_unavailable(format!(
                "wrong type for key {key}"
            ))),
            None => Ok(None),
        }
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(set_key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            _ => Err(FleetError::store_unavailable(format!(
                "wrong type for key {set_key}"
            ))),
        }
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> FleetResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if let Some(Entry {
            value: Value::Set(members),
            ..
        }) = entries.get_mut(set_key)
        {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> FleetResult<Vec<String>> {
        self.check_available()?;
        let entries = self.entries.lock().await;
        match entries.get(set_key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(FleetError::store_unavailable(format!(
                "wrong type for key {set_key}"
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn append(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let stale = entries.get(key).map(|e| e.is_expired()).unwrap_or(false);
        if stale {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(items) => {
                items.push(value.to_string());
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(())
            }
            _ => Err(FleetError::store_unavailable(format!(
                "wrong type for key {key}"
            ))),
        }
    }

    async fn list(&self, key: &str) -> FleetResult<Vec<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(Vec::new())
            }
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.clone()),
            Some(_) => Err(FleetError::store_unavailable(format!(
                "wrong type for key {key}"
            ))),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scalar_records_expire() {
        let store = MemoryStore::new();
        store
            .put("registry:heartbeat:w1", "{}", Some(Duration::from_millis(40)))
            .await
            .unwrap();

        assert!(store.get("registry:heartbeat:w1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("registry:heartbeat:w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_membership_has_no_ttl() {
        let store = MemoryStore::new();
        store.add_to_set("registry:active_workers", "w1").await.unwrap();
        store.add_to_set("registry:active_workers", "w2").await.unwrap();
        store
            .remove_from_set("registry:active_workers", "w1")
            .await
            .unwrap();

        let members = store.set_members("registry:active_workers").await.unwrap();
        assert_eq!(members, vec!["w2".to_string()]);
    }

    #[tokio::test]
    async fn list_append_refreshes_ttl_wholesale() {
        let store = MemoryStore::new();
        store
            .append("stats:w1:completed", "a", Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        store
            .append("stats:w1:completed", "b", Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // The second append refreshed the whole key.
        assert_eq!(store.list("stats:w1:completed").await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.list("stats:w1:completed").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        assert!(store.get("k").await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
