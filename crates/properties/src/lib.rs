//! Persistent key/value property store.
//!
//! A typed facade over a small JSON file: counters, schedule state, trigger
//! bookkeeping, and operator overrides all live here. Mutation goes through
//! [`PropertyStore::update`], an atomic read-modify-write under a per-key
//! async mutex, so concurrent handlers never interleave writes to the same
//! key.

pub mod keys;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use fso_domain::error::{Error, Result};

pub struct PropertyStore {
    inner: RwLock<HashMap<String, String>>,
    persist_path: PathBuf,
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PropertyStore {
    /// Open (or create) the store backed by `{state_path}/properties.json`.
    pub fn open(state_path: &Path) -> Self {
        let persist_path = state_path.join("properties.json");
        let mut store = Self {
            inner: RwLock::new(HashMap::new()),
            persist_path,
            locks: parking_lot::Mutex::new(HashMap::new()),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&data) {
                let count = map.len();
                self.inner = RwLock::new(map);
                tracing::info!(count, "loaded properties from disk");
            }
        }
    }

    async fn persist(&self) {
        let map = self.inner.read().await;
        if let Ok(json) = serde_json::to_string_pretty(&*map) {
            drop(map);
            let path = self.persist_path.clone();
            // Spawn blocking to avoid blocking the Tokio executor.
            let _ = tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist properties");
                }
            })
            .await;
        }
    }

    // ── raw access ───────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) {
        self.inner.write().await.insert(key.to_owned(), value.into());
        self.persist().await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.inner.write().await.remove(key).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    // ── typed access ─────────────────────────────────────────────────

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_string(value)?).await;
        Ok(())
    }

    /// Boolean property: `true|1|yes|on`, case-insensitive. `None` when unset.
    pub async fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)
            .await
            .map(|v| fso_domain::targeting::parse_bool(&v))
    }

    pub async fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).await.and_then(|v| v.trim().parse().ok())
    }

    pub async fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).await.and_then(|v| v.trim().parse().ok())
    }

    // ── atomic read-modify-write ─────────────────────────────────────

    /// Run `f` over the current value of `key` under that key's mutex.
    ///
    /// `f` returns the new value (`None` deletes the key) plus a result
    /// passed back to the caller. Acquisition waits at most `max_wait`;
    /// on timeout the update fails with [`Error::Busy`] and the stored
    /// value is untouched.
    pub async fn update<T>(
        &self,
        key: &str,
        max_wait: Duration,
        f: impl FnOnce(Option<String>) -> (Option<String>, T),
    ) -> Result<T> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = tokio::time::timeout(max_wait, lock.lock())
            .await
            .map_err(|_| Error::Busy(format!("property lock on {key} not acquired")))?;

        let current = self.get(key).await;
        let (next, out) = f(current);
        match next {
            Some(value) => {
                self.inner.write().await.insert(key.to_owned(), value);
            }
            None => {
                self.inner.write().await.remove(key);
            }
        }
        self.persist().await;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PropertyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PropertyStore::open(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn set_get_delete() {
        let (_dir, store) = store();
        assert_eq!(store.get("k").await, None);
        store.set("k", "v").await;
        assert_eq!(store.get("k").await.as_deref(), Some("v"));
        assert!(store.delete("k").await);
        assert!(!store.delete("k").await);
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PropertyStore::open(dir.path());
            store.set("counter", "42").await;
        }
        let store = PropertyStore::open(dir.path());
        assert_eq!(store.get("counter").await.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn bool_parsing_accepts_all_spellings() {
        let (_dir, store) = store();
        for v in ["true", "TRUE", "1", "yes", "On"] {
            store.set("flag", v).await;
            assert_eq!(store.get_bool("flag").await, Some(true), "{v}");
        }
        store.set("flag", "false").await;
        assert_eq!(store.get_bool("flag").await, Some(false));
        assert_eq!(store.get_bool("missing").await, None);
    }

    #[tokio::test]
    async fn update_is_read_modify_write() {
        let (_dir, store) = store();
        store.set("n", "10").await;
        let prev = store
            .update("n", Duration::from_secs(1), |cur| {
                let n: u32 = cur.as_deref().unwrap_or("0").parse().unwrap();
                (Some((n + 5).to_string()), n)
            })
            .await
            .unwrap();
        assert_eq!(prev, 10);
        assert_eq!(store.get("n").await.as_deref(), Some("15"));
    }

    #[tokio::test]
    async fn update_returning_none_deletes() {
        let (_dir, store) = store();
        store.set("gone", "x").await;
        store
            .update("gone", Duration::from_secs(1), |_| (None, ()))
            .await
            .unwrap();
        assert_eq!(store.get("gone").await, None);
    }

    #[tokio::test]
    async fn concurrent_updates_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PropertyStore::open(dir.path()));
        store.set("n", "0").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.update("n", Duration::from_secs(5), |cur| {
                    let n: u32 = cur.as_deref().unwrap_or("0").parse().unwrap();
                    (Some((n + 1).to_string()), n)
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("n").await.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn json_round_trip() {
        let (_dir, store) = store();
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct S {
            date: String,
            counter: u32,
        }
        let v = S {
            date: "2024-06-10".into(),
            counter: 3,
        };
        store.set_json("state", &v).await.unwrap();
        let back: Option<S> = store.get_json("state").await.unwrap();
        assert_eq!(back, Some(v));
    }
}
