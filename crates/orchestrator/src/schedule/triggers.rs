//! One-shot trigger store.
//!
//! Triggers are an explicit handler → (id, fire_at) map persisted through
//! the property store, so every delete names exactly the trigger it means.
//! `delete_current` removes the handler's oldest entry — the one that just
//! fired — and handlers additionally clear their whole handler group on
//! entry to self-heal duplicate or stale triggers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fso_domain::error::{Error, Result};
use fso_properties::{keys, PropertyStore};

const LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub handler: String,
    pub fire_at: DateTime<Utc>,
}

pub struct TriggerStore {
    props: Arc<PropertyStore>,
}

impl TriggerStore {
    pub fn new(props: Arc<PropertyStore>) -> Self {
        Self { props }
    }

    async fn load(&self) -> Vec<Trigger> {
        self.props
            .get_json::<Vec<Trigger>>(keys::TRIGGERS)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub async fn list(&self) -> Vec<Trigger> {
        let mut triggers = self.load().await;
        triggers.sort_by_key(|t| t.fire_at);
        triggers
    }

    /// Create a one-shot trigger. Past instants are rejected.
    pub async fn create_one_shot(
        &self,
        handler: &str,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Trigger> {
        if at <= now {
            return Err(Error::Config(format!(
                "trigger for {handler} at {at} is in the past"
            )));
        }
        let trigger = Trigger {
            id: Uuid::new_v4(),
            handler: handler.to_owned(),
            fire_at: at,
        };
        let stored = trigger.clone();
        self.mutate(move |list| list.push(stored)).await?;
        tracing::info!(handler, fire_at = %at, id = %trigger.id, "trigger created");
        Ok(trigger)
    }

    /// Delete every trigger bound to `handler`. Returns the removed count.
    pub async fn delete_by_handler(&self, handler: &str) -> Result<usize> {
        let handler = handler.to_owned();
        self.mutate(move |list| {
            let before = list.len();
            list.retain(|t| t.handler != handler);
            before - list.len()
        })
        .await
    }

    /// Delete the handler's oldest trigger (the one that just fired).
    pub async fn delete_current(&self, handler: &str) -> Result<Option<Trigger>> {
        let handler = handler.to_owned();
        self.mutate(move |list| {
            let oldest = list
                .iter()
                .filter(|t| t.handler == handler)
                .min_by_key(|t| t.fire_at)
                .cloned();
            if let Some(ref t) = oldest {
                list.retain(|x| x.id != t.id);
            }
            oldest
        })
        .await
    }

    pub async fn delete_by_id(&self, id: Uuid) -> Result<bool> {
        self.mutate(move |list| {
            let before = list.len();
            list.retain(|t| t.id != id);
            before != list.len()
        })
        .await
    }

    /// Triggers whose fire time has passed, oldest first.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        let mut due: Vec<Trigger> = self
            .load()
            .await
            .into_iter()
            .filter(|t| t.fire_at <= now)
            .collect();
        due.sort_by_key(|t| t.fire_at);
        due
    }

    async fn mutate<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Vec<Trigger>) -> T + Send,
    ) -> Result<T> {
        self.props
            .update(keys::TRIGGERS, LOCK_WAIT, |current| {
                let mut list: Vec<Trigger> = current
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                let out = f(&mut list);
                let raw = serde_json::to_string(&list).unwrap_or_else(|_| "[]".into());
                (Some(raw), out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, 0, 0).unwrap()
    }

    async fn store() -> (tempfile::TempDir, TriggerStore) {
        let dir = tempfile::tempdir().unwrap();
        let props = Arc::new(PropertyStore::open(dir.path()));
        (dir, TriggerStore::new(props))
    }

    #[tokio::test]
    async fn create_rejects_past_instants() {
        let (_dir, store) = store().await;
        let err = store.create_one_shot("h", at(1), at(2)).await.unwrap_err();
        assert!(err.to_string().contains("past"));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn due_returns_only_elapsed_triggers_sorted() {
        let (_dir, store) = store().await;
        store.create_one_shot("a", at(5), at(0)).await.unwrap();
        store.create_one_shot("b", at(3), at(0)).await.unwrap();
        store.create_one_shot("c", at(9), at(0)).await.unwrap();

        let due = store.due(at(6)).await;
        let handlers: Vec<&str> = due.iter().map(|t| t.handler.as_str()).collect();
        assert_eq!(handlers, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn delete_current_removes_oldest_for_handler() {
        let (_dir, store) = store().await;
        store.create_one_shot("h", at(3), at(0)).await.unwrap();
        store.create_one_shot("h", at(7), at(0)).await.unwrap();
        store.create_one_shot("other", at(1), at(0)).await.unwrap();

        let removed = store.delete_current("h").await.unwrap().unwrap();
        assert_eq!(removed.fire_at, at(3));

        let remaining = store.list().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|t| t.handler == "h" && t.fire_at == at(7)));
    }

    #[tokio::test]
    async fn delete_by_handler_clears_duplicates() {
        let (_dir, store) = store().await;
        store.create_one_shot("h", at(3), at(0)).await.unwrap();
        store.create_one_shot("h", at(4), at(0)).await.unwrap();
        store.create_one_shot("keep", at(5), at(0)).await.unwrap();

        assert_eq!(store.delete_by_handler("h").await.unwrap(), 2);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn triggers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let props = Arc::new(PropertyStore::open(dir.path()));
            let store = TriggerStore::new(props);
            store.create_one_shot("h", at(3), at(0)).await.unwrap();
        }
        let props = Arc::new(PropertyStore::open(dir.path()));
        let store = TriggerStore::new(props);
        assert_eq!(store.list().await.len(), 1);
    }
}
