use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::repositories::{SettingsMap, SettingsRepository, SettingsResult};

/// Key of the only setting the engine itself reads.
pub const DEBUG_KEY: &str = "debug";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// One observed write to the settings area.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsChange {
    pub key: String,
    pub old_value: Option<Value>,
    /// `None` when the key was removed.
    pub new_value: Option<Value>,
}

/// Settings relevant to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneralSettings {
    pub debug: bool,
}

/// Persistent key/value area shared by every context, whose writes every
/// context can observe.
pub struct SettingsStore {
    repository: Arc<dyn SettingsRepository>,
    values: RwLock<SettingsMap>,
    write_gate: Mutex<()>,
    changes: broadcast::Sender<SettingsChange>,
}

impl SettingsStore {
    pub async fn load(repository: Arc<dyn SettingsRepository>) -> SettingsResult<Self> {
        let values = repository.load().await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            repository,
            values: RwLock::new(values),
            write_gate: Mutex::new(()),
            changes,
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn general(&self) -> GeneralSettings {
        GeneralSettings {
            debug: self.get(DEBUG_KEY).as_ref().is_some_and(is_truthy),
        }
    }

    pub async fn set(&self, key: &str, value: Value) -> SettingsResult<()> {
        let _gate = self.write_gate.lock().await;

        let mut next = self.values.read().clone();
        let old_value = next.insert(key.to_string(), value.clone());
        self.commit(next).await?;

        self.emit(SettingsChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> SettingsResult<bool> {
        let _gate = self.write_gate.lock().await;
        self.remove_locked(key, None).await
    }

    /// Remove `key` only while it still holds `expected`.
    pub async fn remove_if_eq(&self, key: &str, expected: &Value) -> SettingsResult<bool> {
        let _gate = self.write_gate.lock().await;
        self.remove_locked(key, Some(expected)).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes.subscribe()
    }

    async fn remove_locked(&self, key: &str, expected: Option<&Value>) -> SettingsResult<bool> {
        let mut next = self.values.read().clone();
        match (next.get(key), expected) {
            (None, _) => return Ok(false),
            (Some(current), Some(expected)) if current != expected => return Ok(false),
            _ => {}
        }

        let old_value = next.remove(key);
        self.commit(next).await?;

        self.emit(SettingsChange {
            key: key.to_string(),
            old_value,
            new_value: None,
        });
        Ok(true)
    }

    /// Persist first so a failed save leaves the cached values untouched.
    async fn commit(&self, next: SettingsMap) -> SettingsResult<()> {
        self.repository.save(next.clone()).await?;
        *self.values.write() = next;
        Ok(())
    }

    fn emit(&self, change: SettingsChange) {
        // No receivers is fine: nobody is watching settings right now.
        if self.changes.send(change).is_err() {
            debug!("Settings change had no observers");
        }
    }
}

/// Boolean-ish interpretation used for flags written by the settings UI.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemorySettingsRepository;
    use serde_json::json;

    async fn store() -> SettingsStore {
        SettingsStore::load(Arc::new(InMemorySettingsRepository::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_is_observed() {
        let store = store().await;
        let mut changes = store.subscribe();

        store.set("theme", json!("dark")).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, "theme");
        assert_eq!(change.old_value, None);
        assert_eq!(change.new_value, Some(json!("dark")));
        assert_eq!(store.get("theme"), Some(json!("dark")));
    }

    #[tokio::test]
    async fn test_remove_if_eq_respects_newer_value() {
        let store = store().await;
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();

        assert!(!store.remove_if_eq("k", &json!(1)).await.unwrap());
        assert_eq!(store.get("k"), Some(json!(2)));

        assert!(store.remove_if_eq("k", &json!(2)).await.unwrap());
        assert_eq!(store.get("k"), None);
        assert!(!store.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_debug_flag_is_boolean_ish() {
        let store = store().await;
        assert!(!store.general().debug);

        store.set(DEBUG_KEY, json!("true")).await.unwrap();
        assert!(store.general().debug);

        store.set(DEBUG_KEY, json!(0)).await.unwrap();
        assert!(!store.general().debug);

        store.set(DEBUG_KEY, json!(true)).await.unwrap();
        assert!(store.general().debug);
    }

    #[tokio::test]
    async fn test_values_survive_reload() {
        let repo = Arc::new(InMemorySettingsRepository::new());
        let first = SettingsStore::load(repo.clone()).await.unwrap();
        first.set(DEBUG_KEY, json!(true)).await.unwrap();

        let second = SettingsStore::load(repo).await.unwrap();
        assert!(second.general().debug);
    }
}
