use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::record_store::BoxFuture;

/// Extension-wide key/value settings as stored on disk.
pub type SettingsMap = Map<String, Value>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Path error: {0}")]
    PathError(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub trait SettingsRepository: Send + Sync + 'static {
    /// Load all settings from storage
    fn load(&self) -> BoxFuture<'static, SettingsResult<SettingsMap>>;

    /// Save all settings to storage
    fn save(&self, settings: SettingsMap) -> BoxFuture<'static, SettingsResult<()>>;
}

pub struct SettingsJsonRepository {
    file_path: PathBuf,
}

impl SettingsJsonRepository {
    /// Create repository with XDG-compliant path
    pub fn new() -> SettingsResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SettingsError::PathError("Cannot determine config directory".into()))?;

        Ok(Self {
            file_path: config_dir.join("tabchat").join("settings.json"),
        })
    }

    /// Create repository with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

impl SettingsRepository for SettingsJsonRepository {
    fn load(&self) -> BoxFuture<'static, SettingsResult<SettingsMap>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            // If file doesn't exist, return empty settings (first run)
            if !tokio::fs::try_exists(&path).await? {
                return Ok(SettingsMap::new());
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            let settings: SettingsMap = serde_json::from_str(&contents)?;

            Ok(settings)
        })
    }

    fn save(&self, settings: SettingsMap) -> BoxFuture<'static, SettingsResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let json = serde_json::to_string_pretty(&settings)?;

            // Write atomically using temp file + rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }
}

/// Settings kept only in memory, for tests and ephemeral hosts.
#[derive(Clone, Default)]
pub struct InMemorySettingsRepository {
    settings: Arc<Mutex<SettingsMap>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsRepository for InMemorySettingsRepository {
    fn load(&self) -> BoxFuture<'static, SettingsResult<SettingsMap>> {
        let settings = self.settings.clone();
        Box::pin(async move { Ok(settings.lock().clone()) })
    }

    fn save(&self, new_settings: SettingsMap) -> BoxFuture<'static, SettingsResult<()>> {
        let settings = self.settings.clone();
        Box::pin(async move {
            *settings.lock() = new_settings;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::with_path(dir.path().join("settings.json"));
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("settings.json");
        let repo = SettingsJsonRepository::with_path(path.clone());

        let mut settings = SettingsMap::new();
        settings.insert("debug".into(), json!(true));
        repo.save(settings).await.unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.get("debug"), Some(&json!(true)));
    }
}
