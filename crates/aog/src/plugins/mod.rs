//! Plugin lifecycle management
//!
//! Plugins are bundles under `plugins/<name>/`, each carrying a
//! `manifest.json`. The packaging format itself is external; the gateway
//! only tracks which bundles exist and which are loaded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use utoipa::ToSchema;

use crate::errors::{AogError, AogResult};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub desc: String,
    /// Relative path of the plugin's entry file inside its bundle
    #[serde(default)]
    pub entry: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Loaded,
    Stopped,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub desc: String,
    pub state: PluginState,
}

#[derive(Clone)]
pub struct PluginManager {
    plugins_dir: PathBuf,
    loaded: Arc<RwLock<HashMap<String, PluginManifest>>>,
}

impl PluginManager {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self {
            plugins_dir,
            loaded: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn bundle_dir(&self, name: &str) -> AogResult<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(AogError::bad_request(format!("invalid plugin name '{name}'")));
        }
        Ok(self.plugins_dir.join(name))
    }

    async fn read_manifest(&self, name: &str) -> AogResult<PluginManifest> {
        let path = self.bundle_dir(name)?.join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path).await.map_err(|_| AogError::BadRequest {
            message: format!("plugin '{name}' has no manifest"),
            details: HashMap::new(),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AogError::bad_request(format!("plugin '{name}' manifest is invalid: {e}")))
    }

    /// Every bundle on disk, with its load state.
    pub async fn list(&self) -> AogResult<Vec<PluginInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.plugins_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let loaded = self.loaded.read().await;
        let mut plugins = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(manifest) = self.read_manifest(&name).await else {
                continue;
            };
            plugins.push(PluginInfo {
                state: if loaded.contains_key(&name) {
                    PluginState::Loaded
                } else {
                    PluginState::Stopped
                },
                name,
                version: manifest.version,
                desc: manifest.desc,
            });
        }
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    pub async fn info(&self, name: &str) -> AogResult<PluginInfo> {
        let manifest = self.read_manifest(name).await?;
        let loaded = self.loaded.read().await;
        Ok(PluginInfo {
            state: if loaded.contains_key(name) {
                PluginState::Loaded
            } else {
                PluginState::Stopped
            },
            name: name.to_string(),
            version: manifest.version,
            desc: manifest.desc,
        })
    }

    /// Load a bundle already present under `plugins/<name>/`. `/plugin/load`
    /// and `/plugin/download` are aliases of this operation.
    pub async fn load(&self, name: &str) -> AogResult<PluginInfo> {
        let manifest = self.read_manifest(name).await?;
        self.loaded
            .write()
            .await
            .insert(name.to_string(), manifest.clone());
        info!(plugin = name, "plugin loaded");
        self.info(name).await
    }

    pub async fn stop(&self, name: &str) -> AogResult<()> {
        if self.loaded.write().await.remove(name).is_none() {
            return Err(AogError::bad_request(format!("plugin '{name}' is not loaded")));
        }
        info!(plugin = name, "plugin stopped");
        Ok(())
    }

    /// Stop if needed, then remove the bundle directory.
    pub async fn delete(&self, name: &str) -> AogResult<()> {
        self.loaded.write().await.remove(name);
        let dir = self.bundle_dir(name)?;
        if !dir.exists() {
            return Err(AogError::bad_request(format!("plugin '{name}' does not exist")));
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| AogError::internal(format!("cannot remove plugin '{name}': {e}")))?;
        info!(plugin = name, "plugin deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_bundle(name: &str) -> (tempfile::TempDir, PluginManager) {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join(name);
        tokio::fs::create_dir_all(&bundle).await.unwrap();
        tokio::fs::write(
            bundle.join(MANIFEST_FILE),
            serde_json::json!({"name": name, "version": "1.0.0", "desc": "test"}).to_string(),
        )
        .await
        .unwrap();
        let manager = PluginManager::new(dir.path().to_path_buf());
        (dir, manager)
    }

    #[tokio::test]
    async fn load_stop_delete_lifecycle() {
        let (_dir, manager) = manager_with_bundle("sample").await;

        let info = manager.load("sample").await.unwrap();
        assert_eq!(info.state, PluginState::Loaded);

        manager.stop("sample").await.unwrap();
        assert_eq!(manager.info("sample").await.unwrap().state, PluginState::Stopped);

        manager.delete("sample").await.unwrap();
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_escapes_are_rejected() {
        let (_dir, manager) = manager_with_bundle("sample").await;
        assert!(manager.load("../evil").await.is_err());
        assert!(manager.delete("a/b").await.is_err());
    }
}
