//! Gateway configuration
//!
//! Loaded from an optional TOML file with `AOG_`-prefixed environment
//! overrides layered on top. Everything has a default; the gateway runs with
//! no configuration file at all.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Single root under which all gateway state lives
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// SQLite URL; empty means `<root_dir>/aog.db`
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Effective payload size above which `default` policy prefers remote
    #[serde(default = "default_remote_payload_threshold")]
    pub remote_payload_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            remote_payload_threshold: default_remote_payload_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base URL of the content-addressed model hub
    #[serde(default = "default_model_hub_url")]
    pub model_hub_url: String,
    #[serde(default = "default_download_inactivity_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            model_hub_url: default_model_hub_url(),
            inactivity_timeout_secs: default_download_inactivity_secs(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) with `AOG_*` environment
    /// overrides, e.g. `AOG_SERVER__PORT=9000`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AOG_").split("__"))
            .extract()
            .context("failed to load configuration")
    }

    pub fn database_url(&self) -> String {
        if self.database.url.is_empty() {
            format!(
                "sqlite://{}",
                self.storage.root_dir.join("aog.db").display()
            )
        } else {
            self.database.url.clone()
        }
    }

    pub fn engine_dir(&self, flavor: &str) -> PathBuf {
        self.storage.root_dir.join("engine").join(flavor)
    }

    /// Per-model directories plus `config.json` of the OpenVINO model server.
    pub fn openvino_models_dir(&self) -> PathBuf {
        self.engine_dir("openvino").join("models")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.storage.root_dir.join("download")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.storage.root_dir.join("plugins")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.storage.root_dir.join("logs")
    }

    /// Create the directory skeleton the components expect.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.storage.root_dir.clone(),
            self.download_dir(),
            self.plugins_dir(),
            self.logs_dir(),
            self.openvino_models_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_stand_alone() {
        let config = Config::default();
        assert_eq!(config.server.port, 16688);
        assert!(config.database_url().starts_with("sqlite://"));
        assert!(config.engine_dir("ollama").ends_with("engine/ollama"));
        assert!(
            config
                .openvino_models_dir()
                .ends_with("engine/openvino/models")
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_file("/definitely/not/here.toml").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
