//! Engine lifecycle management
//!
//! One supervisor per local flavor owns the state machine
//! `absent → installed → starting → running → stopping → stopped` (with
//! `running → unhealthy` driven by probes) and serializes lifecycle
//! operations behind a per-flavor mutex. Model administration is delegated
//! to engine-specific adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use strum::Display;
use tokio::process::Command;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod ollama;
pub mod openvino;
pub mod platform;

pub use ollama::OllamaAdmin;
pub use openvino::OvmsAdmin;
pub use platform::Platform;

use crate::config::Config;
use crate::downloads::ProgressStream;
use crate::errors::{AogError, AogResult};
use crate::utils::{compare_versions, open_rotating, rotating_log};

pub const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const MODEL_UNLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const START_READINESS_TIMEOUT: Duration = Duration::from_secs(10);
const START_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);

const BUNDLE_BASE_URL: &str = "https://bundles.aogdev.net/engine";

/// Engine-specific model administration surface.
#[async_trait::async_trait]
pub trait ModelAdmin: Send + Sync {
    async fn list_models(&self) -> AogResult<Vec<String>>;
    async fn load_model(
        &self,
        model: &str,
        service: &str,
        token: &CancellationToken,
    ) -> AogResult<()>;
    async fn unload_model(&self, model: &str, token: &CancellationToken) -> AogResult<()>;
    async fn delete_model(&self, model: &str) -> AogResult<()>;
    async fn pull_model(&self, model: &str, token: &CancellationToken)
    -> AogResult<ProgressStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineState {
    Absent,
    Installed,
    Starting,
    Running,
    Unhealthy,
    Stopping,
    Stopped,
}

/// Static description of one local engine flavor.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub flavor: String,
    pub install_dir: PathBuf,
    pub exec_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub required_version: String,
}

impl EngineSettings {
    fn ollama(config: &Config) -> Self {
        let install_dir = config.engine_dir("ollama");
        let exec_name = if cfg!(windows) { "ollama.exe" } else { "ollama" };
        Self {
            exec_path: install_dir.join(exec_name),
            install_dir,
            flavor: "ollama".to_string(),
            host: "127.0.0.1".to_string(),
            port: 11434,
            required_version: "0.5.0".to_string(),
        }
    }

    fn openvino(config: &Config) -> Self {
        let install_dir = config.engine_dir("openvino");
        let exec_name = if cfg!(windows) { "ovms.exe" } else { "ovms" };
        Self {
            exec_path: install_dir.join(exec_name),
            install_dir,
            flavor: "openvino".to_string(),
            host: "127.0.0.1".to_string(),
            port: 16666,
            required_version: "2024.4".to_string(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Supervisor for one engine subprocess.
pub struct EngineSupervisor {
    settings: EngineSettings,
    logs_dir: PathBuf,
    download_dir: PathBuf,
    models_dir: PathBuf,
    client: reqwest::Client,
    /// Serializes install/start/stop/upgrade per flavor
    lifecycle: Mutex<()>,
    state_tx: watch::Sender<EngineState>,
    accept_requests: AtomicBool,
    child: Mutex<Option<tokio::process::Child>>,
}

impl EngineSupervisor {
    fn new(settings: EngineSettings, config: &Config, client: reqwest::Client) -> Self {
        let initial = if settings.exec_path.exists() {
            EngineState::Installed
        } else {
            EngineState::Absent
        };
        let (state_tx, _) = watch::channel(initial);
        Self {
            logs_dir: config.logs_dir(),
            download_dir: config.download_dir(),
            models_dir: config.openvino_models_dir(),
            settings,
            client,
            lifecycle: Mutex::new(()),
            state_tx,
            accept_requests: AtomicBool::new(false),
            child: Mutex::new(None),
        }
    }

    pub fn flavor(&self) -> &str {
        &self.settings.flavor
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Channel-like notification of state changes.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: EngineState) {
        if *self.state_tx.borrow() != state {
            info!(flavor = %self.settings.flavor, %state, "engine state transition");
        }
        let _ = self.state_tx.send(state);
    }

    pub fn base_url(&self) -> String {
        self.settings.base_url()
    }

    pub fn accepts_requests(&self) -> bool {
        self.accept_requests.load(Ordering::SeqCst) && matches!(self.state(), EngineState::Running)
    }

    pub async fn health(&self) -> bool {
        self.client
            .get(self.base_url())
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    /// Probe-driven side transition between `running` and `unhealthy`.
    pub fn mark_health(&self, healthy: bool) {
        match (self.state(), healthy) {
            (EngineState::Running, false) => self.set_state(EngineState::Unhealthy),
            (EngineState::Unhealthy, true) => self.set_state(EngineState::Running),
            _ => {}
        }
    }

    /// Install the engine bundle for the detected platform. Idempotent
    /// unless `cover` is set.
    pub async fn install(&self, cover: bool, token: &CancellationToken) -> AogResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.install_locked(cover, token).await
    }

    async fn install_locked(&self, cover: bool, token: &CancellationToken) -> AogResult<()> {
        if self.settings.exec_path.exists() && !cover {
            debug!(flavor = %self.settings.flavor, "engine already installed");
            if matches!(self.state(), EngineState::Absent) {
                self.set_state(EngineState::Installed);
            }
            return Ok(());
        }

        let platform = platform::detect()?;
        if !platform.supports_download() {
            return Err(AogError::UnsupportedPlatform {
                detail: format!("engine bundles are not published for {:?}", platform),
            });
        }

        let bundle_url = format!(
            "{BUNDLE_BASE_URL}/{flavor}/{flavor}-{tag}.tar.gz",
            flavor = self.settings.flavor,
            tag = platform.bundle_tag()
        );
        let archive_path = self
            .download_dir
            .join(format!("{}-bundle.tar.gz", self.settings.flavor));

        info!(flavor = %self.settings.flavor, url = %bundle_url, "downloading engine bundle");
        self.download_bundle(&bundle_url, &archive_path, token).await?;

        let install_dir = self.settings.install_dir.clone();
        tokio::fs::create_dir_all(&install_dir).await.map_err(|e| {
            AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("cannot create install dir: {e}"),
            }
        })?;

        let archive = archive_path.clone();
        let extract_dir = install_dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::open(&archive)?;
            let decoder = flate2::read::GzDecoder::new(file);
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(&extract_dir)
        })
        .await
        .map_err(|e| AogError::internal(format!("extract task failed: {e}")))?
        .map_err(|e| AogError::EngineStart {
            flavor: self.settings.flavor.clone(),
            message: format!("bundle extraction failed: {e}"),
        })?;

        self.write_initial_config().await?;
        self.run_bootstrap_script().await?;

        self.set_state(EngineState::Installed);
        info!(flavor = %self.settings.flavor, "engine installed");
        Ok(())
    }

    async fn download_bundle(
        &self,
        url: &str,
        dest: &PathBuf,
        token: &CancellationToken,
    ) -> AogResult<()> {
        tokio::fs::create_dir_all(&self.download_dir).await.map_err(|e| {
            AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("cannot create download dir: {e}"),
            }
        })?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("bundle download returned {}", response.status()),
            });
        }
        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("cannot create bundle file: {e}"),
            }
        })?;
        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(AogError::Cancelled),
                chunk = body.next() => match chunk {
                    Some(Ok(data)) => {
                        tokio::io::AsyncWriteExt::write_all(&mut file, &data)
                            .await
                            .map_err(|e| AogError::EngineStart {
                                flavor: self.settings.flavor.clone(),
                                message: format!("bundle write failed: {e}"),
                            })?;
                    }
                    Some(Err(error)) => return Err(AogError::from(error)),
                    None => break,
                }
            }
        }
        Ok(())
    }

    async fn write_initial_config(&self) -> AogResult<()> {
        if self.settings.flavor == "openvino" {
            let config_path = self.models_dir.join("config.json");
            if !config_path.exists() {
                tokio::fs::create_dir_all(&self.models_dir).await.map_err(|e| {
                    AogError::internal(format!("cannot create models dir: {e}"))
                })?;
                let empty = json!({"mediapipe_config_list": [], "model_config_list": []});
                tokio::fs::write(&config_path, serde_json::to_vec_pretty(&empty).unwrap())
                    .await
                    .map_err(|e| AogError::internal(format!("cannot seed config.json: {e}")))?;
            }
        }
        Ok(())
    }

    /// Platform-specific bootstrap shipped inside the bundle (Python deps
    /// and driver checks for OVMS; nothing for Ollama).
    async fn run_bootstrap_script(&self) -> AogResult<()> {
        let script = if cfg!(windows) {
            self.settings.install_dir.join("bootstrap.ps1")
        } else {
            self.settings.install_dir.join("bootstrap.sh")
        };
        if !script.exists() {
            return Ok(());
        }
        info!(flavor = %self.settings.flavor, script = %script.display(), "running bootstrap script");
        let mut command = if cfg!(windows) {
            let mut c = Command::new("powershell");
            c.arg("-File").arg(&script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg(&script);
            c
        };
        let status = command
            .current_dir(&self.settings.install_dir)
            .status()
            .await
            .map_err(|e| AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("bootstrap failed to run: {e}"),
            })?;
        if !status.success() {
            return Err(AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("bootstrap exited with {status}"),
            });
        }
        Ok(())
    }

    /// Spawn the supervised subprocess detached from the caller and wait for
    /// the health probe, up to 10 s. A missing executable returns success
    /// while the engine stays `absent` (deferred install).
    pub async fn start(&self, mode: &str) -> AogResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked(mode).await
    }

    async fn start_locked(&self, mode: &str) -> AogResult<()> {
        if matches!(self.state(), EngineState::Running) {
            return Ok(());
        }
        if !self.settings.exec_path.exists() {
            debug!(
                flavor = %self.settings.flavor,
                "executable missing; start deferred until install"
            );
            self.set_state(EngineState::Absent);
            return Ok(());
        }

        self.set_state(EngineState::Starting);
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| AogError::EngineStart {
                flavor: self.settings.flavor.clone(),
                message: format!("cannot create log dir: {e}"),
            })?;

        let stdout = open_rotating(
            &self.logs_dir.join(format!("{}.log", self.settings.flavor)),
            rotating_log::DEFAULT_MAX_BYTES,
            rotating_log::DEFAULT_KEEP,
        )
        .map_err(|e| AogError::EngineStart {
            flavor: self.settings.flavor.clone(),
            message: format!("cannot open stdout log: {e}"),
        })?;
        let stderr = open_rotating(
            &self.logs_dir.join(format!("{}.err.log", self.settings.flavor)),
            rotating_log::DEFAULT_MAX_BYTES,
            rotating_log::DEFAULT_KEEP,
        )
        .map_err(|e| AogError::EngineStart {
            flavor: self.settings.flavor.clone(),
            message: format!("cannot open stderr log: {e}"),
        })?;

        let mut command = self.build_command();
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::from(stdout))
            .stderr(std::process::Stdio::from(stderr))
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        debug!(flavor = %self.settings.flavor, mode, "spawning engine process");
        let child = command.spawn().map_err(|e| AogError::EngineStart {
            flavor: self.settings.flavor.clone(),
            message: format!("spawn failed: {e}"),
        })?;
        *self.child.lock().await = Some(child);

        let deadline = tokio::time::Instant::now() + START_READINESS_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.health().await {
                self.set_state(EngineState::Running);
                self.accept_requests.store(true, Ordering::SeqCst);
                info!(flavor = %self.settings.flavor, "engine ready");
                return Ok(());
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }

        self.stop_locked().await?;
        Err(AogError::EngineStart {
            flavor: self.settings.flavor.clone(),
            message: "engine did not become healthy within 10s".to_string(),
        })
    }

    fn build_command(&self) -> Command {
        match self.settings.flavor.as_str() {
            "ollama" => {
                let mut command = Command::new(&self.settings.exec_path);
                command.arg("serve").env(
                    "OLLAMA_HOST",
                    format!("{}:{}", self.settings.host, self.settings.port),
                );
                command
            }
            _ => {
                let mut command = Command::new(&self.settings.exec_path);
                command
                    .arg("--rest_bind_address")
                    .arg(&self.settings.host)
                    .arg("--rest_port")
                    .arg(self.settings.port.to_string())
                    .arg("--config_path")
                    .arg(self.models_dir.join("config.json"))
                    .arg("--file_system_poll_wait_seconds")
                    .arg("1");
                command
            }
        }
    }

    /// Graceful termination first, escalating to kill after 5 s. Always
    /// safe to call.
    pub async fn stop(&self) -> AogResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> AogResult<()> {
        self.accept_requests.store(false, Ordering::SeqCst);
        let Some(mut child) = self.child.lock().await.take() else {
            if !matches!(self.state(), EngineState::Absent) {
                self.set_state(EngineState::Stopped);
            }
            return Ok(());
        };

        self.set_state(EngineState::Stopping);
        terminate_gracefully(&child);

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(flavor = %self.settings.flavor, %status, "engine exited");
            }
            Ok(Err(error)) => {
                warn!(flavor = %self.settings.flavor, %error, "wait on engine failed");
            }
            Err(_) => {
                warn!(flavor = %self.settings.flavor, "engine ignored termination; killing");
                let _ = child.kill().await;
            }
        }
        self.set_state(EngineState::Stopped);
        Ok(())
    }

    /// Compare installed to required minimum; reinstall with cover and
    /// restart when lower. `accept_requests` stays cleared for the whole
    /// upgrade so the scheduler routes around this engine.
    pub async fn upgrade(&self, token: &CancellationToken) -> AogResult<()> {
        let _guard = self.lifecycle.lock().await;

        let Some(installed) = self.current_version().await else {
            return Err(AogError::EngineUpgrade {
                flavor: self.settings.flavor.clone(),
                message: "engine is not installed".to_string(),
            });
        };
        if compare_versions(&installed, &self.settings.required_version).is_ge() {
            debug!(
                flavor = %self.settings.flavor,
                %installed,
                "engine meets required version"
            );
            return Ok(());
        }

        info!(
            flavor = %self.settings.flavor,
            %installed,
            required = %self.settings.required_version,
            "upgrading engine"
        );
        self.accept_requests.store(false, Ordering::SeqCst);
        let upgrade = async {
            self.stop_locked().await?;
            self.install_locked(true, token).await?;
            self.start_locked("daemon").await
        };
        upgrade.await.map_err(|error| AogError::EngineUpgrade {
            flavor: self.settings.flavor.clone(),
            message: error.to_string(),
        })
    }

    /// Version string reported by the installed executable.
    pub async fn current_version(&self) -> Option<String> {
        if !self.settings.exec_path.exists() {
            return None;
        }
        let output = Command::new(&self.settings.exec_path)
            .arg("--version")
            .output()
            .await
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let line = text.lines().next()?.trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Best-effort graceful signal; on unix a SIGTERM to the process group,
/// elsewhere the escalation path will kill.
fn terminate_gracefully(child: &tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status();
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Owns one supervisor per local flavor.
pub struct EngineManager {
    config: Config,
    client: reqwest::Client,
    supervisors: HashMap<String, Arc<EngineSupervisor>>,
}

impl EngineManager {
    pub fn new(config: Config, client: reqwest::Client) -> Self {
        let mut supervisors = HashMap::new();
        for settings in [
            EngineSettings::ollama(&config),
            EngineSettings::openvino(&config),
        ] {
            supervisors.insert(
                settings.flavor.clone(),
                Arc::new(EngineSupervisor::new(settings, &config, client.clone())),
            );
        }
        Self {
            config,
            client,
            supervisors,
        }
    }

    pub fn supervisor(&self, flavor: &str) -> AogResult<Arc<EngineSupervisor>> {
        self.supervisors
            .get(flavor)
            .cloned()
            .ok_or_else(|| AogError::EngineUnavailable {
                flavor: flavor.to_string(),
                message: "unknown local engine flavor".to_string(),
            })
    }

    pub fn flavors(&self) -> Vec<String> {
        self.supervisors.keys().cloned().collect()
    }

    /// Loopback base URL when the engine can plausibly serve requests.
    pub async fn endpoint(&self, flavor: &str) -> Option<String> {
        let supervisor = self.supervisors.get(flavor)?;
        match supervisor.state() {
            EngineState::Running | EngineState::Unhealthy | EngineState::Starting => {
                Some(supervisor.base_url())
            }
            _ => None,
        }
    }

    pub async fn accepts_requests(&self, flavor: &str) -> bool {
        self.supervisors
            .get(flavor)
            .map(|s| s.accepts_requests())
            .unwrap_or(false)
    }

    /// Relay a liveness verdict from the health prober onto the engine's
    /// state machine.
    pub fn note_probe(&self, flavor: &str, healthy: bool) {
        if let Some(supervisor) = self.supervisors.get(flavor) {
            supervisor.mark_health(healthy);
        }
    }

    pub fn model_admin(&self, flavor: &str) -> AogResult<Arc<dyn ModelAdmin>> {
        let supervisor = self.supervisor(flavor)?;
        match flavor {
            "ollama" => Ok(Arc::new(OllamaAdmin::new(
                self.client.clone(),
                supervisor.base_url(),
            ))),
            "openvino" => Ok(Arc::new(self.openvino_admin())),
            other => Err(AogError::EngineUnavailable {
                flavor: other.to_string(),
                message: "no admin adapter for flavor".to_string(),
            }),
        }
    }

    /// Adapter used both for model admin and for post-download processing.
    pub fn openvino_admin(&self) -> OvmsAdmin {
        let base_url = self
            .supervisors
            .get("openvino")
            .map(|s| s.base_url())
            .unwrap_or_else(|| "http://127.0.0.1:16666".to_string());
        OvmsAdmin::new(
            self.client.clone(),
            base_url,
            self.config.openvino_models_dir(),
        )
    }

    pub async fn stop_all(&self) {
        for supervisor in self.supervisors.values() {
            if let Err(error) = supervisor.stop().await {
                warn!(flavor = %supervisor.flavor(), %error, "engine stop failed");
            }
        }
    }

    /// Aggregate state for `/engine/health`.
    pub async fn health_summary(&self) -> serde_json::Value {
        let mut engines = serde_json::Map::new();
        for (flavor, supervisor) in &self.supervisors {
            let alive = supervisor.health().await;
            engines.insert(
                flavor.clone(),
                json!({
                    "state": supervisor.state(),
                    "reachable": alive,
                    "accepting_requests": supervisor.accepts_requests(),
                    "endpoint": supervisor.base_url(),
                }),
            );
        }
        serde_json::Value::Object(engines)
    }

    /// Installed versions for `/engine/version`.
    pub async fn version_summary(&self) -> serde_json::Value {
        let mut engines = serde_json::Map::new();
        for (flavor, supervisor) in &self.supervisors {
            engines.insert(
                flavor.clone(),
                json!({
                    "installed": supervisor.current_version().await,
                    "required": supervisor.settings.required_version,
                }),
            );
        }
        serde_json::Value::Object(engines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &std::path::Path) -> EngineManager {
        let mut config = Config::default();
        config.storage.root_dir = dir.to_path_buf();
        EngineManager::new(config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn start_with_missing_executable_defers_install() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let supervisor = manager.supervisor("ollama").unwrap();

        supervisor.start("daemon").await.unwrap();
        assert_eq!(supervisor.state(), EngineState::Absent);
        assert!(!supervisor.accepts_requests());
        assert!(manager.endpoint("ollama").await.is_none());
    }

    #[tokio::test]
    async fn stop_is_always_safe() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let supervisor = manager.supervisor("openvino").unwrap();
        supervisor.stop().await.unwrap();
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_flavor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        assert!(manager.supervisor("vllm").is_err());
        assert!(manager.model_admin("vllm").is_err());
    }
}
