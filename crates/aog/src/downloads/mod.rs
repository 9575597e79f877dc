//! Streamed model acquisition
//!
//! Resumable, integrity-verified, multi-file downloads with live progress
//! fan-out. One job runs per `model_name`; a second pull for the same model
//! joins the live job, and cancel is idempotent through the job's shared
//! cancellation token. Model state transitions are serialized per model by
//! the job table.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod hub;
pub mod job;

pub use hub::{HubClient, HubFile};
pub use job::{ProgressFanout, ProgressSubscription};

use crate::config::Config;
use crate::database::repositories::{DataStore, ModelKey, ModelRepository};
use crate::engine::EngineManager;
use crate::errors::{AogError, AogResult};
use crate::models::{Model, ModelStatus, ServiceProvider, ServiceSource};

pub type ProgressStream = Pin<Box<dyn Stream<Item = AogResult<ProgressFrame>> + Send>>;

/// One progress frame of a model pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressFrame {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressFrame {
    pub fn status<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            digest: None,
            total: None,
            completed: None,
            error: None,
        }
    }

    pub fn pulling(path: &str, digest: &str, total: u64, completed: u64) -> Self {
        Self {
            status: format!("pulling {path}"),
            digest: (!digest.is_empty()).then(|| digest.to_string()),
            total: Some(total),
            completed: Some(completed),
            error: None,
        }
    }

    pub fn success() -> Self {
        Self::status("success")
    }

    pub fn cancelled() -> Self {
        Self::status("cancelled")
    }

    pub fn failure<S: Into<String>>(reason: S) -> Self {
        let reason = reason.into();
        Self {
            status: "error".to_string(),
            digest: None,
            total: None,
            completed: None,
            error: Some(reason),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == "success" || self.status == "cancelled" || self.error.is_some()
    }
}

struct DownloadJob {
    token: CancellationToken,
    fanout: Arc<ProgressFanout>,
}

/// Drives all model pulls; cheap to clone.
#[derive(Clone)]
pub struct AcquisitionEngine {
    hub: HubClient,
    models: ModelRepository,
    engines: Arc<EngineManager>,
    jobs: Arc<Mutex<HashMap<String, Arc<DownloadJob>>>>,
    models_dir: std::path::PathBuf,
    inactivity_timeout: Duration,
    subscriber_buffer: usize,
}

impl AcquisitionEngine {
    pub fn new(
        config: &Config,
        client: reqwest::Client,
        models: ModelRepository,
        engines: Arc<EngineManager>,
    ) -> Self {
        Self {
            hub: HubClient::new(client, config.download.model_hub_url.clone()),
            models,
            engines,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            models_dir: config.openvino_models_dir(),
            inactivity_timeout: Duration::from_secs(config.download.inactivity_timeout_secs),
            subscriber_buffer: config.download.subscriber_buffer,
        }
    }

    /// Start (or join) the pull of one model and subscribe to its progress.
    pub async fn pull(
        &self,
        provider: ServiceProvider,
        model_name: &str,
    ) -> AogResult<ProgressSubscription> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(model_name) {
            info!(model = model_name, "joining in-flight download");
            return Ok(job.fanout.subscribe());
        }

        let job = Arc::new(DownloadJob {
            token: CancellationToken::new(),
            fanout: Arc::new(ProgressFanout::new(self.subscriber_buffer)),
        });
        let subscription = job.fanout.subscribe();
        jobs.insert(model_name.to_string(), job.clone());
        drop(jobs);

        let engine = self.clone();
        let model_name = model_name.to_string();
        tokio::spawn(async move {
            engine.run_job(provider, model_name, job).await;
        });
        Ok(subscription)
    }

    /// Cancel the live pull of `model_name`; idempotent, and a no-op when
    /// nothing is running.
    pub async fn cancel(&self, model_name: &str) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(model_name) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for job in self.jobs.lock().await.values() {
            job.token.cancel();
        }
    }

    async fn run_job(&self, provider: ServiceProvider, model_name: String, job: Arc<DownloadJob>) {
        let key = ModelKey::new(&provider.provider_name, &model_name);
        if let Err(error) = self.mark_state(&provider, &model_name, ModelStatus::Downloading).await
        {
            warn!(model = %model_name, %error, "cannot mark model downloading");
        }

        let outcome = self.execute(&provider, &model_name, &job).await;

        let (frame, final_state) = match outcome {
            Ok(()) => (ProgressFrame::success(), ModelStatus::Downloaded),
            Err(AogError::Cancelled) => (ProgressFrame::cancelled(), ModelStatus::Failed),
            Err(error) => {
                warn!(model = %model_name, %error, "model pull failed");
                (ProgressFrame::failure(error.to_string()), ModelStatus::Failed)
            }
        };

        if let Err(error) = self.models.update_status(&key, final_state).await {
            warn!(model = %model_name, %error, "cannot record final model state");
        }
        job.fanout.publish(frame);
        self.jobs.lock().await.remove(&model_name);
        info!(model = %model_name, state = %final_state, "download job finished");
    }

    async fn execute(
        &self,
        provider: &ServiceProvider,
        model_name: &str,
        job: &DownloadJob,
    ) -> AogResult<()> {
        // Ollama-style engines pull through their own admin API; everything
        // else streams from the model hub.
        if provider.service_source == ServiceSource::Local && provider.flavor == "ollama" {
            let admin = self.engines.model_admin("ollama")?;
            let mut frames = admin.pull_model(model_name, &job.token).await?;
            while let Some(frame) = frames.next().await {
                let frame = frame?;
                if frame.status == "cancelled" {
                    return Err(AogError::Cancelled);
                }
                // The engine's own terminal frame is replaced by ours.
                if frame.status != "success" {
                    job.fanout.publish(frame);
                }
            }
            return Ok(());
        }

        let files = self.hub.list_files(model_name).await?;
        if files.is_empty() {
            return Err(AogError::ModelNotFound {
                model: model_name.to_string(),
            });
        }

        for file in &files {
            let url = self.hub.file_url(model_name, &file.path);
            let dest = hub::dest_path(&self.models_dir, model_name, &file.path);
            let fanout = job.fanout.clone();
            let path = file.path.clone();
            let digest = file.sha256.clone();
            let total = file.size;
            self.hub
                .download_file(
                    &url,
                    &dest,
                    file,
                    self.inactivity_timeout,
                    &job.token,
                    move |completed| {
                        fanout.publish(ProgressFrame::pulling(&path, &digest, total, completed));
                    },
                )
                .await?;
        }

        // Engine-specific post-processing: OVMS needs the graph emitted and
        // the model registered before it can serve.
        if provider.flavor == "openvino" {
            self.engines
                .openvino_admin()
                .prepare_model(model_name, &provider.service_name)
                .await?;
        }
        Ok(())
    }

    async fn mark_state(
        &self,
        provider: &ServiceProvider,
        model_name: &str,
        status: ModelStatus,
    ) -> AogResult<()> {
        let key = ModelKey::new(&provider.provider_name, model_name);
        if self.models.is_exist(&key).await? {
            self.models.update_status(&key, status).await
        } else {
            self.models
                .add(Model {
                    id: Uuid::new_v4(),
                    provider_name: provider.provider_name.clone(),
                    model_name: model_name.to_string(),
                    service_name: provider.service_name.clone(),
                    service_source: provider.service_source,
                    status,
                    is_default: false,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .await
                .map(|_| ())
        }
    }
}
