//! OpenVINO Model Server admin adapter
//!
//! OVMS has no push admin API for models: the adapter mutates `config.json`
//! in the server's watched models directory, writes a per-model
//! `graph.pbtxt` chosen by service kind, then polls `ModelMetadata` until
//! the server reflects the change (inverse check for unload).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{MODEL_LOAD_TIMEOUT, MODEL_UNLOAD_TIMEOUT, ModelAdmin};
use crate::errors::{AogError, AogResult};

const METADATA_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The two config arrays OVMS watches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OvmsConfig {
    #[serde(default)]
    pub mediapipe_config_list: Vec<MediapipeEntry>,
    #[serde(default)]
    pub model_config_list: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediapipeEntry {
    pub name: String,
    pub base_path: String,
}

pub struct OvmsAdmin {
    client: reqwest::Client,
    base_url: String,
    models_dir: PathBuf,
}

impl OvmsAdmin {
    pub fn new(client: reqwest::Client, base_url: String, models_dir: PathBuf) -> Self {
        Self {
            client,
            base_url,
            models_dir,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.models_dir.join("config.json")
    }

    fn model_dir(&self, model: &str) -> PathBuf {
        self.models_dir.join(sanitize(model))
    }

    async fn read_config(&self) -> AogResult<OvmsConfig> {
        match tokio::fs::read(self.config_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AogError::internal(format!("config.json is corrupt: {e}"))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(OvmsConfig::default())
            }
            Err(error) => Err(AogError::internal(format!(
                "cannot read config.json: {error}"
            ))),
        }
    }

    /// Write via temp-file rename so the watching server never sees a
    /// truncated document.
    async fn write_config(&self, config: &OvmsConfig) -> AogResult<()> {
        let rendered = serde_json::to_vec_pretty(config)
            .map_err(|e| AogError::internal(format!("cannot render config.json: {e}")))?;
        let tmp = self.config_path().with_extension("json.tmp");
        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| AogError::internal(format!("cannot create models dir: {e}")))?;
        tokio::fs::write(&tmp, rendered)
            .await
            .map_err(|e| AogError::internal(format!("cannot write config.json: {e}")))?;
        tokio::fs::rename(&tmp, self.config_path())
            .await
            .map_err(|e| AogError::internal(format!("cannot replace config.json: {e}")))?;
        Ok(())
    }

    /// Emit `graph.pbtxt` from the per-service template and register the
    /// model in `config.json`. Shared by load and by post-download
    /// processing in the acquisition engine.
    pub async fn prepare_model(&self, model: &str, service: &str) -> AogResult<()> {
        let dir = self.model_dir(model);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AogError::internal(format!("cannot create model dir: {e}")))?;
        let graph = graph_template(service)
            .replace("{model}", model);
        tokio::fs::write(dir.join("graph.pbtxt"), graph)
            .await
            .map_err(|e| AogError::internal(format!("cannot write graph.pbtxt: {e}")))?;

        let mut config = self.read_config().await?;
        let entry = MediapipeEntry {
            name: model.to_string(),
            base_path: sanitize(model),
        };
        if !config.mediapipe_config_list.contains(&entry) {
            config.mediapipe_config_list.push(entry);
            self.write_config(&config).await?;
        }
        info!(model, service, "registered model with openvino model server");
        Ok(())
    }

    async fn deregister_model(&self, model: &str) -> AogResult<()> {
        let mut config = self.read_config().await?;
        let before = config.mediapipe_config_list.len();
        config.mediapipe_config_list.retain(|entry| entry.name != model);
        if config.mediapipe_config_list.len() != before {
            self.write_config(&config).await?;
        }
        Ok(())
    }

    /// KServe ModelMetadata endpoint; 200 means the server serves the model.
    async fn metadata_ready(&self, model: &str) -> bool {
        let url = format!(
            "{}/v2/models/{}",
            self.base_url.trim_end_matches('/'),
            model
        );
        match self.client.get(url).timeout(Duration::from_secs(3)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Poll until `want_loaded` matches what the server reports.
    async fn poll_metadata(
        &self,
        model: &str,
        want_loaded: bool,
        timeout: Duration,
        token: &CancellationToken,
    ) -> AogResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.metadata_ready(model).await == want_loaded {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AogError::ModelLoadTimeout {
                    model: model.to_string(),
                });
            }
            tokio::select! {
                _ = token.cancelled() => return Err(AogError::Cancelled),
                _ = tokio::time::sleep(METADATA_POLL_INTERVAL) => {}
            }
        }
    }

    /// Timeout-injectable variant used by tests; `load_model` passes the
    /// 5 minute default.
    pub async fn load_model_with_timeout(
        &self,
        model: &str,
        service: &str,
        timeout: Duration,
        token: &CancellationToken,
    ) -> AogResult<()> {
        self.prepare_model(model, service).await?;
        self.poll_metadata(model, true, timeout, token).await
    }

    pub async fn unload_model_with_timeout(
        &self,
        model: &str,
        timeout: Duration,
        token: &CancellationToken,
    ) -> AogResult<()> {
        self.deregister_model(model).await?;
        self.poll_metadata(model, false, timeout, token).await
    }
}

#[async_trait::async_trait]
impl ModelAdmin for OvmsAdmin {
    async fn list_models(&self) -> AogResult<Vec<String>> {
        let config = self.read_config().await?;
        Ok(config
            .mediapipe_config_list
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    async fn load_model(
        &self,
        model: &str,
        service: &str,
        token: &CancellationToken,
    ) -> AogResult<()> {
        debug!(model, service, "loading model into openvino model server");
        self.load_model_with_timeout(model, service, MODEL_LOAD_TIMEOUT, token)
            .await
    }

    async fn unload_model(&self, model: &str, token: &CancellationToken) -> AogResult<()> {
        debug!(model, "unloading model from openvino model server");
        self.unload_model_with_timeout(model, MODEL_UNLOAD_TIMEOUT, token)
            .await
    }

    async fn delete_model(&self, model: &str) -> AogResult<()> {
        self.deregister_model(model).await?;
        let dir = self.model_dir(model);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| AogError::internal(format!("cannot remove model dir: {e}")))?;
        }
        Ok(())
    }

    /// OVMS models are fetched from the model hub by the acquisition engine.
    async fn pull_model(
        &self,
        model: &str,
        _token: &CancellationToken,
    ) -> AogResult<crate::downloads::ProgressStream> {
        Err(AogError::ModelPullFailed {
            message: format!("'{model}' must be pulled through the model hub"),
        })
    }
}

/// Keep model directory names path-safe.
fn sanitize(model: &str) -> String {
    model
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect()
}

/// `graph.pbtxt` template per service kind.
fn graph_template(service: &str) -> &'static str {
    match service {
        "text-to-image" => {
            r#"input_stream: "HTTP_REQUEST_PAYLOAD:input"
output_stream: "HTTP_RESPONSE_PAYLOAD:output"
node {
  name: "ImageGenExecutor"
  calculator: "ImageGenCalculator"
  input_stream: "HTTP_REQUEST_PAYLOAD:input"
  output_stream: "HTTP_RESPONSE_PAYLOAD:output"
  node_options: {
    [type.googleapis.com / mediapipe.ImageGenCalculatorOptions]: {
      models_path: "./{model}"
    }
  }
}
"#
        }
        "speech-to-text" | "speech-to-text-ws" => {
            r#"input_stream: "HTTP_REQUEST_PAYLOAD:input"
output_stream: "HTTP_RESPONSE_PAYLOAD:output"
node {
  name: "SpeechToTextExecutor"
  calculator: "SpeechToTextCalculator"
  input_stream: "HTTP_REQUEST_PAYLOAD:input"
  output_stream: "HTTP_RESPONSE_PAYLOAD:output"
  node_options: {
    [type.googleapis.com / mediapipe.SpeechToTextCalculatorOptions]: {
      models_path: "./{model}"
    }
  }
}
"#
        }
        "text-to-speech" => {
            r#"input_stream: "HTTP_REQUEST_PAYLOAD:input"
output_stream: "HTTP_RESPONSE_PAYLOAD:output"
node {
  name: "TextToSpeechExecutor"
  calculator: "TextToSpeechCalculator"
  input_stream: "HTTP_REQUEST_PAYLOAD:input"
  output_stream: "HTTP_RESPONSE_PAYLOAD:output"
  node_options: {
    [type.googleapis.com / mediapipe.TextToSpeechCalculatorOptions]: {
      models_path: "./{model}"
    }
  }
}
"#
        }
        _ => {
            r#"input_stream: "HTTP_REQUEST_PAYLOAD:input"
output_stream: "HTTP_RESPONSE_PAYLOAD:output"
node: {
  name: "LLMExecutor"
  calculator: "HttpLLMCalculator"
  input_stream: "LOOPBACK:loopback"
  input_stream: "HTTP_REQUEST_PAYLOAD:input"
  output_stream: "LOOPBACK:loopback"
  output_stream: "HTTP_RESPONSE_PAYLOAD:output"
  node_options: {
    [type.googleapis.com / mediapipe.LLMCalculatorOptions]: {
      models_path: "./{model}"
    }
  }
}
"#
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn admin(dir: &Path) -> OvmsAdmin {
        OvmsAdmin::new(
            reqwest::Client::new(),
            // Nothing listens here; metadata polls will fail fast.
            "http://127.0.0.1:1".to_string(),
            dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn prepare_writes_graph_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        admin.prepare_model("stable-diffusion-v1-5", "text-to-image").await.unwrap();

        let graph = std::fs::read_to_string(
            dir.path().join("stable-diffusion-v1-5").join("graph.pbtxt"),
        )
        .unwrap();
        assert!(graph.contains("ImageGenCalculator"));
        assert!(graph.contains("./stable-diffusion-v1-5"));

        let config: OvmsConfig =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("config.json")).unwrap())
                .unwrap();
        assert_eq!(config.mediapipe_config_list.len(), 1);
        assert_eq!(config.mediapipe_config_list[0].name, "stable-diffusion-v1-5");

        // Idempotent: preparing again does not duplicate the entry.
        admin.prepare_model("stable-diffusion-v1-5", "text-to-image").await.unwrap();
        let config: OvmsConfig =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("config.json")).unwrap())
                .unwrap();
        assert_eq!(config.mediapipe_config_list.len(), 1);
    }

    #[tokio::test]
    async fn load_times_out_when_metadata_never_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let token = CancellationToken::new();
        let err = admin
            .load_model_with_timeout("m", "chat", Duration::from_millis(50), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AogError::ModelLoadTimeout { .. }));
    }

    #[tokio::test]
    async fn unload_returns_cleanly_when_model_absent() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let token = CancellationToken::new();
        // Nothing serves the model, so the inverse check passes immediately.
        admin
            .unload_model_with_timeout("m", Duration::from_secs(5), &token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_polling() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let err = admin
            .load_model_with_timeout("m", "chat", Duration::from_secs(60), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AogError::Cancelled));
    }
}
