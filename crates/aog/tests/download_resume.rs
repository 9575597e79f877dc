//! Resumable, verified model acquisition against a mock hub

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use futures_util::StreamExt;
use serde_json::json;
use sha2::{Digest, Sha256};

use aog::database::repositories::DataStore;
use aog::downloads::AcquisitionEngine;
use aog::models::{
    AuthType, ModelStatus, ProviderScope, ProviderStatus, ServiceProvider, ServiceSource,
};

const FILE_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
struct HubState {
    payload: Arc<Vec<u8>>,
    sha256: String,
    served_bytes: Arc<AtomicU64>,
    resolve_calls: Arc<AtomicU64>,
    last_range: Arc<std::sync::Mutex<Option<String>>>,
    /// When set, the first full read is served with one flipped bit
    corrupt_once: Arc<AtomicBool>,
}

impl HubState {
    fn new(corrupt_once: bool) -> Self {
        let payload: Vec<u8> = (0..FILE_SIZE).map(|i| (i % 251) as u8).collect();
        let sha256 = hex::encode(Sha256::digest(&payload));
        Self {
            payload: Arc::new(payload),
            sha256,
            served_bytes: Arc::new(AtomicU64::new(0)),
            resolve_calls: Arc::new(AtomicU64::new(0)),
            last_range: Arc::new(std::sync::Mutex::new(None)),
            corrupt_once: Arc::new(AtomicBool::new(corrupt_once)),
        }
    }

    fn router(&self) -> Router {
        async fn tree(State(state): State<HubState>) -> impl IntoResponse {
            axum::Json(json!({
                "files": [
                    {"path": "weights.bin", "type": "blob", "size": FILE_SIZE,
                     "sha256": state.sha256},
                    {"path": ".gitattributes", "type": "blob", "size": 10, "sha256": ""},
                    {"path": "sub", "type": "tree", "size": 0, "sha256": ""},
                ]
            }))
        }

        async fn resolve(
            State(state): State<HubState>,
            Path((_model, path)): Path<(String, String)>,
            headers: HeaderMap,
        ) -> impl IntoResponse {
            assert_eq!(path, "weights.bin", "only weights.bin should be fetched");
            state.resolve_calls.fetch_add(1, Ordering::SeqCst);

            let range = headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *state.last_range.lock().unwrap() = range.clone();

            let start = range
                .as_deref()
                .and_then(|r| r.strip_prefix("bytes="))
                .and_then(|r| r.strip_suffix('-'))
                .and_then(|r| r.parse::<usize>().ok())
                .unwrap_or(0);

            let mut body = state.payload[start..].to_vec();
            if state.corrupt_once.swap(false, Ordering::SeqCst)
                && let Some(byte) = body.get_mut(500 * 1024)
            {
                *byte ^= 0x01;
            }
            state.served_bytes.fetch_add(body.len() as u64, Ordering::SeqCst);

            let status = if start > 0 {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            (status, body)
        }

        Router::new()
            .route("/api/v1/models/{model}/tree", get(tree))
            .route("/api/v1/models/{model}/resolve/{*path}", get(resolve))
            .with_state(self.clone())
    }
}

fn hub_provider() -> ServiceProvider {
    ServiceProvider {
        provider_name: "local_openvino_text-to-image".into(),
        service_name: "text-to-image".into(),
        service_source: ServiceSource::Local,
        flavor: "openvino".into(),
        desc: String::new(),
        method: "POST".into(),
        url: String::new(),
        auth_type: AuthType::None,
        auth_key: String::new(),
        extra_headers: String::new(),
        extra_body: String::new(),
        properties: String::new(),
        status: ProviderStatus::Unknown,
        scope: ProviderScope::System,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

async fn engine_for(state: &aog::web::AppState, hub_url: String) -> AcquisitionEngine {
    let mut config = state.config.clone();
    config.download.model_hub_url = hub_url;
    AcquisitionEngine::new(
        &config,
        state.client.clone(),
        state.repos.models.clone(),
        state.engines.clone(),
    )
}

#[tokio::test]
async fn resumed_pull_fetches_only_the_remainder() {
    let (_root, state) = common::test_state().await;
    let hub = HubState::new(false);
    let hub_url = common::spawn_upstream(hub.router()).await;
    let downloads = engine_for(&state, hub_url).await;

    // Pre-seed a correct 600 KiB prefix, as if a previous pull was
    // interrupted.
    let resume_at = 600 * 1024;
    let dest = state
        .config
        .openvino_models_dir()
        .join("sd-test")
        .join("weights.bin");
    tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
    tokio::fs::write(&dest, &hub.payload[..resume_at]).await.unwrap();

    let subscription = downloads.pull(hub_provider(), "sd-test").await.unwrap();
    let frames: Vec<_> = subscription.into_stream().collect().await;

    // Terminal success, monotone byte counter.
    assert_eq!(frames.last().unwrap().status, "success");
    let completed: Vec<u64> = frames.iter().filter_map(|f| f.completed).collect();
    assert!(completed.windows(2).all(|w| w[0] <= w[1]), "byte counter went backwards");
    assert_eq!(*completed.last().unwrap() as usize, FILE_SIZE);

    // The hub served only the remainder and saw the right Range request.
    assert_eq!(
        hub.served_bytes.load(Ordering::SeqCst) as usize,
        FILE_SIZE - resume_at
    );
    assert_eq!(
        hub.last_range.lock().unwrap().as_deref(),
        Some(format!("bytes={resume_at}-").as_str())
    );

    // File content verified on disk.
    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(hex::encode(Sha256::digest(&written)), hub.sha256);

    // Model record landed in `downloaded`.
    let record = state
        .repos
        .models
        .get(&aog::database::repositories::ModelKey::new(
            "local_openvino_text-to-image",
            "sd-test",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ModelStatus::Downloaded);

    // OpenVINO post-processing ran: graph plus config registration.
    assert!(
        state
            .config
            .openvino_models_dir()
            .join("sd-test")
            .join("graph.pbtxt")
            .exists()
    );
}

#[tokio::test]
async fn digest_mismatch_retries_the_file_exactly_once() {
    let (_root, state) = common::test_state().await;
    let hub = HubState::new(true);
    let hub_url = common::spawn_upstream(hub.router()).await;
    let downloads = engine_for(&state, hub_url).await;

    let subscription = downloads.pull(hub_provider(), "sd-corrupt").await.unwrap();
    let frames: Vec<_> = subscription.into_stream().collect().await;

    assert_eq!(frames.last().unwrap().status, "success");
    // First transfer was corrupted, second was clean: exactly two fetches.
    assert_eq!(hub.resolve_calls.load(Ordering::SeqCst), 2);

    let dest = state
        .config
        .openvino_models_dir()
        .join("sd-corrupt")
        .join("weights.bin");
    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(hex::encode(Sha256::digest(&written)), hub.sha256);
}

#[tokio::test]
async fn cancelled_pull_ends_every_subscriber_with_one_terminal_frame() {
    let (_root, state) = common::test_state().await;

    // A hub that stalls forever after the manifest, so the pull is live
    // until cancelled.
    async fn tree() -> impl IntoResponse {
        axum::Json(json!({
            "files": [{"path": "weights.bin", "type": "blob",
                        "size": 1024 * 1024, "sha256": "00"}]
        }))
    }
    async fn resolve() -> impl IntoResponse {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        StatusCode::OK
    }
    let router = Router::new()
        .route("/api/v1/models/{model}/tree", get(tree))
        .route("/api/v1/models/{model}/resolve/{*path}", get(resolve));
    let hub_url = common::spawn_upstream(router).await;
    let downloads = engine_for(&state, hub_url).await;

    let first = downloads.pull(hub_provider(), "sd-cancel").await.unwrap();
    // A second pull for the same model joins the same job.
    let second = downloads.pull(hub_provider(), "sd-cancel").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(downloads.cancel("sd-cancel").await);
    // Cancel is idempotent.
    downloads.cancel("sd-cancel").await;

    for subscription in [first, second] {
        let frames: Vec<_> = subscription.into_stream().collect().await;
        let terminal: Vec<_> = frames.iter().filter(|f| f.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, "cancelled");
    }

    // Never `downloaded` after a cancel.
    let record = state
        .repos
        .models
        .get(&aog::database::repositories::ModelKey::new(
            "local_openvino_text-to-image",
            "sd-cancel",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(record.status, ModelStatus::Downloaded);
}
