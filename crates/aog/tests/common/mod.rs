//! Shared fixtures for gateway integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use tempfile::TempDir;

use aog::{
    config::Config,
    database::{Database, repositories::Repositories},
    downloads::AcquisitionEngine,
    engine::EngineManager,
    flavor::SharedFlavorRegistry,
    plugins::PluginManager,
    providers::{ProviderRegistry, TransportFactory},
    scheduler::HybridScheduler,
    web::AppState,
};

/// Fully wired application state over an in-memory database and a temp
/// filesystem root.
pub async fn test_state() -> (TempDir, AppState) {
    let root = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.storage.root_dir = root.path().to_path_buf();
    config.database.url = "sqlite::memory:".to_string();
    config.ensure_layout().await.expect("layout");

    let database = Database::new(&config.database_url()).await.expect("database");
    database.migrate().await.expect("migrate");
    let repos = Repositories::new(database.connection());

    let client = reqwest::Client::new();
    let engines = Arc::new(EngineManager::new(config.clone(), client.clone()));
    let registry = ProviderRegistry::new(repos.providers.clone());
    registry.hydrate().await.expect("hydrate");
    let transports = TransportFactory::new(client.clone(), engines.clone());
    let flavors = SharedFlavorRegistry::load_embedded().expect("flavors");
    let downloads =
        AcquisitionEngine::new(&config, client.clone(), repos.models.clone(), engines.clone());
    let scheduler = HybridScheduler::new(
        repos.clone(),
        registry.clone(),
        flavors.clone(),
        transports,
        config.scheduler.remote_payload_threshold,
    );
    let plugins = PluginManager::new(config.plugins_dir());

    let state = AppState {
        config,
        repos,
        registry,
        flavors,
        scheduler,
        engines,
        downloads,
        plugins,
        client,
    };
    (root, state)
}

/// Serve `router` on an ephemeral loopback port; returns its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// A minimal OpenAI-compatible chat upstream that counts requests.
pub fn openai_chat_upstream(counter: Arc<AtomicUsize>) -> Router {
    async fn chat(State(counter): State<Arc<AtomicUsize>>, Json(body): Json<Value>) -> Json<Value> {
        counter.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "model": body["model"],
            "choices": [{
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }]
        }))
    }
    Router::new()
        .route("/v1/chat/completions", post(chat))
        .route(
            "/",
            axum::routing::get(|| async { Json(json!({"status": "ok"})) }),
        )
        .with_state(counter)
}
