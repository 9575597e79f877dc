//! Web layer
//!
//! Inbound HTTP/WebSocket dispatch for the gateway. Thin handlers over the
//! service layer, one router mounted under the versioned base path, SSE for
//! streamed responses and CORS for the control panel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tracing::info;
use utoipa::OpenApi;

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod responses;

pub use responses::{ApiResponse, handle_result, ok};

use crate::config::Config;
use crate::database::repositories::Repositories;
use crate::downloads::AcquisitionEngine;
use crate::engine::EngineManager;
use crate::flavor::SharedFlavorRegistry;
use crate::plugins::PluginManager;
use crate::providers::ProviderRegistry;
use crate::scheduler::HybridScheduler;

/// Version segment of the served base path.
pub const SPEC_VERSION: &str = "v0.2";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub registry: ProviderRegistry,
    pub flavors: SharedFlavorRegistry,
    pub scheduler: HybridScheduler,
    pub engines: Arc<EngineManager>,
    pub downloads: AcquisitionEngine,
    pub plugins: PluginManager,
    pub client: reqwest::Client,
}

/// Build the full router mounted under `/aog/<spec_version>`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Health, version, update
        .route("/health", get(handlers::health::health))
        .route("/engine/health", get(handlers::health::engine_health))
        .route("/version", get(handlers::health::version))
        .route("/engine/version", get(handlers::health::engine_version))
        .route("/update/status", get(handlers::health::update_status))
        .route("/update", post(handlers::health::apply_update))
        // Service administration
        .route(
            "/service",
            get(handlers::service_admin::list_services)
                .put(handlers::service_admin::update_service),
        )
        .route("/service/install", post(handlers::service_admin::install_service))
        .route("/service/export", post(handlers::service_admin::export_services))
        .route("/service/import", post(handlers::service_admin::import_services))
        // Service providers
        .route(
            "/service_provider",
            get(handlers::providers::list_providers)
                .post(handlers::providers::create_provider)
                .put(handlers::providers::update_provider)
                .delete(handlers::providers::delete_provider),
        )
        // Models
        .route(
            "/model",
            get(handlers::models::list_models)
                .post(handlers::models::create_model)
                .delete(handlers::models::delete_model),
        )
        .route("/model/stream", post(handlers::models::stream_model))
        .route("/model/stream/cancel", post(handlers::models::cancel_model_stream))
        .route("/model/recommend", get(handlers::models::recommend_models))
        .route("/model/support", get(handlers::models::support_models))
        // Plugins (`load` and `download` are aliases)
        .route("/plugin/list", get(handlers::plugins::list_plugins))
        .route("/plugin/info", get(handlers::plugins::plugin_info))
        .route("/plugin/load", post(handlers::plugins::load_plugin))
        .route("/plugin/download", post(handlers::plugins::load_plugin))
        .route("/plugin/stop", post(handlers::plugins::stop_plugin))
        .route("/plugin/delete", delete(handlers::plugins::delete_plugin))
        // Control panel
        .route("/control_panel/", get(handlers::control_panel::index))
        .route("/control_panel", get(handlers::control_panel::index))
        .route("/control_panel/{*path}", get(handlers::control_panel::asset))
        // Inference dispatch
        .route("/services/models", get(handlers::services::list_service_models))
        .route(
            "/services/speech-to-text-ws",
            get(handlers::speech_ws::speech_to_text_ws),
        )
        .route("/services/{service}", post(handlers::services::invoke_service))
        // OpenAPI
        .route(
            "/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .with_state(state);

    Router::new()
        .nest(&format!("/aog/{SPEC_VERSION}"), api)
        .layer(CorsLayer::permissive())
}

/// Web server setup and lifecycle.
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!(
            "{}:{}",
            state.config.server.host, state.config.server.port
        )
        .parse()
        .context("invalid listen address")?;
        Ok(Self {
            app: build_router(state),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind, signal the outcome over `ready`, then serve until shutdown.
    pub async fn serve_with_signal(
        self,
        ready: tokio::sync::oneshot::Sender<Result<()>>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let listener = match tokio::net::TcpListener::bind(self.addr).await {
            Ok(listener) => {
                let _ = ready.send(Ok(()));
                listener
            }
            Err(error) => {
                let message = format!("failed to bind {}: {error}", self.addr);
                let _ = ready.send(Err(anyhow::anyhow!(message.clone())));
                anyhow::bail!(message);
            }
        };
        info!("gateway listening on http://{}/aog/{SPEC_VERSION}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("server error")
    }
}
