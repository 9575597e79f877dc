//! Plugin lifecycle handlers
//!
//! `/plugin/load` and `/plugin/download` are aliases: both resolve to
//! loading the named bundle from `plugins/<name>/`.

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::web::AppState;
use crate::web::responses::handle_result;

#[derive(Debug, Deserialize, IntoParams)]
pub struct PluginQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PluginRequest {
    pub name: String,
}

/// `GET /plugin/list`
pub async fn list_plugins(State(state): State<AppState>) -> Response {
    handle_result(state.plugins.list().await)
}

/// `GET /plugin/info?name=...`
pub async fn plugin_info(
    State(state): State<AppState>,
    Query(query): Query<PluginQuery>,
) -> Response {
    handle_result(state.plugins.info(&query.name).await)
}

/// `POST /plugin/load` (alias: `POST /plugin/download`)
pub async fn load_plugin(
    State(state): State<AppState>,
    Json(request): Json<PluginRequest>,
) -> Response {
    handle_result(state.plugins.load(&request.name).await)
}

/// `POST /plugin/stop`
pub async fn stop_plugin(
    State(state): State<AppState>,
    Json(request): Json<PluginRequest>,
) -> Response {
    handle_result(state.plugins.stop(&request.name).await)
}

/// `DELETE /plugin/delete`
pub async fn delete_plugin(
    State(state): State<AppState>,
    Json(request): Json<PluginRequest>,
) -> Response {
    handle_result(state.plugins.delete(&request.name).await)
}
