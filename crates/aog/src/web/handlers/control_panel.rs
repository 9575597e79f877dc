//! Embedded control panel assets

use axum::{
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::assets::ControlPanelAssets;

/// `GET /control_panel/`
pub async fn index() -> Response {
    serve("index.html")
}

/// `GET /control_panel/{*path}`
pub async fn asset(Path(path): Path<String>) -> Response {
    serve(path.trim_start_matches('/'))
}

fn serve(path: &str) -> Response {
    let path = if path.is_empty() { "index.html" } else { path };
    let full = format!("control_panel/{path}");
    match ControlPanelAssets::get_asset(&full) {
        Some(file) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                ControlPanelAssets::get_content_type(path),
            )],
            file.data.into_owned(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}
