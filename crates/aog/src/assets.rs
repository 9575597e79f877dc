use rust_embed::RustEmbed;

/// Embedded flavor translation templates (YAML, one document per flavor)
#[derive(RustEmbed)]
#[folder = "flavors/"]
#[prefix = "flavors/"]
pub struct FlavorAssets;

/// Embedded control panel assets (HTML, CSS, JS)
#[derive(RustEmbed)]
#[folder = "control_panel/"]
#[prefix = "control_panel/"]
pub struct ControlPanelAssets;

impl ControlPanelAssets {
    pub fn get_asset(path: &str) -> Option<rust_embed::EmbeddedFile> {
        Self::get(path)
    }

    pub fn get_content_type(path: &str) -> &'static str {
        match path.split('.').next_back() {
            Some("html") => "text/html; charset=utf-8",
            Some("css") => "text/css; charset=utf-8",
            Some("js") => "application/javascript; charset=utf-8",
            Some("json") => "application/json; charset=utf-8",
            Some("png") => "image/png",
            Some("svg") => "image/svg+xml; charset=utf-8",
            Some("ico") => "image/x-icon",
            _ => "application/octet-stream",
        }
    }
}

/// Embedded recommended/supported model catalogue
pub const SUPPORT_MODELS: &str = include_str!("../catalogue/support_models.json");
