//! Default values for configuration fields

use std::path::PathBuf;

pub fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_port() -> u16 {
    16688
}

pub fn default_log_level() -> String {
    "info".to_string()
}

/// Root directory for engines, downloads, plugins and logs.
///
/// `$HOME/.aog` when a home directory is known, `./.aog` otherwise.
pub fn default_root_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".aog"))
        .unwrap_or_else(|| PathBuf::from(".aog"))
}

/// Payload size above which the default hybrid policy prefers remote.
pub fn default_remote_payload_threshold() -> usize {
    512 * 1024
}

pub fn default_model_hub_url() -> String {
    "https://hub.aogdev.net".to_string()
}

/// Seconds without download progress before a file transfer is restarted.
pub fn default_download_inactivity_secs() -> u64 {
    60
}

/// Bounded frames buffered per progress subscriber before drop-oldest kicks in.
pub fn default_subscriber_buffer() -> usize {
    64
}
