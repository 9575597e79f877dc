//! Host platform detection for engine installs
//!
//! Engine bundles are built per OS/distribution/version, so detection must
//! fail closed: an unrecognized Linux gets `ErrUnsupportedPlatform` rather
//! than a guessed bundle. Detection order on Linux: `/etc/os-release`,
//! `/etc/lsb-release`, then legacy release files.

use std::collections::HashMap;
use std::path::Path;

use crate::errors::{AogError, AogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    /// Accepted for non-download flows only
    MacOs,
    Ubuntu2204,
    Ubuntu2404,
    /// RHEL, CentOS Stream, Rocky, AlmaLinux — 9.x line
    Rhel9,
    Deepin,
}

impl Platform {
    /// Whether engine bundles can be downloaded for this platform.
    pub fn supports_download(&self) -> bool {
        !matches!(self, Platform::MacOs)
    }

    /// Bundle URL segment for this platform.
    pub fn bundle_tag(&self) -> &'static str {
        match self {
            Platform::Windows => "windows-amd64",
            Platform::MacOs => "darwin",
            Platform::Ubuntu2204 => "ubuntu-22.04",
            Platform::Ubuntu2404 => "ubuntu-24.04",
            Platform::Rhel9 => "rhel-9",
            Platform::Deepin => "deepin",
        }
    }
}

/// Detect the host platform, failing closed on unknown Linux.
pub fn detect() -> AogResult<Platform> {
    if cfg!(target_os = "windows") {
        return Ok(Platform::Windows);
    }
    if cfg!(target_os = "macos") {
        return Ok(Platform::MacOs);
    }
    if cfg!(target_os = "linux") {
        return detect_linux("/");
    }
    Err(AogError::UnsupportedPlatform {
        detail: std::env::consts::OS.to_string(),
    })
}

/// Linux detection rooted at `root` (injectable for tests).
pub fn detect_linux(root: impl AsRef<Path>) -> AogResult<Platform> {
    let root = root.as_ref();

    if let Ok(content) = std::fs::read_to_string(root.join("etc/os-release")) {
        let fields = parse_release_fields(&content);
        if let Some(platform) = classify(
            fields.get("ID").map(String::as_str),
            fields.get("VERSION_ID").map(String::as_str),
        ) {
            return Ok(platform);
        }
        return Err(AogError::UnsupportedPlatform {
            detail: format!(
                "linux id={} version={}",
                fields.get("ID").cloned().unwrap_or_default(),
                fields.get("VERSION_ID").cloned().unwrap_or_default()
            ),
        });
    }

    if let Ok(content) = std::fs::read_to_string(root.join("etc/lsb-release")) {
        let fields = parse_release_fields(&content);
        if let Some(platform) = classify(
            fields.get("DISTRIB_ID").map(|s| s.to_lowercase()).as_deref(),
            fields.get("DISTRIB_RELEASE").map(String::as_str),
        ) {
            return Ok(platform);
        }
    }

    // Legacy single-line release files.
    if let Ok(content) = std::fs::read_to_string(root.join("etc/redhat-release"))
        && content.contains(" 9.")
    {
        return Ok(Platform::Rhel9);
    }
    if root.join("etc/deepin-version").exists() {
        return Ok(Platform::Deepin);
    }

    Err(AogError::UnsupportedPlatform {
        detail: "unrecognized linux distribution".to_string(),
    })
}

fn classify(id: Option<&str>, version: Option<&str>) -> Option<Platform> {
    let id = id?;
    match id {
        "ubuntu" => match version {
            Some(v) if v.starts_with("22.04") => Some(Platform::Ubuntu2204),
            Some(v) if v.starts_with("24.04") => Some(Platform::Ubuntu2404),
            _ => None,
        },
        "rhel" | "centos" | "rocky" | "almalinux" => match version {
            Some(v) if v.starts_with('9') => Some(Platform::Rhel9),
            _ => None,
        },
        "deepin" | "Deepin" => Some(Platform::Deepin),
        _ => None,
    }
}

fn parse_release_fields(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_release(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn os_release_classifies_supported_distributions() {
        let dir = tempfile::tempdir().unwrap();
        write_release(
            dir.path(),
            "etc/os-release",
            "ID=ubuntu\nVERSION_ID=\"24.04\"\nNAME=\"Ubuntu\"\n",
        );
        assert_eq!(detect_linux(dir.path()).unwrap(), Platform::Ubuntu2404);
    }

    #[test]
    fn rhel_family_maps_to_rhel9() {
        let dir = tempfile::tempdir().unwrap();
        write_release(
            dir.path(),
            "etc/os-release",
            "ID=\"rocky\"\nVERSION_ID=\"9.4\"\n",
        );
        assert_eq!(detect_linux(dir.path()).unwrap(), Platform::Rhel9);
    }

    #[test]
    fn unknown_linux_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        write_release(dir.path(), "etc/os-release", "ID=arch\nVERSION_ID=rolling\n");
        assert!(matches!(
            detect_linux(dir.path()),
            Err(AogError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn legacy_release_files_are_the_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        write_release(
            dir.path(),
            "etc/redhat-release",
            "Red Hat Enterprise Linux release 9.3 (Plow)\n",
        );
        assert_eq!(detect_linux(dir.path()).unwrap(), Platform::Rhel9);

        let dir = tempfile::tempdir().unwrap();
        write_release(dir.path(), "etc/deepin-version", "23\n");
        assert_eq!(detect_linux(dir.path()).unwrap(), Platform::Deepin);
    }
}
