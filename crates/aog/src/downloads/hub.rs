//! Model hub client and resumable file transfer
//!
//! The hub is content-addressed: every file in a model's manifest carries
//! its SHA-256 and size. Transfers append to whatever is already on disk
//! (HTTP Range), keep a running digest, and verify at the end; a 60 s
//! inactivity gap restarts the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{AogError, AogResult};

/// Bounded number of inactivity restarts before the file is abandoned.
const MAX_INACTIVITY_RESTARTS: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct HubFile {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Deserialize)]
struct HubTree {
    files: Vec<HubFile>,
}

#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Recursive file list for a model, with tree nodes and VCS metadata
    /// filtered out and files sorted descending by size so dashboards see
    /// meaningful early progress.
    pub async fn list_files(&self, model: &str) -> AogResult<Vec<HubFile>> {
        let url = format!(
            "{}/api/v1/models/{model}/tree?recursive=true",
            self.base_url.trim_end_matches('/')
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AogError::ModelPullFailed {
                message: format!("hub manifest for '{model}' returned {}", response.status()),
            });
        }
        let tree: HubTree = response.json().await?;
        let mut files: Vec<HubFile> = tree
            .files
            .into_iter()
            .filter(|file| {
                file.kind != "tree"
                    && !file.path.starts_with(".git")
                    && !file.path.contains("/.git")
            })
            .collect();
        files.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(files)
    }

    pub fn file_url(&self, model: &str, path: &str) -> String {
        format!(
            "{}/api/v1/models/{model}/resolve/{path}",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Transfer one file to `dest`, resuming from its current length.
    /// `on_progress(completed)` fires after every chunk write.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        file: &HubFile,
        inactivity_timeout: Duration,
        token: &CancellationToken,
        mut on_progress: impl FnMut(u64) + Send,
    ) -> AogResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| pull_err(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut digest_retry_used = false;
        let mut inactivity_restarts = 0u32;
        loop {
            match self
                .attempt(url, dest, file, inactivity_timeout, token, &mut on_progress)
                .await?
            {
                Attempt::Done => return Ok(()),
                Attempt::DigestMismatch => {
                    if digest_retry_used {
                        return Err(pull_err(format!(
                            "digest mismatch for '{}' after retry",
                            file.path
                        )));
                    }
                    warn!(file = %file.path, "digest mismatch; deleting and retrying once");
                    digest_retry_used = true;
                    let _ = tokio::fs::remove_file(dest).await;
                }
                Attempt::Inactive => {
                    inactivity_restarts += 1;
                    if inactivity_restarts > MAX_INACTIVITY_RESTARTS {
                        return Err(pull_err(format!(
                            "'{}' stalled {inactivity_restarts} times",
                            file.path
                        )));
                    }
                    warn!(file = %file.path, "no progress for 60s; restarting file");
                    let _ = tokio::fs::remove_file(dest).await;
                }
                Attempt::Incomplete => {
                    // Connection dropped mid-body; the partial bytes are good,
                    // so resume rather than restart.
                    inactivity_restarts += 1;
                    if inactivity_restarts > MAX_INACTIVITY_RESTARTS {
                        return Err(pull_err(format!(
                            "'{}' kept disconnecting",
                            file.path
                        )));
                    }
                    debug!(file = %file.path, "body ended early; resuming from current offset");
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        file: &HubFile,
        inactivity_timeout: Duration,
        token: &CancellationToken,
        on_progress: &mut (impl FnMut(u64) + Send),
    ) -> AogResult<Attempt> {
        let mut hasher = Sha256::new();
        let mut completed = hash_existing(dest, &mut hasher).await?;

        // Enough bytes on disk already: verify instead of transferring.
        if completed >= file.size && file.size > 0 {
            if digest_matches(hasher.finalize_reset().as_slice(), &file.sha256) {
                debug!(file = %file.path, "already complete; verified and skipped");
                on_progress(file.size);
                return Ok(Attempt::Done);
            }
            return Ok(Attempt::DigestMismatch);
        }

        let mut request = self.client.get(url);
        if completed > 0 {
            request = request.header("Range", format!("bytes={completed}-"));
        }
        let response = tokio::select! {
            _ = token.cancelled() => return Err(AogError::Cancelled),
            response = request.send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(pull_err(format!(
                "'{}' download returned {status}",
                file.path
            )));
        }

        // Server ignored the Range request: start the file over.
        let mut options = tokio::fs::OpenOptions::new();
        if completed > 0 && status.as_u16() == 200 {
            debug!(file = %file.path, "server ignored range; restarting from zero");
            completed = 0;
            hasher = Sha256::new();
            options.create(true).write(true).truncate(true);
        } else {
            options.create(true).append(true);
        }
        let mut out = options
            .open(dest)
            .await
            .map_err(|e| pull_err(format!("cannot open '{}': {e}", dest.display())))?;

        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(AogError::Cancelled),
                next = tokio::time::timeout(inactivity_timeout, body.next()) => next,
            };
            match next {
                Err(_) => return Ok(Attempt::Inactive),
                Ok(None) => break,
                Ok(Some(Err(error))) => return Err(AogError::from(error)),
                Ok(Some(Ok(chunk))) => {
                    out.write_all(&chunk)
                        .await
                        .map_err(|e| pull_err(format!("write failed: {e}")))?;
                    hasher.update(&chunk);
                    completed += chunk.len() as u64;
                    on_progress(completed);
                }
            }
        }
        out.flush()
            .await
            .map_err(|e| pull_err(format!("flush failed: {e}")))?;

        if completed < file.size {
            return Ok(Attempt::Incomplete);
        }

        // Running digest first; recompute from disk before declaring a
        // mismatch.
        if digest_matches(hasher.finalize().as_slice(), &file.sha256) {
            return Ok(Attempt::Done);
        }
        let mut recompute = Sha256::new();
        hash_existing(dest, &mut recompute).await?;
        if digest_matches(recompute.finalize().as_slice(), &file.sha256) {
            return Ok(Attempt::Done);
        }
        Ok(Attempt::DigestMismatch)
    }
}

enum Attempt {
    Done,
    DigestMismatch,
    Inactive,
    Incomplete,
}

/// Feed whatever is on disk into the running hasher; returns its length.
async fn hash_existing(path: &Path, hasher: &mut Sha256) -> AogResult<u64> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(pull_err(format!("cannot read partial file: {error}"))),
    };
    let mut total = 0u64;
    let mut buffer = vec![0u8; 256 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| pull_err(format!("cannot hash partial file: {e}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok(total)
}

fn digest_matches(digest: &[u8], expected: &str) -> bool {
    if expected.is_empty() {
        // Manifest without a digest: size check is all we have.
        return true;
    }
    hex::encode(digest).eq_ignore_ascii_case(expected.trim())
}

fn pull_err(message: String) -> AogError {
    AogError::ModelPullFailed { message }
}

/// Destination path of one manifest file under the model directory.
pub fn dest_path(models_dir: &Path, model: &str, file_path: &str) -> PathBuf {
    let safe_model: String = model
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    models_dir.join(safe_model).join(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_filtering_and_ordering() {
        let mut files = vec![
            HubFile {
                path: "weights.bin".into(),
                kind: "blob".into(),
                size: 100,
                sha256: "aa".into(),
            },
            HubFile {
                path: ".gitattributes".into(),
                kind: "blob".into(),
                size: 5,
                sha256: "bb".into(),
            },
            HubFile {
                path: "sub".into(),
                kind: "tree".into(),
                size: 0,
                sha256: String::new(),
            },
            HubFile {
                path: "tokenizer.json".into(),
                kind: "blob".into(),
                size: 900,
                sha256: "cc".into(),
            },
        ];
        files.retain(|file| {
            file.kind != "tree"
                && !file.path.starts_with(".git")
                && !file.path.contains("/.git")
        });
        files.sort_by(|a, b| b.size.cmp(&a.size));
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["tokenizer.json", "weights.bin"]);
    }

    #[test]
    fn digest_comparison_is_case_insensitive() {
        let digest = Sha256::digest(b"abc");
        let hex_digest = hex::encode(digest);
        assert!(digest_matches(digest.as_slice(), &hex_digest.to_uppercase()));
        assert!(!digest_matches(digest.as_slice(), "deadbeef"));
        assert!(digest_matches(digest.as_slice(), ""));
    }

    #[test]
    fn model_names_are_path_safe() {
        let dest = dest_path(Path::new("/models"), "org/model:7b", "weights.bin");
        assert_eq!(dest, Path::new("/models/org_model_7b/weights.bin"));
    }
}
