//! Per-service request middleware
//!
//! A short ordered chain keyed by service, run before the scheduler sees the
//! payload. `text-to-image` rewrites image references to match the side the
//! request is headed for; `chat` and `speech-to-text` are pass-throughs.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{AogError, AogResult};
use crate::models::ServiceSource;

/// Apply the middleware chain for `service_name` in place.
pub async fn preprocess(
    service_name: &str,
    payload: &mut Value,
    target: ServiceSource,
    download_dir: &Path,
    client: &reqwest::Client,
) -> AogResult<()> {
    match service_name {
        "text-to-image" => rewrite_image_input(payload, target, download_dir, client).await,
        // Pass-through placeholders; these services need no rewriting today.
        "chat" | "speech-to-text" => Ok(()),
        _ => Ok(()),
    }
}

/// `image_type=path` toward remote: inline the file as base64.
/// `image_type=url` toward local: fetch into the download directory and
/// rewrite to the local path.
async fn rewrite_image_input(
    payload: &mut Value,
    target: ServiceSource,
    download_dir: &Path,
    client: &reqwest::Client,
) -> AogResult<()> {
    let image_type = payload
        .get("image_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let image = payload
        .get("image")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if image.is_empty() {
        return Ok(());
    }

    match (image_type.as_str(), target) {
        ("path", ServiceSource::Remote) => {
            let bytes = tokio::fs::read(&image).await.map_err(|e| {
                AogError::bad_request(format!("cannot read image '{image}': {e}"))
            })?;
            payload["image"] = Value::String(BASE64.encode(bytes));
            payload["image_type"] = Value::String("b64".to_string());
            debug!(path = %image, "inlined local image for remote provider");
        }
        ("url", ServiceSource::Local) => {
            let response = client.get(&image).send().await?;
            if !response.status().is_success() {
                return Err(AogError::bad_request(format!(
                    "image url '{image}' returned {}",
                    response.status()
                )));
            }
            let bytes = response.bytes().await?;
            tokio::fs::create_dir_all(download_dir)
                .await
                .map_err(|e| AogError::internal(format!("cannot create download dir: {e}")))?;
            let file_name = format!("image-{}.bin", Uuid::new_v4());
            let dest = download_dir.join(file_name);
            tokio::fs::write(&dest, &bytes)
                .await
                .map_err(|e| AogError::internal(format!("cannot store fetched image: {e}")))?;
            payload["image"] = Value::String(dest.display().to_string());
            payload["image_type"] = Value::String("path".to_string());
            debug!(url = %image, dest = %dest.display(), "fetched remote image for local provider");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn local_path_is_inlined_for_remote_target() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cat.png");
        tokio::fs::write(&image, b"pngbytes").await.unwrap();

        let mut payload = json!({
            "prompt": "a cat",
            "image_type": "path",
            "image": image.display().to_string(),
        });
        preprocess(
            "text-to-image",
            &mut payload,
            ServiceSource::Remote,
            dir.path(),
            &reqwest::Client::new(),
        )
        .await
        .unwrap();

        assert_eq!(payload["image_type"], "b64");
        assert_eq!(payload["image"], BASE64.encode(b"pngbytes"));
    }

    #[tokio::test]
    async fn other_services_pass_through_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = json!({"messages": [{"role": "user", "content": "hi"}]});
        let before = payload.clone();
        preprocess(
            "chat",
            &mut payload,
            ServiceSource::Local,
            dir.path(),
            &reqwest::Client::new(),
        )
        .await
        .unwrap();
        assert_eq!(payload, before);
    }

    #[tokio::test]
    async fn missing_image_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = json!({"prompt": "a cat"});
        preprocess(
            "text-to-image",
            &mut payload,
            ServiceSource::Remote,
            dir.path(),
            &reqwest::Client::new(),
        )
        .await
        .unwrap();
        assert_eq!(payload, json!({"prompt": "a cat"}));
    }
}
