//! Candidate selection for the `default` hybrid policy
//!
//! A request prefers remote when its effective payload size exceeds the
//! configured threshold or when it names a model only the remote side has;
//! ties break toward local (data locality). The decision is monotone in
//! payload size: growing a payload can only move it toward remote.

use serde_json::Value;

use crate::models::ServiceSource;

/// Inputs the preference rule looks at.
#[derive(Debug, Clone, Copy)]
pub struct PreferenceInputs {
    pub payload_bytes: usize,
    pub remote_payload_threshold: usize,
    /// The requested model exists remotely but not locally
    pub model_is_remote_only: bool,
}

/// The side the `default` policy tries first.
pub fn preferred_source(inputs: PreferenceInputs) -> ServiceSource {
    if inputs.model_is_remote_only {
        return ServiceSource::Remote;
    }
    if inputs.payload_bytes > inputs.remote_payload_threshold {
        return ServiceSource::Remote;
    }
    ServiceSource::Local
}

/// Effective payload size: serialized length of the request body, which
/// covers prompt bytes and inline attachments alike.
pub fn effective_payload_bytes(payload: &Value) -> usize {
    serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(payload_bytes: usize, remote_only: bool) -> PreferenceInputs {
        PreferenceInputs {
            payload_bytes,
            remote_payload_threshold: 1024,
            model_is_remote_only: remote_only,
        }
    }

    #[test]
    fn small_payloads_stay_local() {
        assert_eq!(preferred_source(inputs(10, false)), ServiceSource::Local);
        // Tie breaks toward local.
        assert_eq!(preferred_source(inputs(1024, false)), ServiceSource::Local);
    }

    #[test]
    fn growing_payload_never_flips_back_to_local() {
        let mut last_remote = false;
        for size in (0..10_000).step_by(100) {
            let remote = preferred_source(inputs(size, false)) == ServiceSource::Remote;
            assert!(!last_remote || remote, "decision flipped back at {size}");
            last_remote = remote;
        }
        assert!(last_remote);
    }

    #[test]
    fn remote_only_models_force_remote() {
        assert_eq!(preferred_source(inputs(1, true)), ServiceSource::Remote);
    }

    #[test]
    fn payload_bytes_include_attachments() {
        let small = effective_payload_bytes(&json!({"prompt": "hi"}));
        let big = effective_payload_bytes(&json!({"prompt": "hi", "image": "A".repeat(4096)}));
        assert!(big > small + 4000);
    }
}
