//! Declarative flavor template types
//!
//! One YAML document per flavor declares, per service, the upstream endpoint
//! and the six conversion chains. The chains are data; the translation
//! pipeline interprets them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::AuthType;

/// A whole flavor document: `(flavor) → service key → template`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlavorDocument {
    pub flavor: String,
    #[serde(default)]
    pub services: HashMap<String, FlavorTemplate>,
}

/// Translation template for one (flavor, service) pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlavorTemplate {
    /// Upstream endpoint; empty for local engines resolved at dispatch time
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Model used when the request names none
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub request_to_aog: Chain,
    #[serde(default)]
    pub request_from_aog: Chain,
    #[serde(default)]
    pub response_to_aog: Chain,
    #[serde(default)]
    pub response_from_aog: Chain,
    #[serde(default)]
    pub stream_response_to_aog: Chain,
    #[serde(default)]
    pub stream_response_from_aog: Chain,
}

fn default_method() -> String {
    "POST".to_string()
}

/// An ordered list of converter steps plus terminal frames for streams.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chain {
    #[serde(default)]
    pub steps: Vec<ConverterStep>,
    /// Frames emitted after upstream closes, in order; they are the stream's
    /// terminators (e.g. a trailing sentinel line)
    #[serde(default)]
    pub epilogue: Vec<Value>,
}

impl Chain {
    pub fn is_passthrough(&self) -> bool {
        self.steps.is_empty() && self.epilogue.is_empty()
    }
}

/// A single converter step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConverterStep {
    /// Apply a transform expression; output replaces input
    Jsonata { expression: String },
    /// Mutate the ambient header map carried alongside the payload
    Header {
        #[serde(default)]
        set: HashMap<String, String>,
        #[serde(default)]
        remove: Vec<String>,
    },
    /// Match the (optionally trimmed) payload against a literal pattern
    ActionIf {
        pattern: String,
        #[serde(default)]
        trim: bool,
        action: StepAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Drop,
    Keep,
}
