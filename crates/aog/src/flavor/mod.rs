//! Flavor registry
//!
//! Loads the embedded YAML templates at startup into an immutable map keyed
//! by (flavor, service). Lookups are total: a miss returns the shared
//! passthrough template. Reload builds a fresh registry and swaps the shared
//! reference atomically.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

pub mod template;

pub use template::{Chain, ConverterStep, FlavorDocument, FlavorTemplate, StepAction};

use crate::assets::FlavorAssets;
use crate::models::is_known_service;

/// Immutable template map built once per load.
#[derive(Debug)]
pub struct FlavorRegistry {
    templates: HashMap<(String, String), Arc<FlavorTemplate>>,
    passthrough: Arc<FlavorTemplate>,
}

impl FlavorRegistry {
    /// Parse every embedded flavor document.
    pub fn load_embedded() -> Result<Self> {
        let mut documents = Vec::new();
        for path in FlavorAssets::iter() {
            if !path.ends_with(".yaml") && !path.ends_with(".yml") {
                continue;
            }
            let file = FlavorAssets::get(&path)
                .with_context(|| format!("embedded flavor asset vanished: {path}"))?;
            let text = std::str::from_utf8(&file.data)
                .with_context(|| format!("flavor template {path} is not UTF-8"))?;
            let doc: FlavorDocument = serde_yaml::from_str(text)
                .with_context(|| format!("failed to parse flavor template {path}"))?;
            documents.push(doc);
        }
        Self::from_documents(documents)
    }

    /// Build a registry from already-parsed documents.
    ///
    /// Service keys must use the canonical hyphenated form; an underscore
    /// variant (`text_to_image`) is rejected at load.
    pub fn from_documents(documents: Vec<FlavorDocument>) -> Result<Self> {
        let mut templates = HashMap::new();
        for doc in documents {
            for (service, template) in doc.services {
                if !is_known_service(&service) {
                    if is_known_service(&service.replace('_', "-")) {
                        bail!(
                            "flavor '{}' declares service '{}': use the canonical \
                             hyphenated key '{}'",
                            doc.flavor,
                            service,
                            service.replace('_', "-")
                        );
                    }
                    bail!("flavor '{}' declares unknown service '{}'", doc.flavor, service);
                }
                debug!(flavor = %doc.flavor, service = %service, "registered flavor template");
                templates.insert((doc.flavor.clone(), service), Arc::new(template));
            }
        }
        info!("flavor registry loaded with {} templates", templates.len());
        Ok(Self {
            templates,
            passthrough: Arc::new(FlavorTemplate::default()),
        })
    }

    /// Total lookup: unknown pairs get the passthrough template.
    pub fn get(&self, flavor: &str, service: &str) -> Arc<FlavorTemplate> {
        self.templates
            .get(&(flavor.to_string(), service.to_string()))
            .cloned()
            .unwrap_or_else(|| self.passthrough.clone())
    }

    pub fn has(&self, flavor: &str, service: &str) -> bool {
        self.templates
            .contains_key(&(flavor.to_string(), service.to_string()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Shared handle over the current registry; cheap to clone.
#[derive(Clone)]
pub struct SharedFlavorRegistry {
    inner: Arc<RwLock<Arc<FlavorRegistry>>>,
}

impl SharedFlavorRegistry {
    pub fn load_embedded() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(FlavorRegistry::load_embedded()?))),
        })
    }

    pub fn from_documents(documents: Vec<FlavorDocument>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(FlavorRegistry::from_documents(
                documents,
            )?))),
        })
    }

    /// Snapshot of the current registry; safe for unsynchronized reads.
    pub fn current(&self) -> Arc<FlavorRegistry> {
        self.inner.read().expect("flavor registry lock poisoned").clone()
    }

    /// Build a fresh registry and swap it in atomically.
    pub fn reload(&self) -> Result<()> {
        let fresh = Arc::new(FlavorRegistry::load_embedded()?);
        *self.inner.write().expect("flavor registry lock poisoned") = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(flavor: &str, service: &str) -> FlavorDocument {
        let yaml = format!("flavor: {flavor}\nservices:\n  {service}: {{}}\n");
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn lookup_is_total_with_passthrough_fallback() {
        let registry = FlavorRegistry::from_documents(vec![doc("ollama", "chat")]).unwrap();
        assert!(registry.has("ollama", "chat"));
        let missing = registry.get("openai", "embed");
        assert!(missing.request_from_aog.is_passthrough());
        assert!(missing.response_to_aog.is_passthrough());
    }

    #[test]
    fn underscore_service_keys_are_rejected() {
        let err = FlavorRegistry::from_documents(vec![doc("openvino", "text_to_image")])
            .unwrap_err()
            .to_string();
        assert!(err.contains("text-to-image"), "unexpected error: {err}");
    }

    #[test]
    fn embedded_templates_parse() {
        let registry = FlavorRegistry::load_embedded().unwrap();
        assert!(registry.has("ollama", "chat"));
        assert!(registry.has("openai", "chat"));
        assert!(registry.has("openvino", "text-to-image"));
    }
}
