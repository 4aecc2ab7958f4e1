//! Deployment descriptors and where they come from.
//!
//! A descriptor lists what a unit provides (operations answered by named
//! routes) and what it consumes (operations its routes call). Schema
//! validation beyond what serde enforces is left to the manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the manager needs to build one deployment unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDescriptor {
    pub name: String,
    #[serde(default)]
    pub provides: Vec<ProvidesDescriptor>,
    #[serde(default)]
    pub consumes: Vec<ConsumesDescriptor>,
}

/// One provided endpoint and the operations routed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidesDescriptor {
    #[serde(default)]
    pub interface: Option<String>,
    pub service: String,
    pub endpoint: String,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    /// Short name (`InOut`) or WSDL 2004 URI.
    pub mep: String,
    /// Name of the route answering this operation.
    #[serde(default)]
    pub route: Option<String>,
    /// Forces outbound calls made by this route to block.
    #[serde(default)]
    pub synchronous: bool,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// One consumed operation, reachable from routes under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumesDescriptor {
    pub id: String,
    #[serde(default)]
    pub interface: Option<String>,
    pub service: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub mep: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub synchronous: bool,
}

impl UnitDescriptor {
    /// Parses a JSON descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid descriptor document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid unit descriptor")
    }
}

// ---------------------------------------------------------------------------
// DescriptorProvider
// ---------------------------------------------------------------------------

/// Source of unit descriptors.
#[async_trait]
pub trait DescriptorProvider: Send + Sync {
    /// Loads the descriptor of the unit named `unit`.
    async fn load(&self, unit: &str) -> anyhow::Result<UnitDescriptor>;
}

/// Reads `<root>/<unit>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryDescriptorProvider {
    root: PathBuf,
}

impl DirectoryDescriptorProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, unit: &str) -> PathBuf {
        self.root.join(format!("{unit}.json"))
    }
}

#[async_trait]
impl DescriptorProvider for DirectoryDescriptorProvider {
    async fn load(&self, unit: &str) -> anyhow::Result<UnitDescriptor> {
        let path = self.path_of(unit);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read descriptor {}", path.display()))?;
        let descriptor = UnitDescriptor::from_json(&json)
            .with_context(|| format!("in descriptor {}", path.display()))?;
        anyhow::ensure!(
            descriptor.name == unit,
            "descriptor {} names unit {}, expected {unit}",
            path.display(),
            descriptor.name
        );
        Ok(descriptor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"{
        "name": "su-hello",
        "provides": [{
            "interface": "{ns}HelloInterface",
            "service": "{ns}HelloService",
            "endpoint": "helloEndpoint",
            "operations": [
                { "name": "{ns}sayHello", "mep": "InOut", "route": "forward",
                  "properties": { "target": "${host}" } }
            ]
        }],
        "consumes": [{
            "id": "external",
            "service": "{ns}ExternalService",
            "endpoint": "externalEndpoint",
            "operation": "{ns}hello",
            "mep": "http://www.w3.org/2004/08/wsdl/in-out",
            "timeoutMs": 250,
            "synchronous": true
        }]
    }"#;

    #[test]
    fn parses_provides_and_consumes() {
        let descriptor = UnitDescriptor::from_json(HELLO).unwrap();
        assert_eq!(descriptor.name, "su-hello");

        let operation = &descriptor.provides[0].operations[0];
        assert_eq!(operation.route.as_deref(), Some("forward"));
        assert!(!operation.synchronous);
        assert_eq!(operation.properties["target"], "${host}");

        let consumes = &descriptor.consumes[0];
        assert_eq!(consumes.timeout_ms, Some(250));
        assert!(consumes.synchronous);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let descriptor = UnitDescriptor::from_json(r#"{ "name": "empty" }"#).unwrap();
        assert!(descriptor.provides.is_empty());
        assert!(descriptor.consumes.is_empty());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(UnitDescriptor::from_json("{ not json").is_err());
    }

    #[tokio::test]
    async fn directory_provider_reads_unit_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("su-hello.json"), HELLO).unwrap();
        let provider = DirectoryDescriptorProvider::new(dir.path());

        let descriptor = provider.load("su-hello").await.unwrap();
        assert_eq!(descriptor.provides.len(), 1);
        assert!(provider.load("absent").await.is_err());
    }

    #[tokio::test]
    async fn directory_provider_rejects_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.json"), HELLO).unwrap();
        let provider = DirectoryDescriptorProvider::new(dir.path());

        let err = provider.load("other").await.unwrap_err();
        assert!(err.to_string().contains("expected other"));
    }
}
