//! Templates and the static catalog the factory resolves names against.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;

/// A compiled definition used to publish new instances or type-bind existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub bytecode: Bytes,
}

impl Template {
    pub fn new(name: impl Into<String>, bytecode: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytecode: bytecode.into(),
        }
    }
}

/// Compiler output either as a bare hex string or as `{ "object": "0x.." }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(Bytes),
    Object { object: Bytes },
}

/// The subset of a compiler artifact file the catalog reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    bytecode: ArtifactBytecode,
}

/// Known templates, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Arc<Template>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, replacing any previous one with the same name.
    pub fn insert(&mut self, template: Template) {
        self.templates
            .insert(template.name.clone(), Arc::new(template));
    }

    /// Builder-style [`TemplateCatalog::insert`].
    pub fn with(mut self, template: Template) -> Self {
        self.insert(template);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every `*.json` compiler artifact under `dir` (recursively).
    ///
    /// The template name is the artifact's `contractName`, or the file stem when absent.
    /// Files without a `bytecode` field (ABI-only outputs, build info) are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current)
                .context(format!("Failed to read artifacts directory {}", current.display()))?;

            for entry in entries {
                let path = entry.context("Failed to read directory entry")?.path();

                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                let content = std::fs::read_to_string(&path)
                    .context(format!("Failed to read artifact {}", path.display()))?;

                let artifact: ArtifactFile = match serde_json::from_str(&content) {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Skipping non-artifact JSON file");
                        continue;
                    }
                };

                let name = match artifact.contract_name {
                    Some(name) => name,
                    None => path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .context(format!("Invalid artifact file name {}", path.display()))?
                        .to_string(),
                };

                let bytecode = match artifact.bytecode {
                    ArtifactBytecode::Hex(bytes) | ArtifactBytecode::Object { object: bytes } => {
                        bytes
                    }
                };

                tracing::trace!(template = %name, path = %path.display(), "Loaded template");
                catalog.insert(Template::new(name, bytecode));
            }
        }

        tracing::debug!(dir = %dir.display(), templates = catalog.len(), "Loaded template catalog");
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_insert_and_get() {
        let catalog = TemplateCatalog::new()
            .with(Template::new("Token", vec![0x60, 0x80]))
            .with(Template::new("Treasury", vec![0x60, 0x40]));

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("Token"));
        assert_eq!(catalog.get("Treasury").unwrap().bytecode.len(), 2);
        assert!(catalog.get("Missing").is_none());
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Token", "Treasury"]);
    }

    #[test]
    fn test_load_dir_reads_both_bytecode_shapes() {
        let temp_dir = TempDir::new("hatchery-test").expect("Failed to create temp dir");
        let nested = temp_dir.path().join("Treasury.sol");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(
            temp_dir.path().join("Token.json"),
            r#"{ "contractName": "Token", "abi": [], "bytecode": "0x6080" }"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("Treasury.json"),
            r#"{ "abi": [], "bytecode": { "object": "0x6040" } }"#,
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("build-info.json"), r#"{ "id": "x" }"#).unwrap();
        std::fs::write(temp_dir.path().join("README.md"), "not an artifact").unwrap();

        let catalog = TemplateCatalog::load_dir(temp_dir.path()).expect("Failed to load catalog");

        assert_eq!(catalog.len(), 2);
        assert_eq!(&catalog.get("Token").unwrap().bytecode[..], &[0x60, 0x80]);
        assert_eq!(&catalog.get("Treasury").unwrap().bytecode[..], &[0x60, 0x40]);
    }

    #[test]
    fn test_load_missing_dir() {
        let temp_dir = TempDir::new("hatchery-test").expect("Failed to create temp dir");
        let result = TemplateCatalog::load_dir(&temp_dir.path().join("missing"));
        assert!(result.is_err());
    }
}
