//! Declarative units read from a TOML manifest.
//!
//! Every manifest unit publishes one template:
//!
//! ```toml
//! [[unit]]
//! id = "treasury"
//! template = "Treasury"
//! args = "0x..."
//! dependencies = ["roles"]
//! tags = ["local", "test"]
//! skip_dependencies_in = ["prod"]
//! from = "deployer"
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    DeployError, DeploymentUnit, ExecutionContext, TagSet, UnitBody, UnitId, UnitRegistry,
    artifact::{ConstructorArgs, TemplateCatalog},
    context::DeployOptions,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestUnit {
    pub id: UnitId,
    pub template: String,
    /// Hex-encoded constructor arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<UnitId>,
    #[serde(default)]
    pub tags: TagSet,
    /// Drop every dependency when one of these tags is active.
    #[serde(default)]
    pub skip_dependencies_in: TagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// A parsed manifest, units in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "unit", default)]
    pub units: Vec<ManifestUnit>,
}

impl Manifest {
    pub fn from_toml_str(content: &str) -> Result<Self, DeployError> {
        toml::from_str(content).map_err(|e| DeployError::InvalidManifest(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::InvalidManifest(format!("failed to read {}: {e}", path.display()))
        })?;
        let manifest = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), units = manifest.units.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Check that every referenced template exists, so bad manifests fail before a run.
    pub fn validate(&self, catalog: &TemplateCatalog) -> Result<(), DeployError> {
        match self
            .units
            .iter()
            .find(|unit| !catalog.contains(&unit.template))
        {
            Some(unit) => Err(DeployError::InvalidTemplate(unit.template.clone())),
            None => Ok(()),
        }
    }

    pub fn into_registry(self) -> Result<UnitRegistry, DeployError> {
        let mut registry = UnitRegistry::new();

        for unit in self.units {
            let args = match &unit.args {
                Some(args) => args.parse::<ConstructorArgs>()?,
                None => ConstructorArgs::empty(),
            };

            let declared = DeploymentUnit::new(unit.id)
                .depends_on_unless(unit.dependencies, unit.skip_dependencies_in)
                .tags(unit.tags)
                .body(PublishTemplate {
                    template: unit.template,
                    args,
                    from: unit.from,
                });
            registry.register(declared)?;
        }

        Ok(registry)
    }
}

/// Body of manifest units.
#[derive(Debug)]
struct PublishTemplate {
    template: String,
    args: ConstructorArgs,
    from: Option<String>,
}

#[async_trait]
impl UnitBody for PublishTemplate {
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let options = DeployOptions {
            id: None,
            from: self.from.clone(),
        };
        ctx.deploy_with(&self.template, &self.args, options).await?;
        Ok(())
    }
}
