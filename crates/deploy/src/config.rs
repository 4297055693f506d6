//! Configuration types shared by the library and the CLI.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    DeployError, NetworkId,
    network::{Connector, NetworkDescriptor, NetworkRegistry},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "hatchery.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatcheryConfig {
    /// Directory holding one ledger file per network.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,

    /// Directory of compiler artifacts the template catalog is loaded from.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Unit manifest.
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub networks: BTreeMap<NetworkId, NetworkDescriptor>,
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_manifest() -> PathBuf {
    PathBuf::from("units.toml")
}

impl Default for HatcheryConfig {
    fn default() -> Self {
        Self {
            ledger_dir: default_ledger_dir(),
            artifacts_dir: default_artifacts_dir(),
            manifest: default_manifest(),
            confirmation: ConfirmationConfig::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl HatcheryConfig {
    /// Resolve relative paths against `base`, usually the config file's directory.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        for path in [&mut self.ledger_dir, &mut self.artifacts_dir, &mut self.manifest] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Build a registry holding every configured network.
    pub fn network_registry(
        &self,
        connector: Arc<dyn Connector>,
    ) -> Result<NetworkRegistry, DeployError> {
        let mut registry = NetworkRegistry::new(connector);
        for (id, descriptor) in &self.networks {
            registry.add_network(id.clone(), descriptor.clone())?;
        }
        Ok(registry)
    }
}

/// How long to wait for transactions to be included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_timeout_secs() -> u64 {
    120
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Polls that fit in the timeout after the first one.
    pub fn max_polls(&self) -> usize {
        let polls = self.timeout().as_millis() / self.poll_interval().as_millis();
        usize::try_from(polls).unwrap_or(usize::MAX)
    }
}
