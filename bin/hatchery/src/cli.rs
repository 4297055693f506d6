use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use hatchery_deploy::{CONFIG_FILENAME, HatcheryConfig, UnitId};
use tracing::level_filters::LevelFilter;

/// Prefix of environment variables overriding the configuration file.
const ENV_PREFIX: &str = "HATCHERY_";

#[derive(Parser)]
#[command(name = "hatchery")]
#[command(
    author,
    version,
    about = "Apply idempotent, dependency-ordered contract deployments to EVM networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "HATCHERY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Defaults to ./hatchery.toml, then to hatchery/hatchery.toml in the user
    /// configuration directory.
    #[arg(long, alias = "conf", global = true, env = "HATCHERY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the manifest units to a network.
    Deploy(DeployArgs),
    /// Print the execution order without touching any network.
    Plan(SelectionArgs),
    /// Print the artifacts recorded for a network.
    Status(StatusArgs),
    /// List configured networks.
    Networks(NetworksArgs),
}

/// Which units a run selects.
#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    /// Active tags, comma separated. Without tags every unit is selected.
    #[arg(short, long, value_delimiter = ',', env = "HATCHERY_TAGS")]
    pub tags: Vec<String>,

    /// Run only these units (and their dependencies), comma separated.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}

impl SelectionArgs {
    pub fn targets(&self) -> Option<Vec<UnitId>> {
        if self.only.is_empty() {
            return None;
        }
        Some(self.only.iter().map(|id| UnitId::from(id.as_str())).collect())
    }
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// The network to deploy to.
    #[arg(short, long, env = "HATCHERY_NETWORK")]
    pub network: String,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Re-run applied units and republish their artifacts.
    #[arg(long, env = "HATCHERY_FORCE", default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// The network to inspect.
    #[arg(short, long, env = "HATCHERY_NETWORK")]
    pub network: String,
}

#[derive(Debug, Clone, Args)]
pub struct NetworksArgs {
    /// Connect to each network and report its chain id.
    #[arg(long)]
    pub probe: bool,
}

impl Cli {
    /// The configuration file to read, if any exists.
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }

        let local = PathBuf::from(CONFIG_FILENAME);
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("hatchery").join(CONFIG_FILENAME))
            .filter(|path| path.exists())
    }
}

/// Load the configuration: defaults, then the TOML file, then `HATCHERY_*` variables.
///
/// Relative paths in the file are resolved against the file's directory.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HatcheryConfig> {
    let mut figment = Figment::from(Serialized::defaults(HatcheryConfig::default()));

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    let config: HatcheryConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("Failed to load configuration")?;

    let base = path
        .and_then(Path::parent)
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!(
        path = ?path,
        networks = config.networks.len(),
        "Configuration loaded"
    );

    Ok(config.with_base_dir(&base))
}
