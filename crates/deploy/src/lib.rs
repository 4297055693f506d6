//! hatchery-deploy - Idempotent deployment orchestration for EVM networks.
//!
//! A deployment is a caller-owned [`UnitRegistry`] of [`DeploymentUnit`]s. The
//! [`Orchestrator`] resolves the units selected by the active tags into a
//! deterministic order, skips the ones the [`Ledger`] already records for the target
//! network and runs the rest, each with an [`ExecutionContext`] through which bodies
//! publish or attach artifacts.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hatchery_deploy::{
//!     ConstructorArgs, DeploymentUnit, JsonRpcConnector, Ledger, NetworkDescriptor,
//!     NetworkRegistry, Orchestrator, RunOptions, TemplateCatalog, UnitRegistry,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut networks = NetworkRegistry::new(Arc::new(JsonRpcConnector::default()));
//! networks.add_network(
//!     "local",
//!     NetworkDescriptor::new(vec!["http://127.0.0.1:8545".parse()?]),
//! )?;
//!
//! let units = UnitRegistry::from_units([DeploymentUnit::new("token")
//!     .tags(["local"])
//!     .body_fn(|ctx| {
//!         Box::pin(async move {
//!             ctx.deploy("Token", &ConstructorArgs::empty()).await?;
//!             Ok::<_, anyhow::Error>(())
//!         })
//!     })])?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(networks),
//!     TemplateCatalog::load_dir("artifacts".as_ref())?,
//!     Arc::new(Ledger::open("deployments")?),
//! );
//! let report = orchestrator
//!     .run(&units, &"local".into(), &RunOptions::default().tags(["local"]))
//!     .await?;
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod config;
pub mod ledger;
pub mod manifest;
pub mod memory;
pub mod network;
pub mod rpc;

mod context;
mod error;
mod orchestrator;
mod resolver;
mod types;
mod unit;

pub use artifact::{
    ArgsEncoder, ArtifactBuilder, ArtifactFactory, ArtifactHandle, ConstructorArgs,
    PublishedArtifact, Template, TemplateCatalog,
};
pub use async_trait::async_trait;
pub use config::{CONFIG_FILENAME, ConfirmationConfig, HatcheryConfig};
pub use context::{DeployOptions, DeployResult, ExecutionContext};
pub use error::DeployError;
pub use ledger::{Ledger, LedgerEntry, PublishRef};
pub use manifest::{Manifest, ManifestUnit};
pub use network::{
    ChainClient, Connection, Connector, NamedAccounts, NetworkDescriptor, NetworkRegistry,
    Receipt, TransactionRequest,
};
pub use orchestrator::{Orchestrator, Outcome, RunOptions, RunReport, UnitReport};
pub use resolver::{ExecutionPlan, Inclusion, PlannedUnit};
pub use rpc::{JsonRpcClient, JsonRpcConnector};
pub use types::{NetworkId, TagSet, UnitId, tag_set};
pub use unit::{Dependency, DeploymentUnit, UnitBody, UnitRegistry};
