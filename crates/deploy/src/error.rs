//! Error types for the deployment orchestrator.

use std::path::PathBuf;

use alloy_core::primitives::{Address, B256};

use crate::{NetworkId, UnitId};

/// Errors raised by the network registry, artifact factory, ledger, resolver and
/// execution context.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A network with the same id was already registered.
    #[error("network `{0}` is already registered")]
    DuplicateNetwork(NetworkId),

    /// The network id was never registered.
    #[error("network `{0}` is not registered")]
    UnknownNetwork(NetworkId),

    /// The network descriptor is unusable (for example, it lists no endpoint).
    #[error("invalid configuration for network `{network}`: {reason}")]
    InvalidNetworkConfig { network: NetworkId, reason: String },

    /// None of the configured endpoints answered.
    #[error("no reachable endpoint for network `{network}` ({attempted} tried): {last_error}")]
    NoReachableEndpoint {
        network: NetworkId,
        attempted: usize,
        last_error: String,
    },

    /// The template name is not part of the factory catalog.
    #[error("unknown artifact template `{0}`")]
    InvalidTemplate(String),

    /// The network refused or reverted the publish transaction.
    #[error("publishing `{template}` was rejected: {reason}")]
    PublishRejected { template: String, reason: String },

    /// The transaction was accepted but never confirmed within the client's timeout.
    #[error("transaction {tx_hash} was not confirmed after {waited_secs} seconds")]
    ConfirmationTimeout { tx_hash: B256, waited_secs: u64 },

    /// Transport or protocol failure talking to an endpoint.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The ledger already holds an entry for this id and the write was not forced.
    #[error("ledger already holds `{unit}` on network `{network}`")]
    LedgerConflict { network: NetworkId, unit: UnitId },

    /// An artifact was published but recording it failed.
    #[error("artifact `{unit}` was published at {address} but could not be recorded: {reason}")]
    LedgerWrite {
        unit: UnitId,
        address: Address,
        reason: String,
    },

    /// Reading or writing the ledger file failed.
    #[error("ledger i/o error on {}: {source}", .path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger file holds a malformed record.
    #[error("corrupt ledger record in {} at line {line}: {reason}", .path.display())]
    LedgerCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The effective dependency graph has a cycle.
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<UnitId> },

    /// Two units share the same id.
    #[error("unit `{0}` is already registered")]
    DuplicateUnit(UnitId),

    /// A unit depends on an id that is not registered.
    #[error("unit `{unit}` depends on unknown unit `{dependency}`")]
    UnknownDependency { unit: UnitId, dependency: UnitId },

    /// A run target does not name a registered unit.
    #[error("unit `{0}` is not registered")]
    UnknownUnit(UnitId),

    /// `get` was called for an id with no ledger entry on the current network.
    #[error("`{unit}` has not been deployed on network `{network}`")]
    UnresolvedDependency { network: NetworkId, unit: UnitId },

    /// A named account is not available on the connection.
    #[error("unknown account `{0}`")]
    UnknownAccount(String),

    /// A unit manifest could not be read or understood.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Constructor arguments could not be decoded.
    #[error("invalid constructor arguments: {0}")]
    InvalidArgs(String),

    /// A unit body failed during a run.
    #[error("unit `{unit}` failed: {source}")]
    UnitFailed {
        unit: UnitId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

fn format_cycle(cycle: &[UnitId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
