//! Provider abstraction: the opaque executor the orchestrator submits artifacts to.

use std::{fmt, sync::Arc};

use alloy_core::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use url::Url;

use crate::{DeployError, NetworkId};

/// A transaction to submit through a node-managed account.
///
/// `to == None` creates a contract from `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
}

impl TransactionRequest {
    /// A contract creation transaction.
    pub fn create(from: Address, init_code: Bytes) -> Self {
        Self {
            from,
            to: None,
            data: init_code,
        }
    }

    /// A call to an existing address.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
        }
    }
}

/// Confirmation of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Address of the created contract, for creation transactions.
    pub contract_address: Option<Address>,
    /// Whether execution succeeded.
    pub success: bool,
}

/// A live binding to one endpoint of a network.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// The endpoint this client talks to.
    fn endpoint(&self) -> &Url;

    async fn chain_id(&self) -> Result<u64, DeployError>;

    /// Accounts the node can send from, in node order.
    async fn accounts(&self) -> Result<Vec<Address>, DeployError>;

    /// Submit a transaction and suspend until it is included.
    ///
    /// Timeouts are the client's policy and surface as
    /// [`DeployError::ConfirmationTimeout`].
    async fn submit(&self, tx: TransactionRequest) -> Result<Receipt, DeployError>;
}

/// Opens clients for endpoint URLs.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Probe `endpoint` and return a client if it answers.
    async fn connect(
        &self,
        network: &NetworkId,
        endpoint: &Url,
    ) -> Result<Arc<dyn ChainClient>, DeployError>;
}
