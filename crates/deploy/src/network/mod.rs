//! Networks, connections and the accounts exposed to unit bodies.

mod client;
mod registry;

use std::{collections::BTreeMap, sync::Arc};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use url::Url;

pub use client::{ChainClient, Connector, Receipt, TransactionRequest};
pub use registry::NetworkRegistry;

use crate::{DeployError, NetworkId};

/// The account used when a deploy does not name one.
pub const DEFAULT_ACCOUNT: &str = "deployer";

/// Connection configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Endpoints, probed in this order.
    pub endpoints: Vec<Url>,
    /// Account name -> index in the node's account list.
    ///
    /// `deployer` maps to index 0 unless configured otherwise.
    #[serde(default)]
    pub named_accounts: BTreeMap<String, usize>,
}

impl NetworkDescriptor {
    pub fn new(endpoints: Vec<Url>) -> Self {
        Self {
            endpoints,
            named_accounts: BTreeMap::new(),
        }
    }

    /// Map an account name to an index of the node's account list.
    pub fn named_account(mut self, name: impl Into<String>, index: usize) -> Self {
        self.named_accounts.insert(name.into(), index);
        self
    }
}

/// Accounts resolved once per connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedAccounts {
    by_name: BTreeMap<String, Address>,
    all: Vec<Address>,
}

impl NamedAccounts {
    /// Resolve configured names against the node's account list.
    pub fn resolve(
        available: Vec<Address>,
        names: &BTreeMap<String, usize>,
    ) -> Result<Self, DeployError> {
        let mut by_name = BTreeMap::new();

        for (name, index) in names {
            let address = available.get(*index).ok_or_else(|| {
                DeployError::UnknownAccount(format!(
                    "{name} (index {index}, node exposes {} accounts)",
                    available.len()
                ))
            })?;
            by_name.insert(name.clone(), *address);
        }

        if !by_name.contains_key(DEFAULT_ACCOUNT) {
            if let Some(first) = available.first() {
                by_name.insert(DEFAULT_ACCOUNT.to_string(), *first);
            }
        }

        Ok(Self {
            by_name,
            all: available,
        })
    }

    pub fn get(&self, name: &str) -> Option<Address> {
        self.by_name.get(name).copied()
    }

    /// Named accounts, sorted by name.
    pub fn named(&self) -> impl Iterator<Item = (&str, Address)> {
        self.by_name.iter().map(|(name, address)| (name.as_str(), *address))
    }

    /// Every account the node exposes, in node order.
    pub fn all(&self) -> &[Address] {
        &self.all
    }
}

/// A probed, ready-to-use connection to a network.
#[derive(Debug, Clone)]
pub struct Connection {
    pub network: NetworkId,
    pub endpoint: Url,
    pub chain_id: u64,
    pub client: Arc<dyn ChainClient>,
    pub accounts: NamedAccounts,
}
