//! In-process chains for tests and local harnesses.
//!
//! [`MemoryChain`] simulates inclusion of transactions with deterministic addresses and
//! hashes; [`MemoryConnector`] maps endpoint URLs to chains so endpoint fallback and
//! connection caching can be exercised without a node.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use async_trait::async_trait;
use url::Url;

use crate::{
    DeployError, NetworkId,
    network::{ChainClient, Connector, Receipt, TransactionRequest},
};

/// Number of accounts a fresh [`MemoryChain`] exposes.
pub const DEFAULT_ACCOUNT_COUNT: usize = 10;

#[derive(Debug, Default)]
struct ChainState {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    transactions: Vec<TransactionRequest>,
    rejected_code: Vec<Bytes>,
    rejecting: Option<String>,
    accounts_error: Option<String>,
}

/// A simulated chain. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    chain_id: u64,
    accounts: Vec<Address>,
    state: Arc<Mutex<ChainState>>,
}

impl MemoryChain {
    pub fn new(chain_id: u64) -> Self {
        Self::with_accounts(chain_id, DEFAULT_ACCOUNT_COUNT)
    }

    pub fn with_accounts(chain_id: u64, count: usize) -> Self {
        let accounts = (0..count)
            .map(|i| Address::from_word(keccak256(format!("hatchery-memory-account-{i}"))))
            .collect();

        Self {
            chain_id,
            accounts,
            state: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    /// Reject every creation whose init code starts with `code`.
    pub fn reject_code(&self, code: impl Into<Bytes>) {
        self.lock().rejected_code.push(code.into());
    }

    /// Reject every transaction with `reason` until called again with `None`.
    pub fn set_rejecting(&self, reason: Option<&str>) {
        self.lock().rejecting = reason.map(str::to_string);
    }

    /// Fail account listing with `reason` until called again with `None`.
    pub fn set_accounts_failing(&self, reason: Option<&str>) {
        self.lock().accounts_error = reason.map(str::to_string);
    }

    /// Code deployed at `address`, if any.
    pub fn code_at(&self, address: &Address) -> Option<Bytes> {
        self.lock().code.get(address).cloned()
    }

    /// Every transaction included so far, in order.
    pub fn transactions(&self) -> Vec<TransactionRequest> {
        self.lock().transactions.clone()
    }

    /// Number of contract creations included so far.
    pub fn creations(&self) -> usize {
        self.lock()
            .transactions
            .iter()
            .filter(|tx| tx.to.is_none())
            .count()
    }

    pub fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn include(&self, tx: TransactionRequest) -> Result<Receipt, DeployError> {
        if !self.accounts.contains(&tx.from) {
            return Err(DeployError::Rpc(format!("unknown account {}", tx.from)));
        }

        let mut state = self.lock();

        if let Some(reason) = &state.rejecting {
            return Err(DeployError::Rpc(reason.clone()));
        }

        let nonce = {
            let nonce = state.nonces.entry(tx.from).or_insert(0);
            let current = *nonce;
            *nonce += 1;
            current
        };

        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let tx_hash: B256 = keccak256(&preimage);

        let (contract_address, success) = match tx.to {
            None => {
                let rejected = state
                    .rejected_code
                    .iter()
                    .any(|code| tx.data.starts_with(code));
                if rejected {
                    (None, false)
                } else {
                    let address = tx.from.create(nonce);
                    state.code.insert(address, tx.data.clone());
                    (Some(address), true)
                }
            }
            Some(to) => (None, state.code.contains_key(&to)),
        };

        state.block_number += 1;
        let block_number = state.block_number;
        state.transactions.push(tx);

        Ok(Receipt {
            tx_hash,
            block_number,
            contract_address,
            success,
        })
    }
}

/// A [`ChainClient`] bound to one endpoint of a [`MemoryChain`].
#[derive(Debug)]
pub struct MemoryClient {
    endpoint: Url,
    chain: MemoryChain,
}

#[async_trait]
impl ChainClient for MemoryClient {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(self.chain.chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>, DeployError> {
        if let Some(reason) = self.chain.lock().accounts_error.clone() {
            return Err(DeployError::Rpc(reason));
        }
        Ok(self.chain.accounts.clone())
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<Receipt, DeployError> {
        self.chain.include(tx)
    }
}

/// Resolves endpoint URLs to registered [`MemoryChain`]s; any other URL is unreachable.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    chains: RwLock<HashMap<Url, MemoryChain>>,
    attempts: AtomicUsize,
    connect_delay: Duration,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every connection attempt, to widen race windows in tests.
    pub fn with_connect_delay_ms(mut self, millis: u64) -> Self {
        self.connect_delay = Duration::from_millis(millis);
        self
    }

    /// Serve `chain` at `endpoint`.
    pub fn add_chain(&self, endpoint: Url, chain: MemoryChain) {
        self.chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(endpoint, chain);
    }

    /// Make `endpoint` unreachable.
    pub fn remove_chain(&self, endpoint: &Url) -> Option<MemoryChain> {
        self.chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(endpoint)
    }

    /// Number of connection attempts, successful or not.
    pub fn connect_attempts(&self) -> &AtomicUsize {
        &self.attempts
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        network: &NetworkId,
        endpoint: &Url,
    ) -> Result<Arc<dyn ChainClient>, DeployError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let chain = self
            .chains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(endpoint)
            .cloned()
            .ok_or_else(|| {
                DeployError::Rpc(format!("connection refused by {endpoint} ({network})"))
            })?;

        Ok(Arc::new(MemoryClient {
            endpoint: endpoint.clone(),
            chain,
        }))
    }
}
