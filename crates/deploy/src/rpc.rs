//! Ethereum JSON-RPC client submitting through node-managed accounts.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U64};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    ConfirmationConfig, DeployError, NetworkId,
    network::{ChainClient, Connector, Receipt, TransactionRequest},
};

/// Default timeout for a single RPC request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, DeployError> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| DeployError::Rpc(format!("failed to create HTTP client: {e}")))
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, DeployError> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| DeployError::Rpc(format!("failed to send {method} request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| DeployError::Rpc(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = result.get("error") {
        return Err(DeployError::Rpc(
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string(),
        ));
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| DeployError::Rpc(format!("no result in {method} response")))?;

    serde_json::from_value(result_value)
        .map_err(|e| DeployError::Rpc(format!("failed to deserialize {method} result: {e}")))
}

#[derive(Debug, Serialize)]
struct RpcTransaction {
    from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<Address>,
    data: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: U64,
    contract_address: Option<Address>,
    /// Absent on pre-Byzantium chains, where success is assumed.
    status: Option<U64>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.to::<u64>(),
            contract_address: receipt.contract_address,
            success: receipt.status.is_none_or(|status| status == U64::from(1)),
        }
    }
}

/// Outcome of one receipt poll that is not a receipt.
#[derive(Debug)]
enum ReceiptPoll {
    Pending,
    Failed(DeployError),
}

/// Poll for the receipt of a sent transaction until it is included or
/// `confirmation` runs out.
///
/// Failed polls are retried like pending ones. Exhaustion always surfaces as
/// [`DeployError::ConfirmationTimeout`] carrying `tx_hash`.
async fn wait_for_receipt<F, Fut>(
    confirmation: &ConfirmationConfig,
    tx_hash: B256,
    poll: F,
) -> Result<Receipt, DeployError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Receipt, ReceiptPoll>>,
{
    let backoff = ConstantBuilder::default()
        .with_delay(confirmation.poll_interval())
        .with_max_times(confirmation.max_polls());

    let result = poll
        .retry(backoff)
        .notify(|poll, delay| match poll {
            ReceiptPoll::Pending => {
                tracing::trace!(%tx_hash, ?delay, "Transaction pending, polling again");
            }
            ReceiptPoll::Failed(e) => {
                tracing::warn!(%tx_hash, ?delay, error = %e, "Receipt poll failed, polling again");
            }
        })
        .await;

    result.map_err(|last| {
        tracing::error!(%tx_hash, last = ?last, "Transaction not confirmed in time");
        DeployError::ConfirmationTimeout {
            tx_hash,
            waited_secs: confirmation.timeout_secs,
        }
    })
}

/// A [`ChainClient`] speaking JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: Url,
    confirmation: ConfirmationConfig,
}

impl JsonRpcClient {
    pub fn new(endpoint: Url, confirmation: ConfirmationConfig) -> Result<Self, DeployError> {
        Ok(Self {
            http: create_client()?,
            endpoint,
            confirmation,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, DeployError> {
        json_rpc_call(&self.http, &self.endpoint, method, params).await
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<Receipt, ReceiptPoll> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
            .map_err(ReceiptPoll::Failed)?;

        receipt.map(Receipt::from).ok_or(ReceiptPoll::Pending)
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        let chain_id: U64 = self.call("eth_chainId", vec![]).await?;
        Ok(chain_id.to::<u64>())
    }

    async fn accounts(&self) -> Result<Vec<Address>, DeployError> {
        self.call("eth_accounts", vec![]).await
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<Receipt, DeployError> {
        let request = RpcTransaction {
            from: tx.from,
            to: tx.to,
            data: tx.data,
        };

        let tx_hash: B256 = self
            .call("eth_sendTransaction", vec![serde_json::json!(request)])
            .await?;
        tracing::debug!(endpoint = %self.endpoint, %tx_hash, "Transaction sent");

        wait_for_receipt(&self.confirmation, tx_hash, || self.poll_receipt(tx_hash)).await
    }
}

/// Connects to HTTP JSON-RPC endpoints, verifying each with `eth_chainId`.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector {
    confirmation: ConfirmationConfig,
}

impl JsonRpcConnector {
    pub fn new(confirmation: ConfirmationConfig) -> Self {
        Self { confirmation }
    }
}

#[async_trait]
impl Connector for JsonRpcConnector {
    async fn connect(
        &self,
        network: &NetworkId,
        endpoint: &Url,
    ) -> Result<Arc<dyn ChainClient>, DeployError> {
        let client = JsonRpcClient::new(endpoint.clone(), self.confirmation.clone())?;
        let chain_id = client.chain_id().await?;
        tracing::trace!(%network, %endpoint, chain_id, "Endpoint answered");
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_receipt_decoding() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "blockNumber": "0x1b",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x1",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        let receipt = Receipt::from(receipt);
        assert_eq!(receipt.block_number, 27);
        assert!(receipt.success);
        assert!(receipt.contract_address.is_some());
    }

    #[test]
    fn test_failed_receipt() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "blockNumber": "0x2",
            "contractAddress": null,
            "status": "0x0"
        }))
        .unwrap();

        let receipt = Receipt::from(receipt);
        assert!(!receipt.success);
        assert!(receipt.contract_address.is_none());
    }

    #[test]
    fn test_creation_omits_to() {
        let request = RpcTransaction {
            from: Address::repeat_byte(1),
            to: None,
            data: Bytes::from(vec![0x60, 0x80]),
        };
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("to").is_none());
        assert_eq!(json["data"], "0x6080");
    }

    fn fast_confirmation() -> ConfirmationConfig {
        ConfirmationConfig {
            timeout_secs: 1,
            poll_interval_ms: 10,
        }
    }

    fn receipt(tx_hash: B256) -> Receipt {
        Receipt {
            tx_hash,
            block_number: 3,
            contract_address: Some(Address::repeat_byte(3)),
            success: true,
        }
    }

    #[tokio::test]
    async fn test_transient_poll_errors_are_retried() {
        let tx_hash = B256::repeat_byte(7);
        let polls = AtomicUsize::new(0);

        let result = wait_for_receipt(&fast_confirmation(), tx_hash, || {
            let attempt = polls.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err(ReceiptPoll::Failed(DeployError::Rpc(
                        "failed to send eth_getTransactionReceipt request: timed out".into(),
                    ))),
                    1 => Err(ReceiptPoll::Pending),
                    _ => Ok(receipt(tx_hash)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, receipt(tx_hash));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pending_transaction_times_out() {
        let tx_hash = B256::repeat_byte(8);

        let result = wait_for_receipt(&fast_confirmation(), tx_hash, || async {
            Err(ReceiptPoll::Pending)
        })
        .await;

        assert!(matches!(
            result,
            Err(DeployError::ConfirmationTimeout { tx_hash: hash, waited_secs: 1 }) if hash == tx_hash
        ));
    }

    #[tokio::test]
    async fn test_persistent_poll_errors_keep_the_transaction_hash() {
        let tx_hash = B256::repeat_byte(9);

        let result = wait_for_receipt(&fast_confirmation(), tx_hash, || async {
            Err(ReceiptPoll::Failed(DeployError::Rpc("connection reset".into())))
        })
        .await;

        assert!(matches!(
            result,
            Err(DeployError::ConfirmationTimeout { tx_hash: hash, .. }) if hash == tx_hash
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_connect() {
        let connector = JsonRpcConnector::default();
        let endpoint = Url::parse("http://127.0.0.1:1").unwrap();

        let result = connector.connect(&"local".into(), &endpoint).await;
        assert!(matches!(result, Err(DeployError::Rpc(_))));
    }
}
