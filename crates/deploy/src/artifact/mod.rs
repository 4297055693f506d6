//! Artifact factory: resolves templates and publishes or attaches instances.

mod args;
mod template;

use std::{fmt, sync::Arc};

use alloy_core::primitives::{Address, Bytes};

pub use args::{ArgsEncoder, ConstructorArgs};
pub use template::{Template, TemplateCatalog};

use crate::{
    DeployError, NetworkId,
    network::{ChainClient, Connection, Receipt, TransactionRequest},
};

/// A typed binding of network, address and template.
#[derive(Clone)]
pub struct ArtifactHandle {
    network: NetworkId,
    address: Address,
    template: Arc<Template>,
    client: Arc<dyn ChainClient>,
}

impl fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactHandle")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("template", &self.template.name)
            .finish()
    }
}

impl ArtifactHandle {
    pub fn network(&self) -> &NetworkId {
        &self.network
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Send `calldata` to this artifact from `from` and wait for inclusion.
    pub async fn send(&self, from: Address, calldata: Bytes) -> Result<Receipt, DeployError> {
        let receipt = self
            .client
            .submit(TransactionRequest::call(from, self.address, calldata))
            .await?;

        if !receipt.success {
            return Err(DeployError::Rpc(format!(
                "call to {} ({}) reverted in transaction {}",
                self.template.name, self.address, receipt.tx_hash
            )));
        }

        Ok(receipt)
    }
}

/// Result of a successful [`ArtifactBuilder::publish`].
#[derive(Debug, Clone)]
pub struct PublishedArtifact {
    pub handle: ArtifactHandle,
    pub receipt: Receipt,
}

/// Resolves template names against a static catalog.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFactory {
    catalog: Arc<TemplateCatalog>,
}

impl ArtifactFactory {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Bind `template` to a connection and signer.
    ///
    /// Fails with [`DeployError::InvalidTemplate`] before any network call when the
    /// template is not in the catalog.
    pub fn build(
        &self,
        template: &str,
        connection: Arc<Connection>,
        signer: Address,
    ) -> Result<ArtifactBuilder, DeployError> {
        let template = self
            .catalog
            .get(template)
            .ok_or_else(|| DeployError::InvalidTemplate(template.to_string()))?;

        Ok(ArtifactBuilder {
            template,
            connection,
            signer,
        })
    }

    /// Bind a recorded artifact without a signer.
    ///
    /// Recorded templates that have since left the catalog bind by name only.
    pub fn handle_for(
        &self,
        template: &str,
        connection: &Connection,
        address: Address,
    ) -> ArtifactHandle {
        let template = self
            .catalog
            .get(template)
            .unwrap_or_else(|| Arc::new(Template::new(template, Bytes::new())));

        ArtifactHandle {
            network: connection.network.clone(),
            address,
            template,
            client: connection.client.clone(),
        }
    }
}

/// A template bound to a connection and signer.
#[derive(Debug)]
pub struct ArtifactBuilder {
    template: Arc<Template>,
    connection: Arc<Connection>,
    signer: Address,
}

impl ArtifactBuilder {
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Submit a new instance and wait until the network confirms it.
    pub async fn publish(&self, args: &ConstructorArgs) -> Result<PublishedArtifact, DeployError> {
        let mut init_code = self.template.bytecode.to_vec();
        init_code.extend_from_slice(args.as_bytes());

        tracing::debug!(
            network = %self.connection.network,
            template = %self.template.name,
            signer = %self.signer,
            init_code_len = init_code.len(),
            "Submitting artifact"
        );

        let receipt = self
            .connection
            .client
            .submit(TransactionRequest::create(self.signer, init_code.into()))
            .await
            .map_err(|e| match e {
                DeployError::Rpc(reason) => DeployError::PublishRejected {
                    template: self.template.name.clone(),
                    reason,
                },
                other => other,
            })?;

        if !receipt.success {
            return Err(DeployError::PublishRejected {
                template: self.template.name.clone(),
                reason: format!("transaction {} reverted", receipt.tx_hash),
            });
        }

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::PublishRejected {
                template: self.template.name.clone(),
                reason: format!("transaction {} created no contract", receipt.tx_hash),
            })?;

        Ok(PublishedArtifact {
            handle: self.attach(address),
            receipt,
        })
    }

    /// Bind to an existing address. No network call.
    pub fn attach(&self, address: Address) -> ArtifactHandle {
        ArtifactHandle {
            network: self.connection.network.clone(),
            address,
            template: self.template.clone(),
            client: self.connection.client.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::memory::{MemoryChain, MemoryConnector};
    use crate::network::{Connector, NamedAccounts};

    async fn connection(chain: &MemoryChain) -> Arc<Connection> {
        let connector = MemoryConnector::new();
        let endpoint = Url::parse("memory://factory").unwrap();
        connector.add_chain(endpoint.clone(), chain.clone());
        let client = connector.connect(&"n1".into(), &endpoint).await.unwrap();

        Arc::new(Connection {
            network: "n1".into(),
            endpoint,
            chain_id: chain.chain_id(),
            client,
            accounts: NamedAccounts::default(),
        })
    }

    fn factory() -> ArtifactFactory {
        ArtifactFactory::new(TemplateCatalog::new().with(Template::new("Token", vec![0x60, 0x80])))
    }

    #[tokio::test]
    async fn test_publish_appends_args_to_bytecode() {
        let chain = MemoryChain::new(1);
        let signer = chain.accounts()[0];
        let builder = factory().build("Token", connection(&chain).await, signer).unwrap();

        let args = ConstructorArgs::encoder().u64(7).finish();
        let published = builder.publish(&args).await.unwrap();

        let code = chain.code_at(&published.handle.address()).unwrap();
        assert_eq!(&code[..2], &[0x60, 0x80]);
        assert_eq!(code.len(), 2 + 32);
        assert_eq!(published.handle.template().name, "Token");
    }

    #[tokio::test]
    async fn test_unknown_template_fails_fast() {
        let chain = MemoryChain::new(1);
        let result = factory().build("Vault", connection(&chain).await, chain.accounts()[0]);

        assert!(matches!(result, Err(DeployError::InvalidTemplate(name)) if name == "Vault"));
        assert_eq!(chain.transactions().len(), 0);
    }

    #[tokio::test]
    async fn test_attach_makes_no_network_call() {
        let chain = MemoryChain::new(1);
        let builder = factory()
            .build("Token", connection(&chain).await, chain.accounts()[0])
            .unwrap();

        let handle = builder.attach(Address::repeat_byte(0x42));

        assert_eq!(handle.address(), Address::repeat_byte(0x42));
        assert_eq!(chain.transactions().len(), 0);
    }

    #[tokio::test]
    async fn test_reverted_publish_is_rejected() {
        let chain = MemoryChain::new(1);
        chain.reject_code(vec![0x60, 0x80]);
        let builder = factory()
            .build("Token", connection(&chain).await, chain.accounts()[0])
            .unwrap();

        let result = builder.publish(&ConstructorArgs::empty()).await;
        assert!(matches!(result, Err(DeployError::PublishRejected { .. })));
    }

    #[tokio::test]
    async fn test_refused_submission_is_rejected() {
        let chain = MemoryChain::new(1);
        chain.set_rejecting(Some("insufficient funds"));
        let builder = factory()
            .build("Token", connection(&chain).await, chain.accounts()[0])
            .unwrap();

        let result = builder.publish(&ConstructorArgs::empty()).await;
        assert!(
            matches!(result, Err(DeployError::PublishRejected { reason, .. }) if reason == "insufficient funds")
        );
    }

    /// Sends every transaction but never sees it included.
    #[derive(Debug)]
    struct UnconfirmedClient {
        endpoint: Url,
    }

    #[async_trait::async_trait]
    impl ChainClient for UnconfirmedClient {
        fn endpoint(&self) -> &Url {
            &self.endpoint
        }

        async fn chain_id(&self) -> Result<u64, DeployError> {
            Ok(1)
        }

        async fn accounts(&self) -> Result<Vec<Address>, DeployError> {
            Ok(vec![Address::repeat_byte(1)])
        }

        async fn submit(&self, _tx: TransactionRequest) -> Result<Receipt, DeployError> {
            Err(DeployError::ConfirmationTimeout {
                tx_hash: alloy_core::primitives::B256::repeat_byte(0x11),
                waited_secs: 120,
            })
        }
    }

    #[tokio::test]
    async fn test_unconfirmed_publish_keeps_the_transaction_hash() {
        let endpoint = Url::parse("memory://stalled").unwrap();
        let connection = Arc::new(Connection {
            network: "n1".into(),
            endpoint: endpoint.clone(),
            chain_id: 1,
            client: Arc::new(UnconfirmedClient { endpoint }),
            accounts: NamedAccounts::default(),
        });
        let builder = factory()
            .build("Token", connection, Address::repeat_byte(1))
            .unwrap();

        let result = builder.publish(&ConstructorArgs::empty()).await;
        assert!(matches!(
            result,
            Err(DeployError::ConfirmationTimeout { tx_hash, .. })
                if tx_hash == alloy_core::primitives::B256::repeat_byte(0x11)
        ));
    }
}
