//! Network registry with lazily constructed, per-network connections.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tokio::sync::OnceCell;

use super::{Connection, Connector, NamedAccounts, NetworkDescriptor};
use crate::{DeployError, NetworkId};

/// Maps network ids to their configuration and caches one [`Connection`] per id.
///
/// Concurrent first calls to [`NetworkRegistry::connection_for`] for the same id share a
/// single construction. A failed construction is not cached.
pub struct NetworkRegistry {
    connector: Arc<dyn Connector>,
    descriptors: HashMap<NetworkId, NetworkDescriptor>,
    connections: Mutex<HashMap<NetworkId, Arc<OnceCell<Arc<Connection>>>>>,
}

impl fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("networks", &self.networks())
            .finish_non_exhaustive()
    }
}

impl NetworkRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            descriptors: HashMap::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a network.
    pub fn add_network(
        &mut self,
        id: impl Into<NetworkId>,
        descriptor: NetworkDescriptor,
    ) -> Result<(), DeployError> {
        let id = id.into();

        if self.descriptors.contains_key(&id) {
            return Err(DeployError::DuplicateNetwork(id));
        }
        if !id.is_file_name() {
            return Err(DeployError::InvalidNetworkConfig {
                network: id,
                reason: "network id must be a plain file name".to_string(),
            });
        }
        if descriptor.endpoints.is_empty() {
            return Err(DeployError::InvalidNetworkConfig {
                network: id,
                reason: "at least one endpoint is required".to_string(),
            });
        }

        tracing::debug!(network = %id, endpoints = descriptor.endpoints.len(), "Registered network");
        self.descriptors.insert(id, descriptor);
        Ok(())
    }

    /// Registered network ids, sorted.
    pub fn networks(&self) -> Vec<&NetworkId> {
        let mut ids: Vec<_> = self.descriptors.keys().collect();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, id: &NetworkId) -> Option<&NetworkDescriptor> {
        self.descriptors.get(id)
    }

    /// Return the cached connection for `id`, connecting on first use.
    pub async fn connection_for(&self, id: &NetworkId) -> Result<Arc<Connection>, DeployError> {
        let descriptor = self
            .descriptors
            .get(id)
            .ok_or_else(|| DeployError::UnknownNetwork(id.clone()))?;

        let cell = {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            connections.entry(id.clone()).or_default().clone()
        };

        cell.get_or_try_init(|| self.establish(id, descriptor))
            .await
            .cloned()
    }

    /// Probe endpoints in declared order and keep the first that answers.
    async fn establish(
        &self,
        id: &NetworkId,
        descriptor: &NetworkDescriptor,
    ) -> Result<Arc<Connection>, DeployError> {
        let mut last_error = String::from("no endpoint configured");

        for endpoint in &descriptor.endpoints {
            tracing::debug!(network = %id, %endpoint, "Probing endpoint");

            let client = match self.connector.connect(id, endpoint).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(network = %id, %endpoint, error = %e, "Endpoint unreachable");
                    last_error = e.to_string();
                    continue;
                }
            };

            let chain_id = match client.chain_id().await {
                Ok(chain_id) => chain_id,
                Err(e) => {
                    tracing::warn!(network = %id, %endpoint, error = %e, "Endpoint failed chain id query");
                    last_error = e.to_string();
                    continue;
                }
            };

            let available = match client.accounts().await {
                Ok(available) => available,
                Err(e) => {
                    tracing::warn!(network = %id, %endpoint, error = %e, "Endpoint failed accounts query");
                    last_error = e.to_string();
                    continue;
                }
            };
            let accounts = NamedAccounts::resolve(available, &descriptor.named_accounts)?;

            tracing::info!(
                network = %id,
                %endpoint,
                chain_id,
                accounts = accounts.all().len(),
                "Connected to network"
            );

            return Ok(Arc::new(Connection {
                network: id.clone(),
                endpoint: endpoint.clone(),
                chain_id,
                client,
                accounts,
            }));
        }

        Err(DeployError::NoReachableEndpoint {
            network: id.clone(),
            attempted: descriptor.endpoints.len(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use url::Url;

    use super::*;
    use crate::memory::{MemoryChain, MemoryConnector};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_duplicate_network_is_rejected() {
        let mut registry = NetworkRegistry::new(Arc::new(MemoryConnector::new()));
        let descriptor = NetworkDescriptor::new(vec![url("memory://a")]);

        registry.add_network("n1", descriptor.clone()).unwrap();
        let result = registry.add_network("n1", descriptor);

        assert!(matches!(result, Err(DeployError::DuplicateNetwork(id)) if id.as_str() == "n1"));
    }

    #[test]
    fn test_network_without_endpoints_is_rejected() {
        let mut registry = NetworkRegistry::new(Arc::new(MemoryConnector::new()));
        let result = registry.add_network("n1", NetworkDescriptor::new(vec![]));

        assert!(matches!(result, Err(DeployError::InvalidNetworkConfig { .. })));
    }

    #[test]
    fn test_path_like_network_id_is_rejected() {
        let mut registry = NetworkRegistry::new(Arc::new(MemoryConnector::new()));
        let descriptor = NetworkDescriptor::new(vec![url("memory://a")]);

        let result = registry.add_network("../outside", descriptor);

        assert!(matches!(result, Err(DeployError::InvalidNetworkConfig { .. })));
        assert!(registry.networks().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let registry = NetworkRegistry::new(Arc::new(MemoryConnector::new()));
        let result = registry.connection_for(&NetworkId::from("nope")).await;

        assert!(matches!(result, Err(DeployError::UnknownNetwork(_))));
    }

    #[tokio::test]
    async fn test_first_reachable_endpoint_wins() {
        let connector = MemoryConnector::new();
        connector.add_chain(url("memory://second"), MemoryChain::new(2));
        connector.add_chain(url("memory://third"), MemoryChain::new(3));

        let mut registry = NetworkRegistry::new(Arc::new(connector));
        registry
            .add_network(
                "n1",
                NetworkDescriptor::new(vec![
                    url("memory://first"),
                    url("memory://second"),
                    url("memory://third"),
                ]),
            )
            .unwrap();

        let connection = registry.connection_for(&"n1".into()).await.unwrap();
        assert_eq!(connection.endpoint, url("memory://second"));
        assert_eq!(connection.chain_id, 2);
    }

    #[tokio::test]
    async fn test_failed_accounts_query_falls_back() {
        let first = MemoryChain::new(1);
        first.set_accounts_failing(Some("connection reset"));

        let connector = MemoryConnector::new();
        connector.add_chain(url("memory://first"), first);
        connector.add_chain(url("memory://second"), MemoryChain::new(2));

        let mut registry = NetworkRegistry::new(Arc::new(connector));
        registry
            .add_network(
                "n1",
                NetworkDescriptor::new(vec![url("memory://first"), url("memory://second")]),
            )
            .unwrap();

        let connection = registry.connection_for(&"n1".into()).await.unwrap();
        assert_eq!(connection.endpoint, url("memory://second"));
        assert_eq!(connection.chain_id, 2);
    }

    #[tokio::test]
    async fn test_failed_accounts_query_on_every_endpoint() {
        let chain = MemoryChain::new(1);
        chain.set_accounts_failing(Some("connection reset"));

        let connector = MemoryConnector::new();
        connector.add_chain(url("memory://only"), chain);

        let mut registry = NetworkRegistry::new(Arc::new(connector));
        registry
            .add_network("n1", NetworkDescriptor::new(vec![url("memory://only")]))
            .unwrap();

        let result = registry.connection_for(&"n1".into()).await;
        assert!(matches!(
            result,
            Err(DeployError::NoReachableEndpoint { attempted: 1, ref last_error, .. })
                if last_error.contains("connection reset")
        ));
    }

    #[tokio::test]
    async fn test_all_endpoints_unreachable() {
        let mut registry = NetworkRegistry::new(Arc::new(MemoryConnector::new()));
        registry
            .add_network(
                "n1",
                NetworkDescriptor::new(vec![url("memory://a"), url("memory://b")]),
            )
            .unwrap();

        let result = registry.connection_for(&"n1".into()).await;
        assert!(matches!(
            result,
            Err(DeployError::NoReachableEndpoint { attempted: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_is_cached() {
        let connector = Arc::new(MemoryConnector::new());
        connector.add_chain(url("memory://a"), MemoryChain::new(1));

        let mut registry = NetworkRegistry::new(connector.clone());
        registry
            .add_network("n1", NetworkDescriptor::new(vec![url("memory://a")]))
            .unwrap();

        let first = registry.connection_for(&"n1".into()).await.unwrap();
        let second = registry.connection_for(&"n1".into()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_attempts().load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_coalesces() {
        let connector = Arc::new(MemoryConnector::new().with_connect_delay_ms(50));
        connector.add_chain(url("memory://a"), MemoryChain::new(1));

        let mut registry = NetworkRegistry::new(connector.clone());
        registry
            .add_network("n1", NetworkDescriptor::new(vec![url("memory://a")]))
            .unwrap();
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.connection_for(&"n1".into()).await })
            })
            .collect();

        let connections: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(connections.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(connector.connect_attempts().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_retried() {
        let connector = Arc::new(MemoryConnector::new());
        let mut registry = NetworkRegistry::new(connector.clone());
        registry
            .add_network("n1", NetworkDescriptor::new(vec![url("memory://late")]))
            .unwrap();

        assert!(registry.connection_for(&"n1".into()).await.is_err());

        connector.add_chain(url("memory://late"), MemoryChain::new(7));
        let connection = registry.connection_for(&"n1".into()).await.unwrap();
        assert_eq!(connection.chain_id, 7);
    }
}
