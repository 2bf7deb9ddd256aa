use crate::core::{
    config::ChainConfig,
    error::Error,
    packets::types::{ClientId, ConnectionId, NetworkId, NetworkRef},
};
use crate::primitives::NetworkRegistry;
use dashmap::DashMap;

/// Registry filled from configuration and extended at runtime as connections
/// and clients are discovered.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    names: DashMap<String, NetworkId>,
    connections: DashMap<(NetworkId, ConnectionId), NetworkId>,
    clients: DashMap<(NetworkId, ClientId), NetworkId>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chains(chains: &[ChainConfig]) -> Result<Self, Error> {
        let registry = Self::new();
        for chain in chains {
            registry.register_network(&chain.name, chain.network_id.clone());
            for (connection_id, counterparty) in &chain.connections {
                registry.register_connection(
                    chain.network_id.clone(),
                    connection_id.parse()?,
                    counterparty.clone(),
                );
            }
            for (client_id, counterparty) in &chain.clients {
                registry.register_client(
                    chain.network_id.clone(),
                    client_id.parse()?,
                    counterparty.clone(),
                );
            }
        }
        Ok(registry)
    }

    /// Makes `network` resolvable by `name` and by its own chain name.
    pub fn register_network(&self, name: &str, network: NetworkId) {
        self.names.insert(network.name().to_string(), network.clone());
        self.names.insert(name.to_string(), network);
    }

    pub fn register_connection(
        &self,
        host: NetworkId,
        connection_id: ConnectionId,
        counterparty: NetworkId,
    ) {
        log::debug!(target: "packet-tracker", "Registered {} on {} -> {}", connection_id, host, counterparty);
        self.connections.insert((host, connection_id), counterparty);
    }

    pub fn register_client(&self, host: NetworkId, client_id: ClientId, counterparty: NetworkId) {
        log::debug!(target: "packet-tracker", "Registered {} on {} -> {}", client_id, host, counterparty);
        self.clients.insert((host, client_id), counterparty);
    }
}

impl NetworkRegistry for StaticRegistry {
    fn resolve_network(&self, reference: &NetworkRef) -> Result<NetworkId, Error> {
        let resolved = match reference {
            NetworkRef::Connection {
                host,
                connection_id,
            } => self
                .connections
                .get(&(host.clone(), connection_id.clone()))
                .map(|entry| entry.value().clone()),
            NetworkRef::Client { host, client_id } => self
                .clients
                .get(&(host.clone(), client_id.clone()))
                .map(|entry| entry.value().clone()),
            NetworkRef::Named(name) => self.names.get(name).map(|entry| entry.value().clone()),
        };
        resolved.ok_or_else(|| Error::UnknownNetwork(reference.to_string()))
    }
}
