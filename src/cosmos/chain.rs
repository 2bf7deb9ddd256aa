use super::events::{chain_events_from_update, CosmosUpdate};
use crate::core::{events::ChainEvent, packets::types::NetworkId};
use crate::primitives::EventSource;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    stream, Stream, StreamExt,
};
use std::{pin::Pin, sync::Mutex};

/// Event source for a Cosmos SDK chain. Whatever subscribes to the chain's
/// RPC pushes block and transaction results through the [`UnboundedSender`]
/// returned by [`CosmosChain::new`].
pub struct CosmosChain {
    name: String,
    chain_id: String,
    network_id: NetworkId,
    updates: Mutex<Option<UnboundedReceiver<CosmosUpdate>>>,
}

impl CosmosChain {
    pub fn new(
        name: impl Into<String>,
        chain_id: impl Into<String>,
    ) -> (Self, UnboundedSender<CosmosUpdate>) {
        let chain_id = chain_id.into();
        let (sender, receiver) = mpsc::unbounded();
        let chain = Self {
            name: name.into(),
            network_id: NetworkId::chain(chain_id.clone()),
            chain_id,
            updates: Mutex::new(Some(receiver)),
        };
        (chain, sender)
    }

    /// Overrides the network id derived from the chain id.
    pub fn with_network_id(mut self, network_id: NetworkId) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

#[async_trait::async_trait]
impl EventSource for CosmosChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn network_id(&self) -> NetworkId {
        self.network_id.clone()
    }

    /// The update channel can only be drained once; later calls get an
    /// empty stream.
    async fn events(&self) -> Pin<Box<dyn Stream<Item = ChainEvent> + Send>> {
        let receiver = self.updates.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(receiver) = receiver else {
            log::warn!(target: "packet-tracker", "Event stream of {} was already taken", self.name);
            return Box::pin(stream::empty());
        };
        let chain_id = self.chain_id.clone();
        let events = receiver
            .map(move |update| stream::iter(chain_events_from_update(&chain_id, &update)))
            .flatten();
        Box::pin(events)
    }
}
