use crate::core::{
    error::Error,
    events::ChainEvent,
    packets::types::{NetworkId, NetworkRef, PacketTrackingId, PacketTrackingRecord},
};
use futures::stream::Stream;
use std::{pin::Pin, sync::Arc};

/// Key-value persistence of packet records.
///
/// The tracker never reads a record and writes it back in two steps: every
/// mutation goes through [`PacketStore::upsert`], which must run the mutator
/// and commit its result atomically per key. Upserts of different keys must
/// not block each other.
pub trait PacketStore: Send + Sync {
    /// Runs `mutator` on the current record (or `None` for an unseen key) and
    /// stores what it returns. If the mutator fails nothing is written and the
    /// error is handed back.
    fn upsert<F>(&self, id: &PacketTrackingId, mutator: F) -> Result<PacketTrackingRecord, Error>
    where
        F: FnOnce(Option<PacketTrackingRecord>) -> Result<PacketTrackingRecord, Error>;

    fn get(&self, id: &PacketTrackingId) -> Option<PacketTrackingRecord>;
}

impl<S: PacketStore> PacketStore for Arc<S> {
    fn upsert<F>(&self, id: &PacketTrackingId, mutator: F) -> Result<PacketTrackingRecord, Error>
    where
        F: FnOnce(Option<PacketTrackingRecord>) -> Result<PacketTrackingRecord, Error>,
    {
        (**self).upsert(id, mutator)
    }

    fn get(&self, id: &PacketTrackingId) -> Option<PacketTrackingRecord> {
        (**self).get(id)
    }
}

/// Resolves connection/client references to durable network ids.
pub trait NetworkRegistry: Send + Sync {
    /// Fails with [`Error::UnknownNetwork`] when the reference is not known (yet).
    fn resolve_network(&self, reference: &NetworkRef) -> Result<NetworkId, Error>;
}

impl<R: NetworkRegistry> NetworkRegistry for Arc<R> {
    fn resolve_network(&self, reference: &NetworkRef) -> Result<NetworkId, Error> {
        (**self).resolve_network(reference)
    }
}

/// A chain whose events are fed to the tracker.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Name of this chain, used in logs.
    fn name(&self) -> &str;

    /// Network the events of this source are observed on.
    fn network_id(&self) -> NetworkId;

    /// Return a stream of events in the order the chain emitted them. The
    /// stream ends when the source stops.
    async fn events(&self) -> Pin<Box<dyn Stream<Item = ChainEvent> + Send>>;
}
