use super::create::timeout_future;
use crate::core::{
    config::Config,
    events::Correlator,
    packets::{
        lifecycle::PacketTracker,
        types::{NetworkId, PacketTrackingId, PacketTrackingRecord},
    },
    registry::StaticRegistry,
    relay::track,
    store::InMemoryStore,
};
use crate::cosmos::{events::CosmosUpdate, CosmosChain};
use crate::primitives::EventSource;
use futures::channel::mpsc::UnboundedSender;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

pub const CHAIN_A: &str = "ibc-0";
pub const CHAIN_B: &str = "ibc-1";

/// Two chains connected over `connection-0`, each with a client of the other
/// as `07-tendermint-0`.
pub const TEST_CONFIG: &str = r#"{
    "tracker": { "transfer_port": "transfer", "max_pending": 64 },
    "chains": [
        {
            "name": "chain_a",
            "network_id": { "chain": "ibc-0" },
            "connections": { "connection-0": { "chain": "ibc-1" } },
            "clients": { "07-tendermint-0": { "chain": "ibc-1" } }
        },
        {
            "name": "chain_b",
            "network_id": { "chain": "ibc-1" },
            "connections": { "connection-0": { "chain": "ibc-0" } },
            "clients": { "07-tendermint-0": { "chain": "ibc-0" } }
        }
    ]
}"#;

pub type TestTracker = PacketTracker<InMemoryStore>;

/// A running ingestion loop over two Cosmos chains whose events are pushed
/// by the test.
pub struct TestHarness {
    pub tracker: Arc<TestTracker>,
    pub correlator: Arc<Correlator<StaticRegistry>>,
    chain_a: UnboundedSender<CosmosUpdate>,
    chain_b: UnboundedSender<CosmosUpdate>,
    handle: JoinHandle<Result<(), anyhow::Error>>,
}

pub fn network_a() -> NetworkId {
    NetworkId::chain(CHAIN_A)
}

pub fn network_b() -> NetworkId {
    NetworkId::chain(CHAIN_B)
}

/// Identity of a packet sent by chain A on `transfer/channel-0`.
pub fn packet_id(sequence: u64) -> PacketTrackingId {
    PacketTrackingId {
        sequence,
        source_port: "transfer".parse().unwrap(),
        source_channel: "channel-0".parse().unwrap(),
        source_network: network_a(),
    }
}

pub fn setup_chains() -> TestHarness {
    log::info!(target: "packet-tracker", "============================== Starting Test ==============================");
    let config = Config::from_json(TEST_CONFIG).unwrap();
    let registry = StaticRegistry::from_chains(&config.chains).unwrap();

    let tracker = Arc::new(PacketTracker::new(InMemoryStore::new(), &config.tracker));
    let correlator = Arc::new(Correlator::new(registry, config.tracker.max_pending));

    let (source_a, chain_a) = CosmosChain::new("chain_a", CHAIN_A);
    let (source_b, chain_b) = CosmosChain::new("chain_b", CHAIN_B);
    let sources: Vec<Arc<dyn EventSource>> = vec![Arc::new(source_a), Arc::new(source_b)];

    let handle = tokio::spawn(track(tracker.clone(), correlator.clone(), sources));
    TestHarness {
        tracker,
        correlator,
        chain_a,
        chain_b,
        handle,
    }
}

impl TestHarness {
    pub fn push_a(&self, update: CosmosUpdate) {
        self.chain_a.unbounded_send(update).expect("chain_a stream closed");
    }

    pub fn push_b(&self, update: CosmosUpdate) {
        self.chain_b.unbounded_send(update).expect("chain_b stream closed");
    }

    /// Polls the tracker until the record of `id` satisfies `predicate`.
    pub async fn wait_for<F>(
        &self,
        id: &PacketTrackingId,
        what: &str,
        predicate: F,
    ) -> PacketTrackingRecord
    where
        F: Fn(&PacketTrackingRecord) -> bool,
    {
        let future = async {
            loop {
                if let Some(record) = self.tracker.get(id) {
                    if predicate(&record) {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        timeout_future(future, 10, format!("{} never became {}", id, what)).await
    }

    /// Closes both streams and waits for the ingestion loop to return.
    pub async fn finish(self) -> Result<(), anyhow::Error> {
        let TestHarness {
            chain_a,
            chain_b,
            handle,
            ..
        } = self;
        drop(chain_a);
        drop(chain_b);
        timeout_future(handle, 10, "ingestion loop did not stop".to_string())
            .await
            .expect("ingestion task panicked")
    }

    /// Waits for the ingestion loop to stop on its own.
    pub async fn halted(self) -> Result<(), anyhow::Error> {
        timeout_future(self.handle, 10, "ingestion loop did not halt".to_string())
            .await
            .expect("ingestion task panicked")
    }
}
