// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::{
    error::Error,
    packets::{
        identity::identity_of,
        types::{
            ChannelId, ChannelOrdering, ClientId, ConnectionId, Height, NetworkId, NetworkRef,
            PacketTrackingId, PortId, ReceiptState, TxId,
        },
    },
};
use crate::primitives::NetworkRegistry;
use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::Mutex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketEventKind {
    /// Source chain: packet committed
    #[default]
    Send,
    /// Destination chain: packet received
    Receive,
    /// Destination chain: receipt written as timed out (ordered channels)
    TimeoutReceipt,
    /// Destination chain: acknowledgement written
    WriteAcknowledgement,
    /// Source chain: acknowledgement relayed back, commitment deleted
    Acknowledge,
    /// Source chain: timeout relayed back, commitment deleted
    Timeout,
    /// Source chain: timed out because the counterparty channel closed
    TimeoutOnClose,
}

impl fmt::Display for PacketEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketEventKind::Send => "send_packet",
            PacketEventKind::Receive => "recv_packet",
            PacketEventKind::TimeoutReceipt => "timeout_receipt",
            PacketEventKind::WriteAcknowledgement => "write_acknowledgement",
            PacketEventKind::Acknowledge => "acknowledge_packet",
            PacketEventKind::Timeout => "timeout_packet",
            PacketEventKind::TimeoutOnClose => "timeout_on_close_packet",
        };
        f.write_str(name)
    }
}

/// Packet event as emitted by a chain, before any field is validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPacketEvent {
    pub kind: PacketEventKind,
    /// Height of the emitting chain
    pub height: u64,
    /// Block time of the emitting chain, nanoseconds
    pub timestamp: Option<u64>,
    pub tx_id: Option<TxId>,
    pub sequence: Option<u64>,
    pub src_port: Option<String>,
    pub src_channel: Option<String>,
    pub dst_port: Option<String>,
    pub dst_channel: Option<String>,
    pub channel_ordering: Option<String>,
    /// Connection of the emitting chain's channel end
    pub connection_id: Option<String>,
    /// Full route for multi-hop channels, emitting side first
    pub connection_hops: Vec<String>,
    pub data: Option<Vec<u8>>,
    pub timeout_height: Option<Height>,
    pub timeout_timestamp: Option<u64>,
    pub ack: Option<Vec<u8>>,
    pub signer: Option<String>,
}

impl RawPacketEvent {
    pub fn new(kind: PacketEventKind, height: u64) -> Self {
        Self {
            kind,
            height,
            ..Default::default()
        }
    }
}

/// A packet crossing an intermediate connection, observed on the intermediate chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHopEvent {
    pub sequence: Option<u64>,
    pub src_port: Option<String>,
    pub src_channel: Option<String>,
    /// Chain id of the packet's source network
    pub src_network: Option<String>,
    pub hop_index: usize,
    pub connection_id: Option<String>,
    pub tx_id: Option<TxId>,
    pub relayer: Option<String>,
}

/// Everything an ingestion stream can deliver for its host chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Packet(RawPacketEvent),
    Hop(RawHopEvent),
    /// The host chain produced a block
    NewBlock { height: Height, timestamp: u64 },
    /// A light client of a counterparty was updated on the host chain
    ClientUpdate {
        client_id: String,
        consensus_height: Height,
        timestamp: Option<u64>,
    },
    ChannelClosed { port: String, channel: String },
}

/// Immutable packet fields, identical on both ends of a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketHeader {
    pub id: PacketTrackingId,
    pub dst_port: PortId,
    pub dst_channel: ChannelId,
    pub dst_network: NetworkId,
    pub data: Vec<u8>,
    pub timeout_height: Height,
    pub timeout_timestamp: u64,
    pub channel_ordering: ChannelOrdering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendPacket {
    pub packet: PacketHeader,
    pub height: u64,
    pub timestamp: Option<u64>,
    pub tx_id: Option<TxId>,
    pub connection_id: Option<ConnectionId>,
    pub connection_hops: Vec<ConnectionId>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivePacket {
    pub packet: PacketHeader,
    pub dst_sequence: u64,
    pub height: u64,
    pub tx_id: Option<TxId>,
    pub receipt: ReceiptState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteAcknowledgement {
    pub id: PacketTrackingId,
    pub ack: Vec<u8>,
    pub height: u64,
    pub tx_id: Option<TxId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionCause {
    Acknowledged,
    TimedOut,
    TimedOutOnClose,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitmentDeletion {
    pub id: PacketTrackingId,
    pub cause: DeletionCause,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HopUpdate {
    pub id: PacketTrackingId,
    pub hop_index: usize,
    pub connection_id: ConnectionId,
    pub tx_id: Option<TxId>,
    pub relayer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacketFailure {
    pub id: PacketTrackingId,
    pub reason: String,
}

/// New height/time of `network` as seen by whoever tracks it. Drives timeout
/// detection for packets headed there.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientUpdate {
    pub network: NetworkId,
    pub height: Height,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelClosure {
    pub network: NetworkId,
    pub port: PortId,
    pub channel: ChannelId,
}

/// Canonical, chain agnostic event consumed by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketEvent {
    Send(SendPacket),
    Receive(ReceivePacket),
    WriteAcknowledgement(WriteAcknowledgement),
    CommitmentDeleted(CommitmentDeletion),
    Hop(HopUpdate),
    Failed(PacketFailure),
    ClientUpdate(ClientUpdate),
    ChannelClosed(ChannelClosure),
}

impl PacketEvent {
    pub fn packet_id(&self) -> Option<&PacketTrackingId> {
        match self {
            PacketEvent::Send(ev) => Some(&ev.packet.id),
            PacketEvent::Receive(ev) => Some(&ev.packet.id),
            PacketEvent::WriteAcknowledgement(ev) => Some(&ev.id),
            PacketEvent::CommitmentDeleted(ev) => Some(&ev.id),
            PacketEvent::Hop(ev) => Some(&ev.id),
            PacketEvent::Failed(ev) => Some(&ev.id),
            PacketEvent::ClientUpdate(_) | PacketEvent::ChannelClosed(_) => None,
        }
    }
}

fn parse_field<T>(value: &Option<String>, what: &str, kind: impl fmt::Display) -> Result<T, Error>
where
    T: std::str::FromStr<Err = Error>,
{
    value
        .as_deref()
        .ok_or_else(|| Error::MalformedEvent(format!("{} event without {}", kind, what)))?
        .parse()
}

/// An event that could not be correlated yet because the registry does not
/// know one of the chains involved.
#[derive(Debug, Clone)]
struct Deferred {
    host: NetworkId,
    event: ChainEvent,
}

/// Translates raw chain events into [`PacketEvent`]s, resolving every chain
/// reference through the registry.
pub struct Correlator<R> {
    registry: R,
    max_pending: usize,
    pending: Mutex<VecDeque<Deferred>>,
}

impl<R: NetworkRegistry> Correlator<R> {
    pub fn new(registry: R, max_pending: usize) -> Self {
        Self {
            registry,
            max_pending,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Maps one event observed on `host` to the canonical events it implies.
    pub fn correlate(
        &self,
        host: &NetworkId,
        event: &ChainEvent,
    ) -> Result<Vec<PacketEvent>, Error> {
        match event {
            ChainEvent::Packet(raw) => self.correlate_packet(host, raw),
            ChainEvent::Hop(raw) => self.correlate_hop(raw).map(|hop| vec![PacketEvent::Hop(hop)]),
            ChainEvent::NewBlock { height, timestamp } => {
                Ok(vec![PacketEvent::ClientUpdate(ClientUpdate {
                    network: host.clone(),
                    height: height.clone(),
                    timestamp: Some(*timestamp),
                })])
            }
            ChainEvent::ClientUpdate {
                client_id,
                consensus_height,
                timestamp,
            } => {
                let client_id: ClientId = client_id.parse()?;
                let network = self.registry.resolve_network(&NetworkRef::Client {
                    host: host.clone(),
                    client_id,
                })?;
                Ok(vec![PacketEvent::ClientUpdate(ClientUpdate {
                    network,
                    height: consensus_height.clone(),
                    timestamp: *timestamp,
                })])
            }
            ChainEvent::ChannelClosed { port, channel } => {
                Ok(vec![PacketEvent::ChannelClosed(ChannelClosure {
                    network: host.clone(),
                    port: port.parse()?,
                    channel: channel.parse()?,
                })])
            }
        }
    }

    fn counterparty(&self, host: &NetworkId, raw: &RawPacketEvent) -> Result<NetworkId, Error> {
        let connection_id = raw
            .connection_id
            .as_deref()
            .or_else(|| raw.connection_hops.first().map(String::as_str))
            .ok_or_else(|| {
                Error::MalformedEvent(format!("{} event without a connection", raw.kind))
            })?;
        let connection_id: ConnectionId = connection_id.parse()?;
        self.registry.resolve_network(&NetworkRef::Connection {
            host: host.clone(),
            connection_id,
        })
    }

    fn header(
        &self,
        raw: &RawPacketEvent,
        src: &NetworkId,
        dst: &NetworkId,
    ) -> Result<PacketHeader, Error> {
        Ok(PacketHeader {
            id: identity_of(raw, Some(src))?,
            dst_port: parse_field(&raw.dst_port, "destination port", raw.kind)?,
            dst_channel: parse_field(&raw.dst_channel, "destination channel", raw.kind)?,
            dst_network: dst.clone(),
            data: raw.data.clone().unwrap_or_default(),
            timeout_height: raw.timeout_height.clone().unwrap_or_default(),
            timeout_timestamp: raw.timeout_timestamp.unwrap_or_default(),
            channel_ordering: parse_field(&raw.channel_ordering, "channel ordering", raw.kind)?,
        })
    }

    fn correlate_packet(
        &self,
        host: &NetworkId,
        raw: &RawPacketEvent,
    ) -> Result<Vec<PacketEvent>, Error> {
        let events = match raw.kind {
            PacketEventKind::Send => {
                let dst = self.counterparty(host, raw)?;
                let connection_hops = raw
                    .connection_hops
                    .iter()
                    .map(|hop| hop.parse())
                    .collect::<Result<Vec<ConnectionId>, _>>()?;
                let connection_id = match &raw.connection_id {
                    Some(connection_id) => Some(connection_id.parse()?),
                    None => connection_hops.first().cloned(),
                };
                vec![PacketEvent::Send(SendPacket {
                    packet: self.header(raw, host, &dst)?,
                    height: raw.height,
                    timestamp: raw.timestamp,
                    tx_id: raw.tx_id.clone(),
                    connection_id,
                    connection_hops,
                    sender: raw.signer.clone(),
                })]
            }
            PacketEventKind::Receive | PacketEventKind::TimeoutReceipt => {
                let src = self.counterparty(host, raw)?;
                let packet = self.header(raw, &src, host)?;
                let receipt = if raw.kind == PacketEventKind::Receive {
                    ReceiptState::Success
                } else {
                    ReceiptState::Timeout
                };
                vec![PacketEvent::Receive(ReceivePacket {
                    dst_sequence: packet.id.sequence,
                    packet,
                    height: raw.height,
                    tx_id: raw.tx_id.clone(),
                    receipt,
                })]
            }
            PacketEventKind::WriteAcknowledgement => {
                let src = self.counterparty(host, raw)?;
                let ack = raw.ack.clone().filter(|ack| !ack.is_empty()).ok_or_else(|| {
                    Error::MalformedEvent(format!("{} event without an acknowledgement", raw.kind))
                })?;
                vec![PacketEvent::WriteAcknowledgement(WriteAcknowledgement {
                    id: identity_of(raw, Some(&src))?,
                    ack,
                    height: raw.height,
                    tx_id: raw.tx_id.clone(),
                })]
            }
            PacketEventKind::Acknowledge
            | PacketEventKind::Timeout
            | PacketEventKind::TimeoutOnClose => {
                let id = identity_of(raw, Some(host))?;
                let cause = match raw.kind {
                    PacketEventKind::Acknowledge => DeletionCause::Acknowledged,
                    PacketEventKind::Timeout => DeletionCause::TimedOut,
                    _ => DeletionCause::TimedOutOnClose,
                };
                let mut events = vec![PacketEvent::CommitmentDeleted(CommitmentDeletion {
                    id: id.clone(),
                    cause,
                    height: raw.height,
                })];
                if cause == DeletionCause::TimedOutOnClose {
                    events.push(PacketEvent::Failed(PacketFailure {
                        id,
                        reason: "counterparty channel closed".to_string(),
                    }));
                }
                events
            }
        };
        Ok(events)
    }

    fn correlate_hop(&self, raw: &RawHopEvent) -> Result<HopUpdate, Error> {
        let src_network = raw.src_network.as_deref().ok_or_else(|| {
            Error::MalformedEvent("hop event without a source network".to_string())
        })?;
        let source_network = self
            .registry
            .resolve_network(&NetworkRef::Named(src_network.to_string()))?;
        let sequence = raw
            .sequence
            .filter(|sequence| *sequence > 0)
            .ok_or_else(|| {
                Error::MalformedEvent("hop event without a packet sequence".to_string())
            })?;
        Ok(HopUpdate {
            id: PacketTrackingId {
                sequence,
                source_port: parse_field(&raw.src_port, "source port", "hop")?,
                source_channel: parse_field(&raw.src_channel, "source channel", "hop")?,
                source_network,
            },
            hop_index: raw.hop_index,
            connection_id: parse_field(&raw.connection_id, "connection", "hop")?,
            tx_id: raw.tx_id.clone(),
            relayer: raw.relayer.clone(),
        })
    }

    fn push(&self, pending: &mut VecDeque<Deferred>, entry: Deferred) {
        if pending.len() >= self.max_pending {
            if let Some(dropped) = pending.pop_front() {
                log::warn!(target: "packet-tracker", "Retry queue full, dropping event from {}: {:?}", dropped.host, dropped.event);
            }
        }
        pending.push_back(entry);
    }

    /// Queues an event whose networks are not resolvable yet. The oldest entry
    /// is dropped once the queue is full.
    pub fn defer(&self, host: NetworkId, event: ChainEvent) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        self.push(&mut pending, Deferred { host, event });
    }

    /// Queues `event` behind earlier deferred events of the same host, so a
    /// host's events are applied in the order it emitted them. Hands the event
    /// back when nothing from `host` is waiting.
    pub fn defer_behind(&self, host: &NetworkId, event: ChainEvent) -> Option<ChainEvent> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.iter().any(|entry| &entry.host == host) {
            return Some(event);
        }
        self.push(
            &mut pending,
            Deferred {
                host: host.clone(),
                event,
            },
        );
        None
    }

    /// Re-correlates the deferred events in arrival order and hands each
    /// result to `apply`. Once an event of a host is still waiting on the
    /// registry, later events of that host stay queued behind it. Other
    /// correlation failures are dropped. The queue stays locked until every
    /// ready event is applied, and a fatal error from `apply` leaves the
    /// unprocessed entries queued.
    pub fn retry_pending<F>(&self, mut apply: F) -> Result<usize, Error>
    where
        F: FnMut(Vec<PacketEvent>) -> Result<usize, Error>,
    {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
            return Ok(0);
        }
        let mut blocked = HashSet::new();
        let mut still_pending = VecDeque::with_capacity(pending.len());
        let mut changed = 0;
        while let Some(entry) = pending.pop_front() {
            if blocked.contains(&entry.host) {
                still_pending.push_back(entry);
                continue;
            }
            match self.correlate(&entry.host, &entry.event) {
                Ok(events) => match apply(events) {
                    Ok(count) => changed += count,
                    Err(e) => {
                        still_pending.extend(pending.drain(..));
                        *pending = still_pending;
                        return Err(e);
                    }
                },
                Err(e) if e.is_retryable() => {
                    blocked.insert(entry.host.clone());
                    still_pending.push_back(entry);
                }
                Err(e) => {
                    log::warn!(target: "packet-tracker", "Dropping deferred event from {}: {}", entry.host, e)
                }
            }
        }
        *pending = still_pending;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::StaticRegistry;

    fn chain_a() -> NetworkId {
        NetworkId::chain("chainA")
    }

    fn chain_b() -> NetworkId {
        NetworkId::chain("chainB")
    }

    fn correlator(max_pending: usize) -> Correlator<StaticRegistry> {
        let registry = StaticRegistry::new();
        registry.register_network("chainA", chain_a());
        registry.register_network("chainB", chain_b());
        registry.register_connection(chain_a(), ConnectionId::new(0), chain_b());
        Correlator::new(registry, max_pending)
    }

    fn packet(kind: PacketEventKind, height: u64) -> RawPacketEvent {
        RawPacketEvent {
            sequence: Some(1),
            src_port: Some("transfer".to_string()),
            src_channel: Some("channel-0".to_string()),
            dst_port: Some("transfer".to_string()),
            dst_channel: Some("channel-1".to_string()),
            channel_ordering: Some("ORDER_UNORDERED".to_string()),
            connection_id: Some("connection-0".to_string()),
            data: Some(b"{}".to_vec()),
            ..RawPacketEvent::new(kind, height)
        }
    }

    fn expected_id() -> PacketTrackingId {
        PacketTrackingId {
            sequence: 1,
            source_port: PortId::Transfer,
            source_channel: ChannelId::new(0),
            source_network: chain_a(),
        }
    }

    #[test]
    fn send_resolves_destination_through_connection() {
        let correlator = correlator(4);
        let event = ChainEvent::Packet(packet(PacketEventKind::Send, 10));
        let events = correlator.correlate(&chain_a(), &event).unwrap();
        let [PacketEvent::Send(send)] = events.as_slice() else {
            panic!("expected a single send, got {:?}", events)
        };
        assert_eq!(send.packet.id, expected_id());
        assert_eq!(send.packet.dst_network, chain_b());
        assert_eq!(send.packet.channel_ordering, ChannelOrdering::Unordered);
        assert_eq!(send.connection_id, Some(ConnectionId::new(0)));
    }

    #[test]
    fn receive_keys_on_the_source_network() {
        let correlator = correlator(4);
        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        let event = ChainEvent::Packet(packet(PacketEventKind::Receive, 20));
        let events = correlator.correlate(&chain_b(), &event).unwrap();
        let [PacketEvent::Receive(receive)] = events.as_slice() else {
            panic!("expected a single receive, got {:?}", events)
        };
        assert_eq!(receive.packet.id, expected_id());
        assert_eq!(receive.packet.dst_network, chain_b());
        assert_eq!(receive.receipt, ReceiptState::Success);
    }

    #[test]
    fn timeout_receipt_carries_a_timeout_receipt_state() {
        let correlator = correlator(4);
        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        let event = ChainEvent::Packet(packet(PacketEventKind::TimeoutReceipt, 25));
        let events = correlator.correlate(&chain_b(), &event).unwrap();
        let [PacketEvent::Receive(receive)] = events.as_slice() else {
            panic!("expected a single receipt, got {:?}", events)
        };
        assert_eq!(receive.receipt, ReceiptState::Timeout);
        assert_eq!(receive.dst_sequence, 1);
    }

    #[test]
    fn unknown_connection_is_retryable() {
        let correlator = correlator(4);
        let event = ChainEvent::Packet(packet(PacketEventKind::Receive, 20));
        let err = correlator.correlate(&chain_b(), &event).unwrap_err();
        assert!(err.is_retryable(), "{}", err);
    }

    #[test]
    fn timeout_on_close_deletes_and_fails() {
        let correlator = correlator(4);
        let event = ChainEvent::Packet(packet(PacketEventKind::TimeoutOnClose, 30));
        let events = correlator.correlate(&chain_a(), &event).unwrap();
        assert_eq!(
            events,
            vec![
                PacketEvent::CommitmentDeleted(CommitmentDeletion {
                    id: expected_id(),
                    cause: DeletionCause::TimedOutOnClose,
                    height: 30,
                }),
                PacketEvent::Failed(PacketFailure {
                    id: expected_id(),
                    reason: "counterparty channel closed".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn empty_acknowledgement_is_malformed() {
        let correlator = correlator(4);
        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        let mut raw = packet(PacketEventKind::WriteAcknowledgement, 21);
        raw.ack = Some(vec![]);
        let err = correlator
            .correlate(&chain_b(), &ChainEvent::Packet(raw))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)), "{}", err);
    }

    fn hop(src_network: &str) -> ChainEvent {
        ChainEvent::Hop(RawHopEvent {
            sequence: Some(1),
            src_port: Some("transfer".to_string()),
            src_channel: Some("channel-0".to_string()),
            src_network: Some(src_network.to_string()),
            hop_index: 1,
            connection_id: Some("connection-7".to_string()),
            tx_id: None,
            relayer: Some("relayer".to_string()),
        })
    }

    #[test]
    fn hop_resolves_named_source_network() {
        let correlator = correlator(4);
        let events = correlator.correlate(&chain_b(), &hop("chainA")).unwrap();
        assert_eq!(
            events,
            vec![PacketEvent::Hop(HopUpdate {
                id: expected_id(),
                hop_index: 1,
                connection_id: ConnectionId::new(7),
                tx_id: None,
                relayer: Some("relayer".to_string()),
            })]
        );
        let err = correlator.correlate(&chain_b(), &hop("chainC")).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let correlator = correlator(2);
        for height in 1..=3 {
            let event = ChainEvent::Packet(packet(PacketEventKind::Receive, height));
            correlator.defer(chain_b(), event);
        }
        assert_eq!(correlator.pending(), 2);
        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        let mut heights = vec![];
        correlator
            .retry_pending(|events| {
                for event in &events {
                    if let PacketEvent::Receive(receive) = event {
                        heights.push(receive.height);
                    }
                }
                Ok(events.len())
            })
            .unwrap();
        assert_eq!(heights, vec![2, 3]);
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn later_events_wait_behind_their_host() {
        let correlator = correlator(8);
        let receive = ChainEvent::Packet(packet(PacketEventKind::Receive, 20));
        correlator.defer(chain_b(), receive);

        // chainA has nothing waiting, chainB does
        let send = ChainEvent::Packet(packet(PacketEventKind::Send, 10));
        assert!(correlator.defer_behind(&chain_a(), send).is_some());
        let mut ack = packet(PacketEventKind::WriteAcknowledgement, 21);
        ack.ack = Some(br#"{"result":"AQ=="}"#.to_vec());
        assert!(correlator.defer_behind(&chain_b(), ChainEvent::Packet(ack)).is_none());
        assert_eq!(correlator.pending(), 2);

        // still unresolvable: the ack must not overtake the receive
        let applied = correlator.retry_pending(|events| Ok(events.len())).unwrap();
        assert_eq!(applied, 0);
        assert_eq!(correlator.pending(), 2);

        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        let mut order = vec![];
        correlator
            .retry_pending(|events| {
                order.extend(events);
                Ok(1)
            })
            .unwrap();
        assert!(matches!(
            order.as_slice(),
            [PacketEvent::Receive(_), PacketEvent::WriteAcknowledgement(_)]
        ));
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn fatal_apply_keeps_remaining_entries() {
        let correlator = correlator(8);
        correlator
            .registry()
            .register_connection(chain_b(), ConnectionId::new(0), chain_a());
        for height in [20, 21] {
            let event = ChainEvent::Packet(packet(PacketEventKind::Receive, height));
            correlator.defer(chain_b(), event);
        }
        let result = correlator.retry_pending(|_| {
            Err(Error::IdentityCollision {
                id: expected_id(),
                diff: vec![],
            })
        });
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(correlator.pending(), 1);
    }
}
