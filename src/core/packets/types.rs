use super::hops::Hops;
use crate::core::{error::Error, transfer::TransferPacketTrackingRecord};
use ibc::core::{
    ics04_channel::channel::Order,
    ics24_host::identifier::{
        ChannelId as IbcChannelId, ClientId as IbcClientId, ConnectionId as IbcConnectionId,
        PortId as IbcPortId,
    },
};
pub use ibc_proto::ibc::core::client::v1::Height;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const CHANNEL_PREFIX: &str = "channel-";
const CONNECTION_PREFIX: &str = "connection-";

/// ICS-24 identifier validation, done by the ibc identifier types.
fn validated<T>(kind: &str, id: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    id.parse::<T>()
        .map_err(|e| Error::MalformedEvent(format!("invalid {} identifier {:?}: {}", kind, id, e)))
}

/// Parses `{prefix}{n}` only when `n` renders back to the same string.
fn parse_sequential(prefix: &str, id: &str) -> Option<u64> {
    let n: u64 = id.strip_prefix(prefix)?.parse().ok()?;
    (format!("{}{}", prefix, n) == id).then_some(n)
}

macro_rules! string_serde {
    ($ty:ident) => {
        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }
    };
}

/// Port identifier. The transfer module port is the only one the tracker
/// interprets, every other port is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortId {
    Transfer,
    Other(IbcPortId),
}

impl PortId {
    pub fn transfer() -> Self {
        PortId::Transfer
    }

    pub fn as_str(&self) -> &str {
        match self {
            PortId::Transfer => "transfer",
            PortId::Other(id) => id.as_str(),
        }
    }
}

impl FromStr for PortId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "transfer" {
            return Ok(PortId::Transfer);
        }
        validated("port", s).map(PortId::Other)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(PortId);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelId {
    /// `channel-{n}`, as allocated by ibc-go style channel keepers
    Sequential(u64),
    Other(IbcChannelId),
}

impl ChannelId {
    pub fn new(n: u64) -> Self {
        ChannelId::Sequential(n)
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_sequential(CHANNEL_PREFIX, s) {
            Some(n) => Ok(ChannelId::Sequential(n)),
            None => validated("channel", s).map(ChannelId::Other),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Sequential(n) => write!(f, "{}{}", CHANNEL_PREFIX, n),
            ChannelId::Other(id) => f.write_str(id.as_str()),
        }
    }
}

string_serde!(ChannelId);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectionId {
    /// `connection-{n}`
    Sequential(u64),
    Other(IbcConnectionId),
}

impl ConnectionId {
    pub fn new(n: u64) -> Self {
        ConnectionId::Sequential(n)
    }
}

impl FromStr for ConnectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_sequential(CONNECTION_PREFIX, s) {
            Some(n) => Ok(ConnectionId::Sequential(n)),
            None => validated("connection", s).map(ConnectionId::Other),
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionId::Sequential(n) => write!(f, "{}{}", CONNECTION_PREFIX, n),
            ConnectionId::Other(id) => f.write_str(id.as_str()),
        }
    }
}

string_serde!(ConnectionId);

/// Light client identifier, e.g. `07-tendermint-0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(IbcClientId);

impl ClientId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for ClientId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validated("client", s).map(ClientId)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(ClientId);

/// Durable identifier of a network (consensus instance) as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkId {
    /// Plain chain id, e.g. `osmosis-1`
    Chain(String),
    /// Chain id pinned to a genesis hash, for chains that reuse ids across forks
    Genesis { name: String, genesis_hash: String },
}

impl NetworkId {
    pub fn chain(name: impl Into<String>) -> Self {
        NetworkId::Chain(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            NetworkId::Chain(name) => name,
            NetworkId::Genesis { name, .. } => name,
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkId::Chain(name) => f.write_str(name),
            NetworkId::Genesis { name, genesis_hash } => {
                let short = genesis_hash.get(..8).unwrap_or(genesis_hash);
                write!(f, "{}@{}", name, short)
            }
        }
    }
}

/// Reference a chain stream can hand to the registry to learn which network sits
/// on the other side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkRef {
    Connection {
        host: NetworkId,
        connection_id: ConnectionId,
    },
    Client {
        host: NetworkId,
        client_id: ClientId,
    },
    /// Chain id or configured chain name
    Named(String),
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRef::Connection {
                host,
                connection_id,
            } => write!(f, "{} on {}", connection_id, host),
            NetworkRef::Client { host, client_id } => write!(f, "{} on {}", client_id, host),
            NetworkRef::Named(name) => f.write_str(name),
        }
    }
}

/// Fixed for the lifetime of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrdering {
    Unordered,
    Ordered,
}

impl FromStr for ChannelOrdering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Order>() {
            Ok(Order::Unordered) => Ok(ChannelOrdering::Unordered),
            Ok(Order::Ordered) => Ok(ChannelOrdering::Ordered),
            Ok(_) => Err(Error::MalformedEvent(format!("uninitialized channel ordering {:?}", s))),
            Err(e) => Err(Error::MalformedEvent(format!("unknown channel ordering {:?}: {}", s, e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketState {
    Sent,
    Received,
    AcknowledgedSuccess,
    AcknowledgedError,
    TimedOut,
    Failed,
}

impl PacketState {
    /// Position in the `sent -> received -> terminal` walk.
    pub fn rank(&self) -> u8 {
        match self {
            PacketState::Sent => 0,
            PacketState::Received => 1,
            _ => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketState::Sent => "sent",
            PacketState::Received => "received",
            PacketState::AcknowledgedSuccess => "acknowledged_success",
            PacketState::AcknowledgedError => "acknowledged_error",
            PacketState::TimedOut => "timed_out",
            PacketState::Failed => "failed",
        }
    }
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt written by the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptState {
    Timeout,
    Success,
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub Vec<u8>);

impl TxId {
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(s)
            .map(TxId)
            .map_err(|e| Error::MalformedEvent(format!("invalid transaction hash {:?}: {}", s, e)))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self)
    }
}

/// Globally unique packet key. Sequences are only unique within a
/// (port, channel, network) triple so all four fields are needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketTrackingId {
    pub sequence: u64,
    pub source_port: PortId,
    pub source_channel: ChannelId,
    pub source_network: NetworkId,
}

impl fmt::Display for PacketTrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.source_network, self.source_port, self.source_channel, self.sequence
        )
    }
}

/// Lifecycle record of one packet. Created on the first observation of either
/// end of the packet and mutated in place afterwards, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketTrackingRecord {
    pub id: PacketTrackingId,
    /// False while the record is a placeholder created by the destination side.
    pub send_observed: bool,
    /// Block height on the source chain at which the packet was sent
    pub src_sent_height: Option<u64>,
    /// Source block timestamp (nanoseconds) at send time
    pub src_sent_timestamp: Option<u64>,
    pub src_tx_id: Option<TxId>,
    pub src_connection_id: Option<ConnectionId>,
    pub sender: Option<String>,
    pub dst_port: PortId,
    pub dst_channel: ChannelId,
    pub dst_network: NetworkId,
    /// Known once the destination chain has received the packet
    pub dst_sequence: Option<u64>,
    pub packet_data: Vec<u8>,
    /// ICS-04 packet commitment
    pub packet_hash: [u8; 32],
    /// On the destination chain; zero means no height bound
    pub timeout_height: Height,
    /// On the destination chain, nanoseconds; zero means no time bound
    pub timeout_timestamp: u64,
    pub channel_ordering: ChannelOrdering,
    pub state: PacketState,
    pub dst_receipt_state: Option<ReceiptState>,
    pub dst_receipt_height: Option<u64>,
    pub dst_receipt_tx_id: Option<TxId>,
    pub dst_ack: Option<Vec<u8>>,
    pub dst_ack_result: Option<Vec<u8>>,
    pub dst_ack_error: Option<String>,
    pub dst_ack_hash: Option<[u8; 32]>,
    /// Source height at which the acknowledgement was relayed back
    pub src_ack_sequence_id: Option<u64>,
    pub src_commitment_deleted: bool,
    pub src_timeout: bool,
    pub failure_reason: Option<String>,
    pub hops: Hops,
    pub transfer: Option<TransferPacketTrackingRecord>,
    pub index_created_at: u64,
    pub index_updated_at: u64,
}

impl PacketTrackingRecord {
    /// Whether any part of an acknowledgement has been recorded.
    pub fn has_ack_fragment(&self) -> bool {
        self.dst_ack.is_some()
            || self.dst_ack_result.is_some()
            || self.dst_ack_error.is_some()
            || self.dst_ack_hash.is_some()
            || self.src_ack_sequence_id.is_some()
    }
}
