use super::types::{ConnectionId, PacketTrackingId, TxId};
use crate::core::error::{Error, FieldDiff};
use serde::{Deserialize, Serialize};

/// Upper bound on intermediate connections tracked per packet.
pub const MAX_HOPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopEntry {
    pub connection_id: ConnectionId,
    pub tx_id: Option<TxId>,
    pub relayer: Option<String>,
    /// Set together with `tx_id`, never on its own.
    pub reached: bool,
}

/// Routing path of a packet, ordered by hop index. Hop `i + 1` is only ever
/// reached after hop `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hops(Vec<HopEntry>);

impl Hops {
    pub fn entries(&self) -> &[HopEntry] {
        &self.0
    }

    pub fn get(&self, hop_index: usize) -> Option<&HopEntry> {
        self.0.get(hop_index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reached(&self) -> usize {
        self.0.iter().take_while(|hop| hop.reached).count()
    }

    /// Pre-populates unreached entries for the connections of a multi-hop channel.
    pub fn expect_route(
        &mut self,
        id: &PacketTrackingId,
        connections: &[ConnectionId],
    ) -> Result<(), Error> {
        if connections.len() > MAX_HOPS {
            return Err(Error::HopOverflow {
                id: id.clone(),
                hop_index: connections.len() - 1,
            });
        }
        let diff: Vec<_> = self
            .0
            .iter()
            .zip(connections)
            .filter(|(hop, connection)| hop.connection_id != **connection)
            .map(|(hop, connection)| {
                FieldDiff::new("hops.connection_id", &hop.connection_id, connection)
            })
            .collect();
        if !diff.is_empty() {
            return Err(Error::InconsistentTransition {
                id: id.clone(),
                reason: "route disagrees with recorded hops".to_string(),
                diff,
            });
        }
        for connection_id in connections.iter().skip(self.0.len()) {
            self.0.push(HopEntry {
                connection_id: connection_id.clone(),
                tx_id: None,
                relayer: None,
                reached: false,
            });
        }
        Ok(())
    }

    /// Records hop `hop_index`. A transaction id marks the hop reached in the
    /// same write.
    pub fn record(
        &mut self,
        id: &PacketTrackingId,
        hop_index: usize,
        connection_id: ConnectionId,
        tx_id: Option<TxId>,
        relayer: Option<String>,
    ) -> Result<(), Error> {
        if hop_index >= MAX_HOPS {
            return Err(Error::HopOverflow {
                id: id.clone(),
                hop_index,
            });
        }
        if hop_index > 0 && !self.0.get(hop_index - 1).map_or(false, |hop| hop.reached) {
            return Err(Error::OutOfOrderHop {
                id: id.clone(),
                hop_index,
            });
        }

        if hop_index == self.0.len() {
            let reached = tx_id.is_some();
            self.0.push(HopEntry {
                connection_id,
                tx_id,
                relayer,
                reached,
            });
            return Ok(());
        }

        let hop = &mut self.0[hop_index];

        let mut diff = vec![];
        if hop.connection_id != connection_id {
            diff.push(FieldDiff::new("hops.connection_id", &hop.connection_id, &connection_id));
        }
        if let (Some(recorded), Some(incoming)) = (&hop.tx_id, &tx_id) {
            if recorded != incoming {
                diff.push(FieldDiff::new("hops.tx_id", recorded, incoming));
            }
        }
        if let (Some(recorded), Some(incoming)) = (&hop.relayer, &relayer) {
            if recorded != incoming {
                diff.push(FieldDiff::new("hops.relayer", recorded, incoming));
            }
        }
        if !diff.is_empty() {
            return Err(Error::InconsistentTransition {
                id: id.clone(),
                reason: format!("hop {} already recorded", hop_index),
                diff,
            });
        }

        if hop.tx_id.is_none() && tx_id.is_some() {
            hop.tx_id = tx_id;
            hop.reached = true;
        }
        if hop.relayer.is_none() {
            hop.relayer = relayer;
        }
        Ok(())
    }
}
