//! Packet lifecycle state machine.
//!
//! Every transition is a pure function over a copy of the current record,
//! committed through a single [`PacketStore::upsert`]. A rejected transition
//! leaves the stored record untouched.

use super::{
    acknowledgement::{decode_ack, AckEnvelope},
    hops::Hops,
    identity::{ack_commitment, packet_commitment},
    types::{
        ChannelId, ConnectionId, NetworkId, PacketState, PacketTrackingId, PacketTrackingRecord,
        PortId, ReceiptState, TxId,
    },
};
use crate::core::{
    config::TrackerConfig,
    error::{Error, FieldDiff},
    events::{
        ChannelClosure, ClientUpdate, CommitmentDeletion, DeletionCause, HopUpdate, PacketEvent,
        PacketFailure, PacketHeader, ReceivePacket, SendPacket, WriteAcknowledgement,
    },
    transfer::MemoResolver,
};
use crate::primitives::{funcs::now_nanos, has_timed_out, PacketStore};
use dashmap::DashMap;
use std::fmt::Debug;

/// Outcome of applying one event to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created(PacketState),
    Advanced { from: PacketState, to: PacketState },
    /// Fields were filled in, state unchanged
    Updated(PacketState),
    /// Replay of data already recorded
    Unchanged(PacketState),
}

impl Transition {
    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged(_))
    }

    pub fn state(&self) -> PacketState {
        match self {
            Transition::Created(state)
            | Transition::Updated(state)
            | Transition::Unchanged(state) => *state,
            Transition::Advanced { to, .. } => *to,
        }
    }
}

/// Fills `slot` if empty. A differing non-empty value is recorded in `diff`.
fn set_once<T>(
    field: &'static str,
    slot: &mut Option<T>,
    incoming: Option<T>,
    diff: &mut Vec<FieldDiff>,
) where
    T: PartialEq + Debug,
{
    let Some(incoming) = incoming else {
        return;
    };
    match slot.as_ref() {
        Some(recorded) if *recorded != incoming => {
            diff.push(FieldDiff::new(field, recorded, &incoming))
        }
        Some(_) => {}
        None => *slot = Some(incoming),
    }
}

fn check_same<T>(field: &'static str, recorded: &T, incoming: &T, diff: &mut Vec<FieldDiff>)
where
    T: PartialEq + Debug,
{
    if recorded != incoming {
        diff.push(FieldDiff::new(field, recorded, incoming));
    }
}

impl PacketTrackingRecord {
    fn from_header(packet: &PacketHeader, state: PacketState) -> Self {
        Self {
            id: packet.id.clone(),
            send_observed: false,
            src_sent_height: None,
            src_sent_timestamp: None,
            src_tx_id: None,
            src_connection_id: None,
            sender: None,
            dst_port: packet.dst_port.clone(),
            dst_channel: packet.dst_channel.clone(),
            dst_network: packet.dst_network.clone(),
            dst_sequence: None,
            packet_data: packet.data.clone(),
            packet_hash: packet_commitment(
                &packet.timeout_height,
                packet.timeout_timestamp,
                &packet.data,
            ),
            timeout_height: packet.timeout_height.clone(),
            timeout_timestamp: packet.timeout_timestamp,
            channel_ordering: packet.channel_ordering,
            state,
            dst_receipt_state: None,
            dst_receipt_height: None,
            dst_receipt_tx_id: None,
            dst_ack: None,
            dst_ack_result: None,
            dst_ack_error: None,
            dst_ack_hash: None,
            src_ack_sequence_id: None,
            src_commitment_deleted: false,
            src_timeout: false,
            failure_reason: None,
            hops: Hops::default(),
            transfer: None,
            index_created_at: 0,
            index_updated_at: 0,
        }
    }

    /// Record for a packet first seen through its send event.
    pub fn from_send(event: &SendPacket) -> Result<Self, Error> {
        let mut record = Self::from_header(&event.packet, PacketState::Sent);
        record.merge_send(event)?;
        Ok(record)
    }

    /// Placeholder for a packet whose receive arrived before its send. A
    /// timeout receipt places it in `timed_out` right away.
    pub fn from_receive(event: &ReceivePacket) -> Result<Self, Error> {
        let state = match event.receipt {
            ReceiptState::Timeout => PacketState::TimedOut,
            ReceiptState::Success => PacketState::Received,
        };
        let mut record = Self::from_header(&event.packet, state);
        record.apply_receive(event)?;
        Ok(record)
    }

    fn header_diff(&self, packet: &PacketHeader) -> Vec<FieldDiff> {
        let mut diff = vec![];
        check_same("dst_port", &self.dst_port, &packet.dst_port, &mut diff);
        check_same("dst_channel", &self.dst_channel, &packet.dst_channel, &mut diff);
        check_same("dst_network", &self.dst_network, &packet.dst_network, &mut diff);
        check_same("packet_data", &self.packet_data, &packet.data, &mut diff);
        check_same("timeout_height", &self.timeout_height, &packet.timeout_height, &mut diff);
        check_same(
            "timeout_timestamp",
            &self.timeout_timestamp,
            &packet.timeout_timestamp,
            &mut diff,
        );
        check_same(
            "channel_ordering",
            &self.channel_ordering,
            &packet.channel_ordering,
            &mut diff,
        );
        diff
    }

    fn merge_send(&mut self, event: &SendPacket) -> Result<(), Error> {
        let mut diff = self.header_diff(&event.packet);
        set_once("src_sent_height", &mut self.src_sent_height, Some(event.height), &mut diff);
        set_once("src_sent_timestamp", &mut self.src_sent_timestamp, event.timestamp, &mut diff);
        set_once("src_tx_id", &mut self.src_tx_id, event.tx_id.clone(), &mut diff);
        set_once(
            "src_connection_id",
            &mut self.src_connection_id,
            event.connection_id.clone(),
            &mut diff,
        );
        set_once("sender", &mut self.sender, event.sender.clone(), &mut diff);
        if !diff.is_empty() {
            return Err(if self.send_observed {
                Error::IdentityCollision {
                    id: self.id.clone(),
                    diff,
                }
            } else {
                Error::InconsistentTransition {
                    id: self.id.clone(),
                    reason: "send disagrees with destination observation".to_string(),
                    diff,
                }
            });
        }
        if event.connection_hops.len() > 1 {
            self.hops.expect_route(&self.id, &event.connection_hops)?;
        }
        self.send_observed = true;
        Ok(())
    }

    fn record_receipt(&mut self, event: &ReceivePacket, reason: &str) -> Result<(), Error> {
        let mut diff = self.header_diff(&event.packet);
        set_once("dst_sequence", &mut self.dst_sequence, Some(event.dst_sequence), &mut diff);
        set_once("dst_receipt_state", &mut self.dst_receipt_state, Some(event.receipt), &mut diff);
        set_once("dst_receipt_height", &mut self.dst_receipt_height, Some(event.height), &mut diff);
        set_once("dst_receipt_tx_id", &mut self.dst_receipt_tx_id, event.tx_id.clone(), &mut diff);
        if !diff.is_empty() {
            return Err(Error::InconsistentTransition {
                id: self.id.clone(),
                reason: reason.to_string(),
                diff,
            });
        }
        Ok(())
    }

    fn apply_receive(&mut self, event: &ReceivePacket) -> Result<(), Error> {
        if event.receipt == ReceiptState::Timeout {
            return self.apply_timeout_receipt(event);
        }
        if self.state.is_terminal() && self.dst_sequence.is_none() {
            return Err(Error::inconsistent(
                &self.id,
                format!("receive after the packet {}", self.state),
            ));
        }
        self.record_receipt(event, "receive disagrees with recorded packet")?;
        if self.state == PacketState::Sent {
            self.state = PacketState::Received;
        }
        Ok(())
    }

    /// The destination of an ordered channel wrote a timeout receipt instead
    /// of receiving the packet. The packet never counts as received.
    fn apply_timeout_receipt(&mut self, event: &ReceivePacket) -> Result<(), Error> {
        if self.state.is_terminal() && self.state != PacketState::TimedOut {
            return Err(Error::inconsistent(
                &self.id,
                format!("timeout receipt after the packet {}", self.state),
            ));
        }
        self.record_receipt(event, "timeout receipt disagrees with recorded packet")?;
        self.src_timeout = true;
        self.state = PacketState::TimedOut;
        Ok(())
    }

    fn apply_acknowledgement(&mut self, event: &WriteAcknowledgement) -> Result<(), Error> {
        match self.state {
            PacketState::Sent => {
                return Err(Error::inconsistent(&self.id, "acknowledgement before receive"))
            }
            PacketState::TimedOut | PacketState::Failed => {
                return Err(Error::inconsistent(
                    &self.id,
                    format!("acknowledgement after the packet {}", self.state),
                ))
            }
            PacketState::AcknowledgedSuccess | PacketState::AcknowledgedError => {
                let mut diff = vec![];
                set_once("dst_ack", &mut self.dst_ack, Some(event.ack.clone()), &mut diff);
                return match diff.is_empty() {
                    true => Ok(()),
                    false => Err(Error::InconsistentTransition {
                        id: self.id.clone(),
                        reason: "packet already acknowledged".to_string(),
                        diff,
                    }),
                };
            }
            PacketState::Received => {}
        }

        self.dst_ack_hash = Some(ack_commitment(&event.ack));
        self.dst_ack = Some(event.ack.clone());
        self.state = match decode_ack(&event.ack) {
            AckEnvelope::Result(result) => {
                self.dst_ack_result = Some(result);
                PacketState::AcknowledgedSuccess
            }
            AckEnvelope::Error(error) => {
                self.dst_ack_error = Some(error);
                PacketState::AcknowledgedError
            }
        };
        Ok(())
    }

    fn apply_commitment_deletion(&mut self, event: &CommitmentDeletion) -> Result<(), Error> {
        if event.cause == DeletionCause::Acknowledged {
            let mut diff = vec![];
            set_once(
                "src_ack_sequence_id",
                &mut self.src_ack_sequence_id,
                Some(event.height),
                &mut diff,
            );
            if !diff.is_empty() {
                return Err(Error::InconsistentTransition {
                    id: self.id.clone(),
                    reason: "commitment already deleted by another acknowledgement".to_string(),
                    diff,
                });
            }
        }
        self.src_commitment_deleted = true;
        Ok(())
    }

    /// Whether timeout detection must leave this record alone: an
    /// acknowledgement (or a part of one) is known, or the destination
    /// accepted the packet.
    pub fn is_timeout_suppressed(&self) -> bool {
        self.has_ack_fragment() || self.dst_receipt_state == Some(ReceiptState::Success)
    }

    fn apply_timeout(&mut self, update: &ClientUpdate) {
        if self.state.is_terminal() || self.is_timeout_suppressed() {
            return;
        }
        if has_timed_out(self, &update.height, update.timestamp) {
            self.src_timeout = true;
            self.state = PacketState::TimedOut;
        }
    }

    fn apply_failure(&mut self, reason: &str) -> Result<(), Error> {
        match self.state {
            PacketState::Failed if self.failure_reason.as_deref() == Some(reason) => Ok(()),
            PacketState::Failed => Err(Error::InconsistentTransition {
                id: self.id.clone(),
                reason: "packet already failed".to_string(),
                diff: vec![FieldDiff::new("failure_reason", &self.failure_reason, reason)],
            }),
            state if state.is_terminal() => Err(Error::inconsistent(
                &self.id,
                format!("failure after the packet {}", state),
            )),
            _ => {
                self.state = PacketState::Failed;
                self.failure_reason = Some(reason.to_string());
                Ok(())
            }
        }
    }
}

/// Where an in-flight packet is headed, used to find the packets affected by
/// client updates and channel closures.
#[derive(Debug, Clone)]
struct InFlight {
    dst_network: NetworkId,
    dst_port: PortId,
    dst_channel: ChannelId,
}

/// Applies canonical packet events to tracking records held by `S`.
pub struct PacketTracker<S> {
    store: S,
    resolver: MemoResolver,
    in_flight: DashMap<PacketTrackingId, InFlight>,
}

impl<S: PacketStore> PacketTracker<S> {
    pub fn new(store: S, config: &TrackerConfig) -> Self {
        Self {
            store,
            resolver: MemoResolver::new(config.transfer_port.clone()),
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, id: &PacketTrackingId) -> Option<PacketTrackingRecord> {
        self.store.get(id)
    }

    /// Identities that have not reached a terminal state yet.
    pub fn in_flight(&self) -> Vec<PacketTrackingId> {
        self.in_flight.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Applies one canonical event. Returns the identities whose record changed.
    pub fn apply(&self, event: PacketEvent) -> Result<Vec<PacketTrackingId>, Error> {
        let (id, transition) = match event {
            PacketEvent::Send(event) => (event.packet.id.clone(), self.on_send(&event)?),
            PacketEvent::Receive(event) => (event.packet.id.clone(), self.on_receive(&event)?),
            PacketEvent::WriteAcknowledgement(event) => {
                (event.id.clone(), self.on_write_acknowledgement(&event)?)
            }
            PacketEvent::CommitmentDeleted(event) => {
                (event.id.clone(), self.on_commitment_deleted(&event)?)
            }
            PacketEvent::Hop(event) => (event.id.clone(), self.on_hop(&event)?),
            PacketEvent::Failed(PacketFailure { id, reason }) => {
                let transition = self.fail(&id, &reason)?;
                (id, transition)
            }
            PacketEvent::ClientUpdate(update) => return Ok(self.on_client_update(&update)),
            PacketEvent::ChannelClosed(closure) => return Ok(self.on_channel_closed(&closure)),
        };
        Ok(if transition.is_change() { vec![id] } else { vec![] })
    }

    pub fn on_send(&self, event: &SendPacket) -> Result<Transition, Error> {
        self.transition(
            &event.packet.id,
            || PacketTrackingRecord::from_send(event),
            |record| record.merge_send(event),
        )
    }

    pub fn on_receive(&self, event: &ReceivePacket) -> Result<Transition, Error> {
        self.transition(
            &event.packet.id,
            || PacketTrackingRecord::from_receive(event),
            |record| record.apply_receive(event),
        )
    }

    pub fn on_write_acknowledgement(
        &self,
        event: &WriteAcknowledgement,
    ) -> Result<Transition, Error> {
        self.transition(
            &event.id,
            || Err(Error::inconsistent(&event.id, "acknowledgement for an unknown packet")),
            |record| record.apply_acknowledgement(event),
        )
    }

    pub fn on_commitment_deleted(&self, event: &CommitmentDeletion) -> Result<Transition, Error> {
        self.transition(
            &event.id,
            || Err(Error::inconsistent(&event.id, "commitment deletion for an unknown packet")),
            |record| record.apply_commitment_deletion(event),
        )
    }

    pub fn on_hop(&self, event: &HopUpdate) -> Result<Transition, Error> {
        self.transition(
            &event.id,
            || Err(Error::inconsistent(&event.id, "hop for an unknown packet")),
            |record| {
                let id = record.id.clone();
                record.hops.record(
                    &id,
                    event.hop_index,
                    event.connection_id.clone(),
                    event.tx_id.clone(),
                    event.relayer.clone(),
                )
            },
        )
    }

    /// Records that the packet crossed intermediate connection `hop_index`.
    pub fn record_hop(
        &self,
        id: &PacketTrackingId,
        hop_index: usize,
        connection_id: ConnectionId,
        tx_id: Option<TxId>,
    ) -> Result<(), Error> {
        self.on_hop(&HopUpdate {
            id: id.clone(),
            hop_index,
            connection_id,
            tx_id,
            relayer: None,
        })
        .map(|_| ())
    }

    /// Moves a non-terminal packet to `failed`.
    pub fn fail(&self, id: &PacketTrackingId, reason: &str) -> Result<Transition, Error> {
        self.transition(
            id,
            || Err(Error::inconsistent(id, "failure of an unknown packet")),
            |record| record.apply_failure(reason),
        )
    }

    /// Re-evaluates timeouts of every in-flight packet headed to the updated
    /// network. Returns the packets that timed out.
    pub fn on_client_update(&self, update: &ClientUpdate) -> Vec<PacketTrackingId> {
        let candidates: Vec<_> = self
            .in_flight
            .iter()
            .filter(|entry| entry.value().dst_network == update.network)
            .map(|entry| entry.key().clone())
            .collect();

        let mut timed_out = vec![];
        for id in candidates {
            match self.transition(
                &id,
                || Err(Error::inconsistent(&id, "timeout check for an unknown packet")),
                |record| {
                    record.apply_timeout(update);
                    Ok(())
                },
            ) {
                Ok(Transition::Advanced {
                    to: PacketState::TimedOut,
                    ..
                }) => timed_out.push(id),
                Ok(_) => {}
                Err(e) => log::warn!(target: "packet-tracker", "Timeout check for {} failed: {}", id, e),
            }
        }
        timed_out
    }

    /// Fails every in-flight packet sent or headed through the closed channel.
    pub fn on_channel_closed(&self, closure: &ChannelClosure) -> Vec<PacketTrackingId> {
        let affected: Vec<_> = self
            .in_flight
            .iter()
            .filter(|entry| {
                let (id, dst) = (entry.key(), entry.value());
                (id.source_network == closure.network
                    && id.source_port == closure.port
                    && id.source_channel == closure.channel)
                    || (dst.dst_network == closure.network
                        && dst.dst_port == closure.port
                        && dst.dst_channel == closure.channel)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let reason = format!(
            "channel {}/{} closed on {}",
            closure.port, closure.channel, closure.network
        );
        let mut failed = vec![];
        for id in affected {
            match self.fail(&id, &reason) {
                Ok(transition) if transition.is_change() => failed.push(id),
                Ok(_) => {}
                Err(e) => log::warn!(target: "packet-tracker", "Could not fail {}: {}", id, e),
            }
        }
        failed
    }

    /// Runs one atomic read-modify-write. `create` builds the record when the
    /// identity is unseen, `mutate` is applied to a copy of an existing one.
    fn transition<C, M>(
        &self,
        id: &PacketTrackingId,
        create: C,
        mutate: M,
    ) -> Result<Transition, Error>
    where
        C: FnOnce() -> Result<PacketTrackingRecord, Error>,
        M: FnOnce(&mut PacketTrackingRecord) -> Result<(), Error>,
    {
        let mut transition = None;
        let result = self.store.upsert(id, |current| {
            let now = now_nanos();
            match current {
                None => {
                    let mut record = create()?;
                    self.attach_transfer(&mut record);
                    record.index_created_at = now;
                    record.index_updated_at = now;
                    transition = Some(Transition::Created(record.state));
                    self.track_in_flight(&record);
                    Ok(record)
                }
                Some(current) => {
                    let mut record = current.clone();
                    mutate(&mut record)?;
                    self.attach_transfer(&mut record);
                    if record == current {
                        transition = Some(Transition::Unchanged(record.state));
                        return Ok(current);
                    }
                    record.index_updated_at = now.max(current.index_updated_at);
                    transition = Some(if record.state != current.state {
                        Transition::Advanced {
                            from: current.state,
                            to: record.state,
                        }
                    } else {
                        Transition::Updated(record.state)
                    });
                    self.track_in_flight(&record);
                    Ok(record)
                }
            }
        });

        result?;
        let transition = transition
            .ok_or_else(|| Error::Store(format!("upsert of {} skipped the mutator", id)))?;

        match transition {
            Transition::Created(state) => {
                log::info!(target: "packet-tracker", "📦 Tracking packet {} ({})", id, state)
            }
            Transition::Advanced { from, to } => {
                log::info!(target: "packet-tracker", "🔀 Packet {} {} -> {}", id, from, to)
            }
            Transition::Updated(state) => {
                log::debug!(target: "packet-tracker", "Packet {} updated in state {}", id, state)
            }
            Transition::Unchanged(_) => {
                log::debug!(target: "packet-tracker", "Packet {} replayed, nothing to apply", id)
            }
        }
        Ok(transition)
    }

    /// Runs inside the store's critical section, so the index never lags the
    /// stored state.
    fn track_in_flight(&self, record: &PacketTrackingRecord) {
        if record.state.is_terminal() {
            self.in_flight.remove(&record.id);
        } else {
            self.in_flight.insert(
                record.id.clone(),
                InFlight {
                    dst_network: record.dst_network.clone(),
                    dst_port: record.dst_port.clone(),
                    dst_channel: record.dst_channel.clone(),
                },
            );
        }
    }

    fn attach_transfer(&self, record: &mut PacketTrackingRecord) {
        if record.transfer.is_none() {
            record.transfer = self.resolver.resolve(record);
        }
    }
}
