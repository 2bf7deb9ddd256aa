//! Tracks the lifecycle of packets relayed between IBC-style chains.
//!
//! Raw events from any number of chain streams are correlated into canonical
//! [`core::events::PacketEvent`]s and folded into one
//! [`core::packets::types::PacketTrackingRecord`] per packet.

pub mod core;
pub mod cosmos;
pub mod primitives;
pub mod testsuite;

pub use crate::core::error::Error;
pub use crate::core::packets::lifecycle::PacketTracker;
