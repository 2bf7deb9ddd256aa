pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod macros;
pub mod packets;
pub mod registry;
pub mod relay;
pub mod store;
pub mod transfer;
