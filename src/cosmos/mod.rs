pub mod chain;
pub mod events;

pub use chain::CosmosChain;
