pub mod acknowledgement;
pub mod hops;
pub mod identity;
pub mod lifecycle;
pub mod types;
