pub mod funcs;
pub mod traits;

pub use funcs::has_timed_out;
pub use traits::{EventSource, NetworkRegistry, PacketStore};
