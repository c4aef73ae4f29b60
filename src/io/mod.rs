pub mod source;
pub mod markers;

pub use source::{MemoryPingSource, PingSource};
pub use markers::MarkerStore;
