//! Bus transport implementations.

pub mod memory;

pub use memory::{MemoryTransport, ProviderBehavior, Responder};
