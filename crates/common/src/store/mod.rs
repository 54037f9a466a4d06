mod memory;
mod provider;

pub use memory::{MemoryLinkStore, MemoryLinkStoreError};
pub use provider::{LinkStore, StoreError};
