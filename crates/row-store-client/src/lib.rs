mod memory;
mod rest;

pub use memory::MemoryStore;
pub use rest::{RestStoreClient, StoreConfig};
