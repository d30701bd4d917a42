//! Adapters implementing the domain ports.

pub mod cipher;
pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
