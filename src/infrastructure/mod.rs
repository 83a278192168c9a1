//! Port adapters: in-memory stores (default), the optional RocksDB store, the
//! simulated payment gateway and the log-based notifier.

pub mod gateway;
pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
