//! Lock store backends and in-memory collaborators.

pub mod file;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
