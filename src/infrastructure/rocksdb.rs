use crate::domain::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::domain::ports::LockStore;
use crate::error::{LockError, Result};
use crate::infrastructure::file::LeaseRecord;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Column Family holding one lease record per (namespace, key).
pub const CF_LOCKS: &str = "locks";

/// A durable lock store backed by RocksDB.
///
/// Leases outlive the process that took them, so a crashed holder keeps its
/// accounts locked until the lease TTL runs out. RocksDB allows a single
/// process per database; within it, check-and-put runs behind a mutex.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLockStore {
    db: Arc<DB>,
    gate: Arc<Mutex<()>>,
    ttl: Duration,
}

impl RocksDbLockStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_locks = ColumnFamilyDescriptor::new(CF_LOCKS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_locks])?;

        Ok(Self {
            db: Arc::new(db),
            gate: Arc::new(Mutex::new(())),
            ttl,
        })
    }

    pub fn inspect(
        &self,
        namespace: ServiceNamespace,
        key: &ResourceKey,
    ) -> Result<Option<LeaseRecord>> {
        self.read(&storage_key(namespace, key))
    }

    fn write(&self, storage_key: &[u8], record: &LeaseRecord) -> Result<()> {
        let cf = self.db.cf_handle(CF_LOCKS).ok_or_else(|| {
            LockError::Io(std::io::Error::other("Locks column family not found"))
        })?;
        self.db.put_cf(&cf, storage_key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn read(&self, storage_key: &[u8]) -> Result<Option<LeaseRecord>> {
        let cf = self.db.cf_handle(CF_LOCKS).ok_or_else(|| {
            LockError::Io(std::io::Error::other("Locks column family not found"))
        })?;
        match self.db.get_cf(&cf, storage_key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl LockStore for RocksDbLockStore {
    fn try_acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LeaseToken> {
        let storage_key = storage_key(namespace, key);
        let _gate = self
            .gate
            .lock()
            .map_err(|_| LockError::unavailable(namespace, key.as_str(), "lock table poisoned"))?;

        if let Some(held) = self.read(&storage_key)?
            && !held.is_expired()
        {
            return Err(LockError::unavailable(
                namespace,
                key.as_str(),
                format!("held by {} until {}", held.owner, held.expires_at),
            ));
        }

        let token = LeaseToken::new(namespace, key.clone());
        self.write(&storage_key, &LeaseRecord::new(&token, self.ttl))?;
        Ok(token)
    }

    fn release(&self, lease: &LeaseToken) -> Result<()> {
        let storage_key = storage_key(lease.namespace, &lease.key);
        let _gate = self.gate.lock().map_err(|_| {
            LockError::release_failed(lease.namespace, lease.key.as_str(), "lock table poisoned")
        })?;

        match self.read(&storage_key)? {
            Some(held) if held.owner == lease.owner => {
                let cf = self.db.cf_handle(CF_LOCKS).ok_or_else(|| {
                    LockError::Io(std::io::Error::other("Locks column family not found"))
                })?;
                self.db.delete_cf(&cf, &storage_key)?;
                Ok(())
            }
            Some(held) => Err(LockError::release_failed(
                lease.namespace,
                lease.key.as_str(),
                format!("lease now belongs to {}", held.owner),
            )),
            None => Ok(()),
        }
    }

    fn renew(&self, lease: &LeaseToken) -> Result<()> {
        let storage_key = storage_key(lease.namespace, &lease.key);
        let _gate = self
            .gate
            .lock()
            .map_err(|_| LockError::Io(std::io::Error::other("lock table poisoned")))?;

        match self.read(&storage_key)? {
            Some(held) if held.owner == lease.owner => {
                self.write(&storage_key, &held.renewed(self.ttl))
            }
            _ => Err(LockError::lease_lost(lease.namespace, lease.key.as_str())),
        }
    }

    fn lease_ttl(&self) -> Option<Duration> {
        Some(self.ttl)
    }
}

fn storage_key(namespace: ServiceNamespace, key: &ResourceKey) -> Vec<u8> {
    format!("{}/{}", namespace.as_str(), key.as_str()).into_bytes()
}
