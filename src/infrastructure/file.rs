use crate::domain::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::domain::ports::LockStore;
use crate::error::{LockError, Result};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Contents of a lease file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner: Uuid,
    pub namespace: ServiceNamespace,
    pub key: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub(crate) fn new(token: &LeaseToken, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            owner: token.owner,
            namespace: token.namespace,
            key: token.key.to_string(),
            pid: std::process::id(),
            acquired_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// Same lease, expiring `ttl` from now.
    pub(crate) fn renewed(&self, ttl: Duration) -> Self {
        Self {
            expires_at: expiry_after(Utc::now(), ttl),
            ..self.clone()
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(365))
}

/// A lock store made of lease files in a shared directory.
///
/// Every process pointing at the same root contends on the same leases, which
/// makes this the backend for a fleet sharing a filesystem. A lease is the file
/// `<root>/<namespace>/<key>.lock`, and each key has a sibling `.gate` file
/// whose exclusive advisory lock serializes acquire, renew and release. Lease
/// files are only ever replaced by rename, so readers never see half a record.
/// Leases past their expiry are taken over by the next acquirer.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    root: PathBuf,
    ttl: Duration,
}

impl FileLockStore {
    /// Opens (creating if needed) a lease directory at `root`.
    pub fn open<P: AsRef<Path>>(root: P, ttl: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, ttl })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the current lease for the pair, expired or not.
    pub fn inspect(
        &self,
        namespace: ServiceNamespace,
        key: &ResourceKey,
    ) -> Result<Option<LeaseRecord>> {
        match read_record(&self.lease_path(namespace, key)) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn lease_path(&self, namespace: ServiceNamespace, key: &ResourceKey) -> PathBuf {
        self.root
            .join(namespace.as_str().to_ascii_lowercase())
            .join(format!("{}.lock", encode_key(key)))
    }

    /// `<root>/<namespace>/<key>.gate`, the advisory-lock file guarding the lease.
    fn gate_path(&self, namespace: ServiceNamespace, key: &ResourceKey) -> PathBuf {
        self.lease_path(namespace, key).with_extension("gate")
    }

    /// Runs `f` on the lease path while holding the key's exclusive gate.
    ///
    /// Every read-check-write of a lease happens in here, so two contenders
    /// never act on the same observation. The gate file itself is never
    /// removed.
    fn with_gate<T>(
        &self,
        namespace: ServiceNamespace,
        key: &ResourceKey,
        f: impl FnOnce(&Path) -> io::Result<T>,
    ) -> io::Result<T> {
        let path = self.lease_path(namespace, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let gate = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.gate_path(namespace, key))?;
        let mut gate = RwLock::new(gate);
        let _held = gate.write()?;
        f(&path)
    }

    fn current(&self, path: &Path) -> io::Result<Slot> {
        match read_record(path) {
            Ok(record) if record.is_expired() => Ok(Slot::Stale),
            Ok(record) => Ok(Slot::Live(record)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Slot::Free),
            // Unparseable files count as held until untouched for a full TTL.
            Err(e) if e.kind() == ErrorKind::InvalidData && self.is_abandoned(path) => {
                Ok(Slot::Stale)
            }
            Err(e) => Err(e),
        }
    }

    /// True when an unreadable lease file has not been touched for a full TTL.
    fn is_abandoned(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= self.ttl)
    }
}

enum Slot {
    Free,
    Stale,
    Live(LeaseRecord),
}

impl LockStore for FileLockStore {
    fn try_acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LeaseToken> {
        let token = LeaseToken::new(namespace, key.clone());
        let record = LeaseRecord::new(&token, self.ttl);

        let outcome = self.with_gate(namespace, key, |path| match self.current(path)? {
            Slot::Live(held) => Ok(Some(held)),
            Slot::Free | Slot::Stale => {
                write_record(path, &record)?;
                Ok(None)
            }
        });

        match outcome {
            Ok(None) => Ok(token),
            Ok(Some(held)) => Err(LockError::unavailable(
                namespace,
                key.as_str(),
                format!(
                    "held by {} (pid {}) until {}",
                    held.owner, held.pid, held.expires_at
                ),
            )),
            Err(e) => Err(LockError::unavailable(namespace, key.as_str(), e)),
        }
    }

    fn release(&self, lease: &LeaseToken) -> Result<()> {
        let outcome = self.with_gate(lease.namespace, &lease.key, |path| {
            let record = match read_record(path) {
                Ok(record) => record,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            if record.owner != lease.owner {
                return Ok(Some(record.owner));
            }
            match fs::remove_file(path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                _ => Ok(None),
            }
        });

        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(other)) => Err(LockError::release_failed(
                lease.namespace,
                lease.key.as_str(),
                format!("lease now belongs to {other}"),
            )),
            Err(e) => Err(LockError::release_failed(
                lease.namespace,
                lease.key.as_str(),
                e,
            )),
        }
    }

    fn renew(&self, lease: &LeaseToken) -> Result<()> {
        let still_ours = self.with_gate(lease.namespace, &lease.key, |path| {
            match read_record(path) {
                Ok(record) if record.owner == lease.owner => {
                    write_record(path, &record.renewed(self.ttl))?;
                    Ok(true)
                }
                Ok(_) => Ok(false),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        })?;

        if still_ours {
            Ok(())
        } else {
            Err(LockError::lease_lost(lease.namespace, lease.key.as_str()))
        }
    }

    fn lease_ttl(&self) -> Option<Duration> {
        Some(self.ttl)
    }
}

/// Replaces the lease at `path` in one step: the record is written to a
/// private staging file and renamed over the target.
fn write_record(path: &Path, record: &LeaseRecord) -> io::Result<()> {
    let staged = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let written = stage(&staged, record).and_then(|()| fs::rename(&staged, path));
    if written.is_err() {
        let _ = fs::remove_file(&staged);
    }
    written
}

fn stage(staged: &Path, record: &LeaseRecord) -> io::Result<()> {
    let mut file = File::create_new(staged)?;
    file.write_all(&serde_json::to_vec(record)?)?;
    file.sync_all()
}

fn read_record(path: &Path) -> io::Result<LeaseRecord> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

/// Maps a key onto a file name: ASCII letters, digits, `-` and `_` are kept,
/// every other byte becomes `%XX`.
fn encode_key(key: &ResourceKey) -> String {
    let mut encoded = String::with_capacity(key.as_str().len());
    for byte in key.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::new(raw).unwrap()
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key(&key("acct-123")), "acct-123");
        assert_eq!(encode_key(&key("a/b c")), "a%2Fb%20c");
        assert_eq!(encode_key(&key("50%")), "50%25");
    }

    #[test]
    fn test_file_lock_exclusion_and_release() {
        let dir = tempdir().unwrap();
        let store = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();

        let lease = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        let record = store
            .inspect(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.owner, lease.owner);
        assert_eq!(record.pid, std::process::id());

        assert!(matches!(
            store.try_acquire(ServiceNamespace::Payment, &key("acct-1")),
            Err(LockError::Unavailable { .. })
        ));

        store.release(&lease).unwrap();
        store.release(&lease).unwrap();
        assert!(store
            .inspect(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_two_stores_share_the_directory() {
        let dir = tempdir().unwrap();
        let first = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();
        let second = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();

        let lease = first
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        assert!(second
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .is_err());
        assert!(second
            .try_acquire(ServiceNamespace::Payment, &key("acct-2"))
            .is_ok());

        first.release(&lease).unwrap();
        assert!(second
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .is_ok());
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let dir = tempdir().unwrap();
        let short = FileLockStore::open(dir.path(), Duration::ZERO).unwrap();
        let normal = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();

        let stale = short
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        let fresh = normal
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();

        // The previous holder finds someone else's lease and leaves it alone.
        assert!(matches!(
            short.release(&stale),
            Err(LockError::ReleaseFailed { .. })
        ));
        let record = normal
            .inspect(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.owner, fresh.owner);

        // No staging files are left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("payment"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".lock") && !name.ends_with(".gate"))
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn test_partially_written_lease_counts_as_held() {
        let dir = tempdir().unwrap();
        let store = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();
        let path = store.lease_path(ServiceNamespace::Payment, &key("acct-1"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();

        assert!(matches!(
            store.try_acquire(ServiceNamespace::Payment, &key("acct-1")),
            Err(LockError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_abandoned_partial_lease_is_reclaimed_after_ttl() {
        let dir = tempdir().unwrap();
        let store = FileLockStore::open(dir.path(), Duration::from_millis(20)).unwrap();
        let path = store.lease_path(ServiceNamespace::Payment, &key("acct-1"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{\"owner\":").unwrap();

        std::thread::sleep(Duration::from_millis(50));
        let token = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();

        let record = store
            .inspect(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.owner, token.owner);
    }

    #[test]
    fn test_racing_stores_reclaim_expired_lease_once() {
        let dir = tempdir().unwrap();
        let stale = FileLockStore::open(dir.path(), Duration::ZERO).unwrap();
        let contenders = 6;

        for round in 0..200 {
            let key = key(&format!("acct-{round}"));
            stale.try_acquire(ServiceNamespace::Payment, &key).unwrap();

            let barrier = Arc::new(Barrier::new(contenders));
            let winners = Arc::new(AtomicUsize::new(0));
            let threads: Vec<_> = (0..contenders)
                .map(|_| {
                    let store = FileLockStore::open(dir.path(), Duration::from_secs(30)).unwrap();
                    let barrier = barrier.clone();
                    let winners = winners.clone();
                    let key = key.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        if store.try_acquire(ServiceNamespace::Payment, &key).is_ok() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1, "round {round}");
        }
    }

    #[test]
    fn test_renew_keeps_lease_past_ttl() {
        let dir = tempdir().unwrap();
        let holder = FileLockStore::open(dir.path(), Duration::from_millis(150)).unwrap();
        let rival = FileLockStore::open(dir.path(), Duration::from_millis(150)).unwrap();
        let lease = holder
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();

        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(50));
            holder.renew(&lease).unwrap();
            assert!(rival
                .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
                .is_err());
        }

        std::thread::sleep(Duration::from_millis(200));
        let taken = rival
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        assert!(matches!(
            holder.renew(&lease),
            Err(LockError::LeaseLost { .. })
        ));
        rival.release(&taken).unwrap();
    }
}
