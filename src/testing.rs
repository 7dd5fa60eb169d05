//! Lock store doubles for exercising code built on the guard.

use crate::application::context::LockContext;
use crate::config::{GuardConfig, RetryPolicy};
use crate::domain::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::domain::ports::{LockStore, LockStoreRef};
use crate::error::{LockError, Result};
use crate::infrastructure::in_memory::InMemoryLockStore;
use crate::observability::NoopObserver;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// An in-memory store that refuses the first `n` attempts and counts every
/// call. Granted leases are real, so exclusion still holds.
pub struct ScriptedStore {
    inner: InMemoryLockStore,
    refusals_left: AtomicU32,
    attempts: AtomicU32,
    releases: AtomicU32,
    fail_release: bool,
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::unavailable_for(0)
    }
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable_for(refusals: u32) -> Self {
        Self {
            inner: InMemoryLockStore::new(Duration::from_secs(30)),
            refusals_left: AtomicU32::new(refusals),
            attempts: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            fail_release: false,
        }
    }

    /// Every release is counted, then reported as failed and left in place.
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl LockStore for ScriptedStore {
    fn try_acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LeaseToken> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LockError::unavailable(namespace, key.as_str(), "held elsewhere"));
        }
        self.inner.try_acquire(namespace, key)
    }

    fn release(&self, lease: &LeaseToken) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(LockError::release_failed(
                lease.namespace,
                lease.key.as_str(),
                "store unreachable",
            ));
        }
        self.inner.release(lease)
    }

    fn renew(&self, lease: &LeaseToken) -> Result<()> {
        self.inner.renew(lease)
    }

    fn lease_ttl(&self) -> Option<Duration> {
        self.inner.lease_ttl()
    }
}

/// A silent context with immediate retries.
pub fn quiet_context(store: LockStoreRef, max_attempts: u32) -> LockContext {
    let config = GuardConfig {
        retry: RetryPolicy::immediate(max_attempts),
        ..GuardConfig::default()
    };
    LockContext::new(store, config).with_observer(Arc::new(NoopObserver))
}
