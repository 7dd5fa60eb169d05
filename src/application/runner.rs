use super::acquirer::RetryingAcquirer;
use super::context::LockContext;
use crate::domain::lock::{ResourceKey, ServiceNamespace};
use crate::error::LockError;

/// Runs a unit of work while holding the lease for its resource key.
///
/// The work never sees the lease. Whatever it returns, `Ok` or `Err`, is handed
/// back to the caller untouched; only the runner's own failure to acquire is
/// converted into the caller's error type via `From<LockError>`.
#[derive(Clone)]
pub struct CriticalSectionRunner {
    acquirer: RetryingAcquirer,
}

impl CriticalSectionRunner {
    pub fn new(ctx: &LockContext) -> Self {
        Self {
            acquirer: RetryingAcquirer::new(ctx),
        }
    }

    pub fn acquirer(&self) -> &RetryingAcquirer {
        &self.acquirer
    }

    /// Acquires the lease, runs `work`, then releases the lease.
    ///
    /// The lease is released exactly once on every path out of this call,
    /// including a panic inside `work`. If acquisition is exhausted, `work` is
    /// never invoked and nothing is released.
    pub fn run<T, E, F>(&self, namespace: ServiceNamespace, key: &ResourceKey, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<LockError>,
    {
        let mut handle = self.acquirer.acquire(namespace, key).map_err(E::from)?;
        let outcome = work();
        handle.release();
        outcome
    }
}
