use super::context::LockContext;
use super::handle::LockHandle;
use crate::config::RetryPolicy;
use crate::domain::lock::{ResourceKey, ServiceNamespace};
use crate::domain::ports::LockStoreRef;
use crate::error::{LockError, Result};
use crate::observability::{LockEvent, LockObserverRef};

/// Acquires a lease with a bounded number of attempts.
///
/// Attempts run back to back on the calling thread, separated only by the
/// policy's backoff. Whichever caller's attempt lands first wins; there is no
/// queueing or fairness between competing callers.
#[derive(Clone)]
pub struct RetryingAcquirer {
    store: LockStoreRef,
    observer: LockObserverRef,
    policy: RetryPolicy,
}

impl RetryingAcquirer {
    pub fn new(ctx: &LockContext) -> Self {
        Self {
            store: ctx.store.clone(),
            observer: ctx.observer.clone(),
            policy: ctx.config.retry.clone(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LockHandle> {
        self.acquire_with_attempts(namespace, key, self.policy.max_attempts)
    }

    /// Tries up to `max_attempts` times (at least once). Every failed attempt
    /// counts as unavailable, and the last one turns into
    /// [`LockError::AcquisitionExhausted`].
    pub fn acquire_with_attempts(
        &self,
        namespace: ServiceNamespace,
        key: &ResourceKey,
        max_attempts: u32,
    ) -> Result<LockHandle> {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match LockHandle::acquire(
                self.store.clone(),
                self.observer.clone(),
                namespace,
                key,
            ) {
                Ok(handle) => {
                    self.observer.on_event(&LockEvent::Acquired {
                        namespace,
                        key: key.clone(),
                        attempts: attempt,
                    });
                    return Ok(handle);
                }
                Err(e) => {
                    self.observer.on_event(&LockEvent::AttemptFailed {
                        namespace,
                        key: key.clone(),
                        attempt,
                        max_attempts,
                        reason: e.to_string(),
                    });
                    if attempt < max_attempts {
                        let delay = self.policy.backoff.delay(attempt);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        }

        self.observer.on_event(&LockEvent::Exhausted {
            namespace,
            key: key.clone(),
            attempts: max_attempts,
        });
        Err(LockError::AcquisitionExhausted {
            namespace,
            key: key.to_string(),
            attempts: max_attempts,
        })
    }
}
