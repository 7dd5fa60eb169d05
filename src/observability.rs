//! Lock lifecycle events and the hooks that consume them.
//!
//! The guard never logs directly. It reports what happened to a
//! [`LockObserver`], and the default observer turns events into `tracing`
//! records.

use crate::domain::lock::{ResourceKey, ServiceNamespace};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LockEvent {
    AttemptFailed {
        namespace: ServiceNamespace,
        key: ResourceKey,
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    Acquired {
        namespace: ServiceNamespace,
        key: ResourceKey,
        attempts: u32,
    },
    Exhausted {
        namespace: ServiceNamespace,
        key: ResourceKey,
        attempts: u32,
    },
    Released {
        namespace: ServiceNamespace,
        key: ResourceKey,
    },
    ReleaseFailed {
        namespace: ServiceNamespace,
        key: ResourceKey,
        reason: String,
    },
    RenewFailed {
        namespace: ServiceNamespace,
        key: ResourceKey,
        reason: String,
    },
    LeaseLost {
        namespace: ServiceNamespace,
        key: ResourceKey,
    },
}

pub trait LockObserver: Send + Sync {
    fn on_event(&self, event: &LockEvent);
}

pub type LockObserverRef = Arc<dyn LockObserver>;

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LockObserver for TracingObserver {
    fn on_event(&self, event: &LockEvent) {
        match event {
            LockEvent::AttemptFailed {
                namespace,
                key,
                attempt,
                max_attempts,
                reason,
            } => debug!(%namespace, %key, attempt, max_attempts, %reason, "Lock attempt failed"),
            LockEvent::Acquired {
                namespace,
                key,
                attempts,
            } => debug!(%namespace, %key, attempts, "Lock acquired"),
            LockEvent::Exhausted {
                namespace,
                key,
                attempts,
            } => error!(%namespace, %key, attempts, "Failed to lock account"),
            LockEvent::Released { namespace, key } => {
                debug!(%namespace, %key, "Lock released")
            }
            LockEvent::ReleaseFailed {
                namespace,
                key,
                reason,
            } => error!(%namespace, %key, %reason, "Failed to release lock"),
            LockEvent::RenewFailed {
                namespace,
                key,
                reason,
            } => warn!(%namespace, %key, %reason, "Failed to renew lease"),
            LockEvent::LeaseLost { namespace, key } => {
                error!(%namespace, %key, "Lease lost while held")
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LockObserver for NoopObserver {
    fn on_event(&self, _event: &LockEvent) {}
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LockEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&LockEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(*e)).count()
    }
}

impl LockObserver for RecordingObserver {
    fn on_event(&self, event: &LockEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
