use crate::config::GuardConfig;
use crate::domain::ports::LockStoreRef;
use crate::observability::{LockObserverRef, TracingObserver};
use std::sync::Arc;

/// Everything a guard component needs, handed to each constructor by reference.
#[derive(Clone)]
pub struct LockContext {
    pub store: LockStoreRef,
    pub observer: LockObserverRef,
    pub config: GuardConfig,
}

impl LockContext {
    /// Creates a context that reports lock events through `tracing`.
    pub fn new(store: LockStoreRef, config: GuardConfig) -> Self {
        Self {
            store,
            observer: Arc::new(TracingObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: LockObserverRef) -> Self {
        self.observer = observer;
        self
    }
}
