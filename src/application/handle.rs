use crate::domain::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::domain::ports::LockStoreRef;
use crate::error::{LockError, Result};
use crate::observability::{LockEvent, LockObserverRef};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Held,
    Released,
}

/// A lease held on one (namespace, key) pair.
///
/// Releasing is idempotent, and a handle that goes out of scope while still
/// held releases itself, so the lease is given back even when the guarded work
/// panics. The handle is deliberately not `Clone`.
///
/// When the store's leases expire, a heartbeat thread renews the lease at a
/// third of its TTL for as long as the handle is held.
pub struct LockHandle {
    store: LockStoreRef,
    observer: LockObserverRef,
    lease: LeaseToken,
    state: HandleState,
    heartbeat: Option<Heartbeat>,
    lost: Arc<AtomicBool>,
}

impl LockHandle {
    /// Makes a single acquisition attempt against the store.
    pub fn acquire(
        store: LockStoreRef,
        observer: LockObserverRef,
        namespace: ServiceNamespace,
        key: &ResourceKey,
    ) -> Result<Self> {
        let lease = store.try_acquire(namespace, key)?;
        let lost = Arc::new(AtomicBool::new(false));

        let heartbeat = match store.lease_ttl() {
            Some(ttl) => {
                let started = Heartbeat::start(
                    store.clone(),
                    observer.clone(),
                    lease.clone(),
                    ttl,
                    lost.clone(),
                );
                match started {
                    Ok(heartbeat) => Some(heartbeat),
                    Err(e) => {
                        let _ = store.release(&lease);
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            store,
            observer,
            lease,
            state: HandleState::Held,
            heartbeat,
            lost,
        })
    }

    pub fn namespace(&self) -> ServiceNamespace {
        self.lease.namespace
    }

    pub fn key(&self) -> &ResourceKey {
        &self.lease.key
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == HandleState::Held
    }

    /// Whether the store reported the lease gone or taken over while held.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Gives the lease back to the store.
    ///
    /// Only the first call reaches the store. A failing release is reported to
    /// the observer and otherwise ignored: the store's lease expiry reclaims
    /// whatever was left behind.
    pub fn release(&mut self) {
        if self.state == HandleState::Released {
            return;
        }
        self.state = HandleState::Released;

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }

        let event = match self.store.release(&self.lease) {
            Ok(()) => LockEvent::Released {
                namespace: self.lease.namespace,
                key: self.lease.key.clone(),
            },
            Err(e) => LockEvent::ReleaseFailed {
                namespace: self.lease.namespace,
                key: self.lease.key.clone(),
                reason: e.to_string(),
            },
        };
        self.observer.on_event(&event);
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("lease", &self.lease)
            .field("state", &self.state)
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// Background renewal for one lease. Dropping the sender stops it.
struct Heartbeat {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Heartbeat {
    fn start(
        store: LockStoreRef,
        observer: LockObserverRef,
        lease: LeaseToken,
        ttl: Duration,
        lost: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let every = (ttl / 3).max(Duration::from_millis(1));

        let thread = thread::Builder::new()
            .name("payguard-heartbeat".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(every) {
                    match store.renew(&lease) {
                        Ok(()) => {}
                        Err(LockError::LeaseLost { .. }) => {
                            lost.store(true, Ordering::SeqCst);
                            observer.on_event(&LockEvent::LeaseLost {
                                namespace: lease.namespace,
                                key: lease.key.clone(),
                            });
                            return;
                        }
                        Err(e) => observer.on_event(&LockEvent::RenewFailed {
                            namespace: lease.namespace,
                            key: lease.key.clone(),
                            reason: e.to_string(),
                        }),
                    }
                }
            })?;

        Ok(Self { stop, thread })
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.thread.join();
    }
}
