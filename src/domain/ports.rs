use super::account::{Account, PaymentEvent, PaymentMethod};
use super::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::error::{EventBusError, PaymentApiError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A store of named leases shared by every cooperating worker and process.
///
/// `try_acquire` makes exactly one attempt and fails with
/// [`LockError::Unavailable`](crate::error::LockError::Unavailable) when the
/// resource is held elsewhere or the store cannot be reached. `release` must be
/// idempotent: releasing a lease that is already gone is not an error.
///
/// Stores whose leases expire report their TTL through `lease_ttl`; holders
/// then call `renew` well inside that window. `renew` fails with
/// [`LockError::LeaseLost`](crate::error::LockError::LeaseLost) once the lease
/// is gone or belongs to someone else.
pub trait LockStore: Send + Sync {
    fn try_acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LeaseToken>;
    fn release(&self, lease: &LeaseToken) -> Result<()>;
    fn renew(&self, lease: &LeaseToken) -> Result<()>;

    fn lease_ttl(&self) -> Option<Duration> {
        None
    }
}

pub type LockStoreRef = Arc<dyn LockStore>;

/// Opaque handle on a payment provider plugin. The plugin protocol itself
/// lives elsewhere.
pub trait PaymentPlugin: Send + Sync {
    fn name(&self) -> &str;
}

pub type PaymentPluginRef = Arc<dyn PaymentPlugin>;

pub trait PluginRegistry: Send + Sync {
    /// Looks up a plugin by name; `None` selects the registry's default plugin.
    fn plugin(&self, name: Option<&str>) -> Result<PaymentPluginRef, PaymentApiError>;
}

#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn account_by_key(&self, external_key: &str) -> Result<Account, PaymentApiError>;
}

#[async_trait]
pub trait PaymentMethodDao: Send + Sync {
    async fn payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, PaymentApiError>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn post(&self, event: PaymentEvent) -> Result<(), EventBusError>;
}
