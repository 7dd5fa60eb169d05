use crate::domain::account::{Account, PaymentEvent, PaymentMethod};
use crate::domain::lock::{LeaseToken, ResourceKey, ServiceNamespace};
use crate::domain::ports::{
    AccountApi, EventBus, LockStore, PaymentMethodDao, PaymentPlugin, PaymentPluginRef,
    PluginRegistry,
};
use crate::error::{EventBusError, LockError, PaymentApiError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// A lock store local to this process.
///
/// Uses `DashMap` so the check-and-insert for a key happens under that key's
/// shard lock. Leases expire after the configured TTL and can then be taken
/// over by another caller. `Clone` shares the underlying table.
#[derive(Clone)]
pub struct InMemoryLockStore {
    leases: Arc<DashMap<(ServiceNamespace, ResourceKey), Lease>>,
    ttl: Duration,
}

impl InMemoryLockStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Whether a live lease exists for the pair.
    pub fn is_held(&self, namespace: ServiceNamespace, key: &ResourceKey) -> bool {
        self.leases
            .get(&(namespace, key.clone()))
            .is_some_and(|lease| !lease.is_expired())
    }

    /// Number of leases currently recorded, expired ones included.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire(&self, namespace: ServiceNamespace, key: &ResourceKey) -> Result<LeaseToken> {
        let token = LeaseToken::new(namespace, key.clone());
        let lease = Lease {
            owner: token.owner,
            expires_at: Instant::now() + self.ttl,
        };

        match self.leases.entry((namespace, key.clone())) {
            Entry::Occupied(mut held) => {
                if !held.get().is_expired() {
                    return Err(LockError::unavailable(
                        namespace,
                        key.as_str(),
                        "held by another owner",
                    ));
                }
                held.insert(lease);
            }
            Entry::Vacant(free) => {
                free.insert(lease);
            }
        }
        Ok(token)
    }

    fn release(&self, lease: &LeaseToken) -> Result<()> {
        self.leases
            .remove_if(&(lease.namespace, lease.key.clone()), |_, held| {
                held.owner == lease.owner
            });
        Ok(())
    }

    fn renew(&self, lease: &LeaseToken) -> Result<()> {
        match self.leases.get_mut(&(lease.namespace, lease.key.clone())) {
            Some(mut held) if held.owner == lease.owner => {
                held.expires_at = Instant::now() + self.ttl;
                Ok(())
            }
            _ => Err(LockError::lease_lost(lease.namespace, lease.key.as_str())),
        }
    }

    fn lease_ttl(&self) -> Option<Duration> {
        Some(self.ttl)
    }
}

/// A thread-safe in-memory account directory keyed by external key.
#[derive(Default, Clone)]
pub struct InMemoryAccountApi {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl InMemoryAccountApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.external_key.clone(), account);
    }
}

#[async_trait]
impl AccountApi for InMemoryAccountApi {
    async fn account_by_key(&self, external_key: &str) -> Result<Account, PaymentApiError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(external_key)
            .cloned()
            .ok_or_else(|| PaymentApiError::AccountNotFound(external_key.to_string()))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentMethodDao {
    methods: Arc<RwLock<HashMap<Uuid, PaymentMethod>>>,
}

impl InMemoryPaymentMethodDao {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, method: PaymentMethod) {
        let mut methods = self.methods.write().await;
        methods.insert(method.id, method);
    }
}

#[async_trait]
impl PaymentMethodDao for InMemoryPaymentMethodDao {
    async fn payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, PaymentApiError> {
        let methods = self.methods.read().await;
        Ok(methods.get(&id).cloned())
    }
}

#[derive(Debug)]
struct NamedPlugin(String);

impl PaymentPlugin for NamedPlugin {
    fn name(&self) -> &str {
        &self.0
    }
}

/// Registry of plugins known only by name, with one of them as the default.
pub struct InMemoryPluginRegistry {
    default_plugin: String,
    plugins: HashMap<String, PaymentPluginRef>,
}

impl InMemoryPluginRegistry {
    pub fn new(default_plugin: impl Into<String>) -> Self {
        let default_plugin = default_plugin.into();
        let mut plugins: HashMap<String, PaymentPluginRef> = HashMap::new();
        plugins.insert(
            default_plugin.clone(),
            Arc::new(NamedPlugin(default_plugin.clone())),
        );
        Self {
            default_plugin,
            plugins,
        }
    }

    pub fn with_plugin(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let plugin = Arc::new(NamedPlugin(name.clone()));
        self.register(name, plugin)
    }

    pub fn register(mut self, name: impl Into<String>, plugin: PaymentPluginRef) -> Self {
        self.plugins.insert(name.into(), plugin);
        self
    }
}

impl PluginRegistry for InMemoryPluginRegistry {
    fn plugin(&self, name: Option<&str>) -> Result<PaymentPluginRef, PaymentApiError> {
        let name = name.unwrap_or(self.default_plugin.as_str());
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| PaymentApiError::UnknownPlugin(name.to_string()))
    }
}

/// Collects posted events; can be switched into a failing mode.
#[derive(Default, Clone)]
pub struct InMemoryEventBus {
    events: Arc<RwLock<Vec<PaymentEvent>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_posts(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<PaymentEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn post(&self, event: PaymentEvent) -> Result<(), EventBusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventBusError(format!(
                "bus unavailable for {}",
                event.event_type
            )));
        }
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::new(raw).unwrap()
    }

    #[test]
    fn test_in_memory_lock_exclusion() {
        let store = InMemoryLockStore::new(Duration::from_secs(30));
        let lease = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();

        assert!(store.is_held(ServiceNamespace::Payment, &key("acct-1")));
        assert!(matches!(
            store.try_acquire(ServiceNamespace::Payment, &key("acct-1")),
            Err(LockError::Unavailable { .. })
        ));

        store.release(&lease).unwrap();
        assert!(!store.is_held(ServiceNamespace::Payment, &key("acct-1")));
        assert!(store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .is_ok());
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let store = InMemoryLockStore::new(Duration::from_secs(30));
        store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        assert!(store
            .try_acquire(ServiceNamespace::Invoice, &key("acct-1"))
            .is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let store = InMemoryLockStore::new(Duration::ZERO);
        let stale = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        let fresh = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        assert_ne!(stale.owner, fresh.owner);

        // The stale holder must not be able to drop the new owner's lease.
        store.release(&stale).unwrap();
        assert_eq!(store.len(), 1);
        store.release(&fresh).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_renew_extends_only_own_lease() {
        let store = InMemoryLockStore::new(Duration::from_millis(100));
        let lease = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(40));
            store.renew(&lease).unwrap();
        }
        assert!(store.is_held(ServiceNamespace::Payment, &key("acct-1")));

        std::thread::sleep(Duration::from_millis(150));
        let thief = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        assert!(matches!(
            store.renew(&lease),
            Err(LockError::LeaseLost { .. })
        ));
        store.renew(&thief).unwrap();
        assert_eq!(store.lease_ttl(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let store = InMemoryLockStore::new(Duration::from_secs(30));
        let lease = store
            .try_acquire(ServiceNamespace::Payment, &key("acct-1"))
            .unwrap();
        store.release(&lease).unwrap();
        store.release(&lease).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_registry_default_and_unknown() {
        let registry = InMemoryPluginRegistry::new("default").with_plugin("paypal");
        assert_eq!(registry.plugin(None).unwrap().name(), "default");
        assert_eq!(registry.plugin(Some("paypal")).unwrap().name(), "paypal");
        assert!(matches!(
            registry.plugin(Some("adyen")),
            Err(PaymentApiError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_account_api() {
        let api = InMemoryAccountApi::new();
        let account = Account::new("acct-7");
        api.insert(account.clone()).await;

        assert_eq!(api.account_by_key("acct-7").await.unwrap(), account);
        assert!(matches!(
            api.account_by_key("acct-8").await,
            Err(PaymentApiError::AccountNotFound(_))
        ));
    }
}
