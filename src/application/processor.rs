use super::context::LockContext;
use super::runner::CriticalSectionRunner;
use super::submitter::{TaskHandle, TaskSubmitter};
use crate::domain::account::{Account, PaymentEvent};
use crate::domain::lock::{ResourceKey, ServiceNamespace};
use crate::domain::ports::{AccountApi, EventBus, PaymentMethodDao, PaymentPluginRef, PluginRegistry};
use crate::error::PaymentApiError;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::error;
use uuid::Uuid;

/// Collaborators every payment operation may reach for.
#[derive(Clone)]
pub struct PaymentCollaborators {
    pub plugin_registry: Arc<dyn PluginRegistry>,
    pub account_api: Arc<dyn AccountApi>,
    pub payment_method_dao: Arc<dyn PaymentMethodDao>,
    pub event_bus: Arc<dyn EventBus>,
}

/// Shared plumbing for payment operations: plugin lookup, event posting and
/// running work under the account's lock.
///
/// All locks taken here live in the [`ServiceNamespace::Payment`] namespace
/// and are keyed by the account's external key.
#[derive(Clone)]
pub struct PaymentProcessor {
    collaborators: PaymentCollaborators,
    runner: CriticalSectionRunner,
    submitter: TaskSubmitter,
}

impl PaymentProcessor {
    pub fn new(collaborators: &PaymentCollaborators, locks: &LockContext, runtime: Handle) -> Self {
        Self {
            collaborators: collaborators.clone(),
            runner: CriticalSectionRunner::new(locks),
            submitter: TaskSubmitter::new(locks, runtime),
        }
    }

    /// Resolves the plugin for the account behind `account_key`, or the
    /// registry default when no key is given.
    pub async fn payment_plugin_for_key(
        &self,
        account_key: Option<&str>,
    ) -> Result<PaymentPluginRef, PaymentApiError> {
        match account_key {
            Some(key) => {
                let account = self.collaborators.account_api.account_by_key(key).await?;
                self.payment_plugin_for_account(Some(&account)).await
            }
            None => self.collaborators.plugin_registry.plugin(None),
        }
    }

    /// Resolves the plugin attached to the account's default payment method.
    pub async fn payment_plugin_for_account(
        &self,
        account: Option<&Account>,
    ) -> Result<PaymentPluginRef, PaymentApiError> {
        let Some(account) = account else {
            return self.collaborators.plugin_registry.plugin(None);
        };
        let Some(payment_method_id) = account.payment_method_id else {
            return Err(PaymentApiError::NoDefaultPaymentMethod(account.id));
        };

        let Some(method) = self
            .collaborators
            .payment_method_dao
            .payment_method(payment_method_id)
            .await?
        else {
            error!(
                account_id = %account.id,
                %payment_method_id,
                "Account has a non existent default payment method"
            );
            return Err(PaymentApiError::NoDefaultPaymentMethod(account.id));
        };

        self.collaborators
            .plugin_registry
            .plugin(Some(&method.plugin_name))
    }

    /// Publishes `event` if there is one. Bus failures are logged and dropped.
    pub async fn post_payment_event(&self, event: Option<PaymentEvent>, account_id: Uuid) {
        let Some(event) = event else {
            return;
        };
        if let Err(e) = self.collaborators.event_bus.post(event).await {
            error!(%account_id, error = %e, "Failed to post payment event");
        }
    }

    /// Runs `work` on the calling thread while holding the account's lock.
    pub fn run_with_account_lock<T, F>(&self, account_key: &str, work: F) -> Result<T, PaymentApiError>
    where
        F: FnOnce() -> Result<T, PaymentApiError>,
    {
        let key = ResourceKey::new(account_key)?;
        self.runner.run(ServiceNamespace::Payment, &key, work)
    }

    /// Queues `work` on the worker pool to run under the account's lock.
    pub fn submit_with_account_lock<T, F>(
        &self,
        account_key: &str,
        work: F,
    ) -> Result<TaskHandle<T, PaymentApiError>, PaymentApiError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, PaymentApiError> + Send + 'static,
    {
        let key = ResourceKey::new(account_key)?;
        self.submitter.submit(ServiceNamespace::Payment, key, work)
    }
}
