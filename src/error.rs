use crate::domain::lock::ServiceNamespace;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the lock guard itself, never by the guarded work.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock {namespace}/{key} is unavailable: {reason}")]
    Unavailable {
        namespace: ServiceNamespace,
        key: String,
        reason: String,
    },
    #[error("failed to lock {namespace}/{key} after {attempts} attempts")]
    AcquisitionExhausted {
        namespace: ServiceNamespace,
        key: String,
        attempts: u32,
    },
    #[error("resource key must not be empty")]
    InvalidResourceKey,
    #[error("failed to release lock {namespace}/{key}: {reason}")]
    ReleaseFailed {
        namespace: ServiceNamespace,
        key: String,
        reason: String,
    },
    #[error("lease on {namespace}/{key} was lost to another owner")]
    LeaseLost {
        namespace: ServiceNamespace,
        key: String,
    },
    #[error("task pool saturated: {capacity} tasks already admitted")]
    PoolSaturated { capacity: usize },
    #[error("task for {key} panicked")]
    TaskPanicked { key: String },
    #[error("task for {key} was cancelled")]
    TaskCancelled { key: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

impl LockError {
    pub fn unavailable(
        namespace: ServiceNamespace,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Unavailable {
            namespace,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn release_failed(
        namespace: ServiceNamespace,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::ReleaseFailed {
            namespace,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn lease_lost(namespace: ServiceNamespace, key: impl Into<String>) -> Self {
        Self::LeaseLost {
            namespace,
            key: key.into(),
        }
    }

    /// The resource key this error is about, when it has one.
    pub fn resource_key(&self) -> Option<&str> {
        match self {
            Self::Unavailable { key, .. }
            | Self::AcquisitionExhausted { key, .. }
            | Self::ReleaseFailed { key, .. }
            | Self::LeaseLost { key, .. }
            | Self::TaskPanicked { key }
            | Self::TaskCancelled { key } => Some(key),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::AcquisitionExhausted { .. })
    }
}

pub type Result<T, E = LockError> = std::result::Result<T, E>;

/// Errors surfaced by payment operations.
///
/// Lock failures are folded into `Internal`, while failures produced by the
/// guarded work travel through untouched in whichever variant the work chose.
#[derive(Error, Debug)]
pub enum PaymentApiError {
    #[error("account {0} has no default payment method")]
    NoDefaultPaymentMethod(Uuid),
    #[error("no account found for key {0}")]
    AccountNotFound(String),
    #[error("no payment plugin registered under {0}")]
    UnknownPlugin(String),
    #[error("payment plugin failure: {0}")]
    PluginFailure(String),
    #[error("internal payment error: {0}")]
    Internal(#[from] LockError),
}

impl PaymentApiError {
    /// Returns the lock failure behind this error, if any.
    pub fn lock_error(&self) -> Option<&LockError> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("event bus rejected event: {0}")]
pub struct EventBusError(pub String);
