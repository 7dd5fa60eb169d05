use crate::application::runner::CriticalSectionRunner;
use crate::domain::lock::{ResourceKey, ServiceNamespace};
use crate::error::{LockError, Result};
use crate::infrastructure::file::{FileLockStore, LeaseRecord};
use std::process::{Command, ExitStatus};
use tracing::info;

/// An external command to run while holding an account's lock.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub namespace: ServiceNamespace,
    pub key: ResourceKey,
    pub program: String,
    pub args: Vec<String>,
}

impl ExecRequest {
    /// Splits `command` into program and arguments. The command must not be empty.
    pub fn new(namespace: ServiceNamespace, key: ResourceKey, command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts.next().ok_or_else(|| {
            LockError::InvalidConfig("no command given to run under the lock".to_string())
        })?;
        Ok(Self {
            namespace,
            key,
            program,
            args: parts.collect(),
        })
    }
}

/// Runs the requested command to completion inside the critical section and
/// returns its exit status. Blocks the calling thread.
pub fn exec_with_lock(runner: &CriticalSectionRunner, request: &ExecRequest) -> Result<ExitStatus> {
    runner.run(request.namespace, &request.key, || {
        info!(
            namespace = %request.namespace,
            key = %request.key,
            program = %request.program,
            "Running command under account lock"
        );
        Command::new(&request.program)
            .args(&request.args)
            .status()
            .map_err(LockError::from)
    })
}

/// State of a lease as reported by `status`.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseStatus {
    Free,
    Held(LeaseRecord),
    Expired(LeaseRecord),
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Held(record) => write!(
                f,
                "held by {} (pid {}) since {} until {}",
                record.owner, record.pid, record.acquired_at, record.expires_at
            ),
            Self::Expired(record) => write!(
                f,
                "expired lease of {} (pid {}) since {}",
                record.owner, record.pid, record.expires_at
            ),
        }
    }
}

pub fn lease_status(
    store: &FileLockStore,
    namespace: ServiceNamespace,
    key: &ResourceKey,
) -> Result<LeaseStatus> {
    Ok(match store.inspect(namespace, key)? {
        None => LeaseStatus::Free,
        Some(record) if record.is_expired() => LeaseStatus::Expired(record),
        Some(record) => LeaseStatus::Held(record),
    })
}
