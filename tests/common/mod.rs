#![allow(dead_code)]

use payguard::application::context::LockContext;
use payguard::config::Backoff;
use payguard::domain::lock::ResourceKey;
use payguard::domain::ports::LockStoreRef;
use std::time::Duration;

pub use payguard::testing::ScriptedStore;

pub fn key(raw: &str) -> ResourceKey {
    ResourceKey::new(raw).expect("valid resource key")
}

/// A quiet context with a short fixed pause between attempts.
pub fn context(store: LockStoreRef, max_attempts: u32) -> LockContext {
    let mut ctx = payguard::testing::quiet_context(store, max_attempts);
    ctx.config.retry.backoff = Backoff::Fixed {
        delay: Duration::from_millis(2),
    };
    ctx
}
