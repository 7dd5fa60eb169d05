//! Account-scoped critical sections for payment operations.
//!
//! Every payment-affecting operation on an account runs while holding a named
//! lease for that account's key, taken from a [`LockStore`](domain::ports::LockStore)
//! that all cooperating workers and processes share. Acquisition is retried a
//! bounded number of times and the lease is released on every exit path.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod observability;
pub mod testing;
