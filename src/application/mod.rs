//! Application layer: the lock discipline wrapped around units of work.
//!
//! Leaves first: [`handle::LockHandle`] holds a lease,
//! [`acquirer::RetryingAcquirer`] obtains one with bounded retries,
//! [`runner::CriticalSectionRunner`] runs work under it and
//! [`submitter::TaskSubmitter`] moves that onto a bounded worker pool.
//! [`processor::PaymentProcessor`] is the payment-facing surface built on top.

pub mod acquirer;
pub mod context;
pub mod handle;
pub mod processor;
pub mod runner;
pub mod submitter;
