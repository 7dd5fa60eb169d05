//! Command-line entry points built on the guard.

pub mod cli;
