//! Domain types and the ports the guard talks to.

pub mod account;
pub mod lock;
pub mod ports;
