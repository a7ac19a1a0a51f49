//! predledger: live prediction verification and simulated portfolio engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], entry point in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
