//! Core domain types and logic.

pub mod config_validation;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod heartbeat;
pub mod metrics;
pub mod portfolio;
pub mod position;
pub mod prediction;
pub mod quote;
pub mod regime;
pub mod schedule;
pub mod snapshot;
