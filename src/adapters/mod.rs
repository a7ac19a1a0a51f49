//! Concrete adapter implementations for ports.

pub mod csv_quote_adapter;
pub mod file_config_adapter;
pub mod json_state_adapter;
pub mod retry_quote;
#[cfg(feature = "sqlite")]
pub mod sqlite_state_adapter;
pub mod system_clock;
