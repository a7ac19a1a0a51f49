//! Port traits at the I/O seams.

pub mod clock_port;
pub mod config_port;
pub mod quote_port;
pub mod state_port;
