//! Quote provider port.

use crate::domain::error::PredledgerError;
use crate::domain::quote::Quote;

/// Source of current prices.
///
/// Implementations return `PredledgerError::DataUnavailable` when no fresh
/// price exists. They must never make one up.
pub trait QuotePort {
    fn get_price(&self, symbol: &str) -> Result<Quote, PredledgerError>;
}
