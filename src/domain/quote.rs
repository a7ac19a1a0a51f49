//! Price observations and price-map collection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::ports::quote_port::QuotePort;

/// One observation of an asset: the last price plus the low/high seen since
/// the previous observation. A point quote has `low == high == price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub low: f64,
    pub high: f64,
}

impl Quote {
    pub fn point(price: f64) -> Self {
        Quote {
            price,
            low: price,
            high: price,
        }
    }

    /// Range quote; `low`/`high` are widened to include `price`.
    pub fn range(price: f64, low: f64, high: f64) -> Self {
        Quote {
            price,
            low: low.min(price),
            high: high.max(price),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.low > 0.0 && self.high.is_finite()
    }
}

pub type PriceMap = BTreeMap<String, Quote>;

/// Result of asking the quote provider for a set of symbols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceFetch {
    pub prices: PriceMap,
    pub unavailable: Vec<String>,
}

/// Query every symbol once. Unavailable symbols are logged and left out of
/// the map; nothing is substituted for them.
pub fn fetch_prices(quotes: &dyn QuotePort, symbols: &[String]) -> PriceFetch {
    let mut fetch = PriceFetch::default();
    for symbol in symbols {
        match quotes.get_price(symbol) {
            Ok(quote) if quote.is_valid() => {
                fetch.prices.insert(symbol.clone(), quote);
            }
            Ok(quote) => {
                warn!(symbol = %symbol, price = quote.price, "discarding invalid quote");
                fetch.unavailable.push(symbol.clone());
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "quote unavailable, leaving pending");
                fetch.unavailable.push(symbol.clone());
            }
        }
    }
    fetch
}
