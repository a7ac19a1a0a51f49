//! CSV price-cache quote adapter.
//!
//! Reads `symbol,price,timestamp[,low,high]` rows written by an upstream
//! feed. The newest row per symbol wins; rows older than `max_age` are
//! reported unavailable rather than served.

use chrono::{Duration, NaiveDateTime};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::error::PredledgerError;
use crate::domain::quote::Quote;
use crate::ports::clock_port::Clock;
use crate::ports::quote_port::QuotePort;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

pub struct CsvQuoteAdapter {
    path: PathBuf,
    max_age: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

fn parse_price(raw: Option<&str>, column: &str) -> Result<Option<f64>, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|e| format!("invalid {column} value '{s}': {e}")),
    }
}

impl CsvQuoteAdapter {
    pub fn new(path: PathBuf, max_age: Duration, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            path,
            max_age,
            clock,
        }
    }

    /// Newest row for `symbol`, if any.
    fn latest_row(&self, symbol: &str) -> Result<Option<(NaiveDateTime, Quote)>, PredledgerError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            PredledgerError::unavailable(symbol, format!("failed to read {}: {e}", self.path.display()))
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut latest: Option<(NaiveDateTime, Quote)> = None;

        for result in rdr.records() {
            let record = result
                .map_err(|e| PredledgerError::unavailable(symbol, format!("CSV parse error: {e}")))?;

            match record.get(0) {
                Some(s) if s.trim().eq_ignore_ascii_case(symbol) => {}
                _ => continue,
            }

            let row = (|| -> Result<(NaiveDateTime, Quote), String> {
                let price = parse_price(record.get(1), "price")?.ok_or("missing price column")?;
                let ts_raw = record.get(2).ok_or("missing timestamp column")?;
                let ts = parse_timestamp(ts_raw).ok_or_else(|| format!("invalid timestamp '{ts_raw}'"))?;
                let low = parse_price(record.get(3), "low")?.unwrap_or(price);
                let high = parse_price(record.get(4), "high")?.unwrap_or(price);
                Ok((ts, Quote::range(price, low, high)))
            })()
            .map_err(|reason| PredledgerError::unavailable(symbol, reason))?;

            if latest.is_none_or(|(ts, _)| row.0 >= ts) {
                latest = Some(row);
            }
        }

        Ok(latest)
    }
}

impl QuotePort for CsvQuoteAdapter {
    fn get_price(&self, symbol: &str) -> Result<Quote, PredledgerError> {
        let (ts, quote) = self
            .latest_row(symbol)?
            .ok_or_else(|| PredledgerError::unavailable(symbol, "no row in price cache"))?;

        let age = self.clock.now() - ts;
        if age > self.max_age {
            return Err(PredledgerError::unavailable(
                symbol,
                format!("stale quote, {} minutes old", age.num_minutes()),
            ));
        }
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn adapter(content: &str) -> (NamedTempFile, CsvQuoteAdapter) {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        let adapter = CsvQuoteAdapter::new(
            file.path().to_path_buf(),
            Duration::minutes(60),
            Arc::new(FixedClock(noon())),
        );
        (file, adapter)
    }

    #[test]
    fn reads_latest_fresh_row() {
        let (_f, a) = adapter(
            "symbol,price,timestamp\n\
             BTC,100.0,2025-03-10T11:00:00\n\
             BTC,104.5,2025-03-10T11:45:00\n\
             ETH,3000,2025-03-10 11:50:00\n",
        );
        assert_eq!(a.get_price("BTC").unwrap(), Quote::point(104.5));
        assert_eq!(a.get_price("ETH").unwrap().price, 3000.0);
    }

    #[test]
    fn optional_range_columns() {
        let (_f, a) = adapter(
            "symbol,price,timestamp,low,high\n\
             SPX,5010,2025-03-10T11:30:00,4980,5020\n",
        );
        let q = a.get_price("SPX").unwrap();
        assert_eq!((q.low, q.high), (4980.0, 5020.0));
    }

    #[test]
    fn stale_row_is_unavailable() {
        let (_f, a) = adapter("symbol,price,timestamp\nBTC,100,2025-03-10T09:00:00\n");
        let err = a.get_price("BTC").unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("stale"));
    }

    #[test]
    fn unknown_symbol_is_unavailable() {
        let (_f, a) = adapter("symbol,price,timestamp\nBTC,100,2025-03-10T11:30:00\n");
        assert!(a.get_price("GOLD").unwrap_err().is_unavailable());
    }

    #[test]
    fn malformed_price_is_unavailable() {
        let (_f, a) = adapter("symbol,price,timestamp\nBTC,abc,2025-03-10T11:30:00\n");
        let err = a.get_price("BTC").unwrap_err();
        assert!(err.to_string().contains("invalid price"));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let a = CsvQuoteAdapter::new(
            PathBuf::from("/nonexistent/quotes.csv"),
            Duration::minutes(60),
            Arc::new(FixedClock(noon())),
        );
        assert!(a.get_price("BTC").unwrap_err().is_unavailable());
    }
}
