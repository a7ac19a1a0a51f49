//! Bounded retry around any quote provider.
//!
//! Each attempt runs on a worker thread so a hung provider cannot hold the
//! heartbeat past the overall deadline. Exhausted attempts or an expired
//! deadline report the symbol unavailable; no earlier value is reused.
//!
//! A worker that outlives its deadline keeps running until the provider
//! returns. At most [`MAX_IN_FLIGHT`] workers exist per wrapper; further
//! attempts fail fast as unavailable until one of them finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::error::PredledgerError;
use crate::domain::quote::Quote;
use crate::ports::quote_port::QuotePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            timeout: Duration::from_millis(5000),
        }
    }
}

pub const MAX_IN_FLIGHT: usize = 4;

pub struct RetryingQuotes<Q> {
    inner: Arc<Q>,
    policy: RetryPolicy,
    in_flight: Arc<AtomicUsize>,
}

/// Releases a worker slot when the worker thread ends.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<Q> RetryingQuotes<Q>
where
    Q: QuotePort + Send + Sync + 'static,
{
    pub fn new(inner: Q, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(inner),
            policy,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Worker threads still waiting on the provider.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn attempt(&self, symbol: &str, remaining: Duration) -> Result<Quote, PredledgerError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= MAX_IN_FLIGHT {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(PredledgerError::unavailable(
                symbol,
                "too many quote requests still in flight",
            ));
        }
        let slot = Slot(Arc::clone(&self.in_flight));

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = symbol.to_string();
        thread::spawn(move || {
            let _slot = slot;
            // receiver may be gone after a timeout
            let _ = tx.send(inner.get_price(&owned));
        });
        rx.recv_timeout(remaining)
            .unwrap_or_else(|_| Err(PredledgerError::unavailable(symbol, "quote request timed out")))
    }
}

impl<Q> QuotePort for RetryingQuotes<Q>
where
    Q: QuotePort + Send + Sync + 'static,
{
    fn get_price(&self, symbol: &str) -> Result<Quote, PredledgerError> {
        let deadline = Instant::now() + self.policy.timeout;
        let attempts = self.policy.max_attempts.max(1);
        let mut last_err = PredledgerError::unavailable(symbol, "no attempt made");

        for attempt in 1..=attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.attempt(symbol, remaining) {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    debug!(symbol = %symbol, attempt, error = %e, "quote attempt failed");
                    last_err = e;
                }
            }
            if attempt < attempts {
                let pause = self
                    .policy
                    .backoff
                    .min(deadline.saturating_duration_since(Instant::now()));
                thread::sleep(pause);
            }
        }

        Err(match last_err {
            e if e.is_unavailable() => e,
            other => PredledgerError::unavailable(symbol, other.to_string()),
        })
    }
}
