//! Performance metrics derived from closed-trade history.
//!
//! Everything here is recomputed from the ordered history on each call.
//! Metrics that need a larger sample than is available are `None`.

use serde::{Deserialize, Serialize};

use super::position::Position;

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub closed_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub win_rate: Option<f64>,
    pub avg_win: Option<f64>,
    pub avg_loss: Option<f64>,
    pub largest_win: Option<f64>,
    pub largest_loss: Option<f64>,
    pub profit_factor: Option<f64>,
    /// Largest peak-to-trough decline as a fraction of the peak.
    pub max_drawdown: Option<f64>,
    pub max_drawdown_amount: Option<f64>,
    pub sharpe_ratio: Option<f64>,
}

impl PerformanceMetrics {
    /// `closed` must be in close order; open positions are ignored.
    pub fn compute(closed: &[Position], initial_capital: f64) -> Self {
        let pnls: Vec<f64> = closed.iter().filter_map(|p| p.realized_pnl).collect();
        let closed_count = pnls.len();

        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win: Option<f64> = None;
        let mut largest_loss: Option<f64> = None;

        for &pnl in &pnls {
            if pnl > 0.0 {
                wins += 1;
                gross_profit += pnl;
                largest_win = Some(largest_win.map_or(pnl, |w| w.max(pnl)));
            } else {
                losses += 1;
                gross_loss += pnl.abs();
                largest_loss = Some(largest_loss.map_or(pnl.abs(), |l| l.max(pnl.abs())));
            }
        }

        let win_rate = (closed_count > 0).then(|| wins as f64 / closed_count as f64);
        let avg_win = (wins > 0).then(|| gross_profit / wins as f64);
        let avg_loss = (losses > 0).then(|| gross_loss / losses as f64);
        let profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);

        let (max_drawdown, max_drawdown_amount) = match compute_drawdown(initial_capital, &pnls) {
            Some((pct, amount)) => (Some(pct), Some(amount)),
            None => (None, None),
        };

        PerformanceMetrics {
            closed_count,
            wins,
            losses,
            gross_profit,
            gross_loss,
            win_rate,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            max_drawdown,
            max_drawdown_amount,
            sharpe_ratio: compute_sharpe(closed),
        }
    }
}

/// Walk the equity curve `initial + cumulative pnl` and return the largest
/// decline from a running peak as (fraction of peak, amount).
fn compute_drawdown(initial_capital: f64, pnls: &[f64]) -> Option<(f64, f64)> {
    if pnls.is_empty() {
        return None;
    }

    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    let mut max_dd_amount = 0.0_f64;

    for pnl in pnls {
        equity += pnl;
        if equity > peak {
            peak = equity;
        } else {
            let amount = peak - equity;
            if amount > max_dd_amount {
                max_dd_amount = amount;
            }
            if peak > 0.0 {
                let dd = amount / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }
    }

    Some((max_dd, max_dd_amount))
}

/// Mean over sample stdev of per-trade returns, annualised by the observed
/// trade frequency.
fn compute_sharpe(closed: &[Position]) -> Option<f64> {
    let returns: Vec<f64> = closed.iter().filter_map(Position::return_on_notional).collect();
    if returns.len() < 2 {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();
    if stddev <= 0.0 || !stddev.is_finite() {
        return None;
    }

    let first_open = closed.iter().map(|p| p.opened_at).min()?;
    let last_close = closed.iter().filter_map(|p| p.closed_at).max()?;
    let span_days = ((last_close - first_open).num_seconds() as f64 / 86_400.0).max(1.0);
    let trades_per_year = n / (span_days / DAYS_PER_YEAR);

    Some(mean / stddev * trades_per_year.sqrt())
}
