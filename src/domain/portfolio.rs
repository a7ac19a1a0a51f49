//! Simulated fixed-capital ledger.
//!
//! Positions are opened against pending predictions, marked to market on
//! every update, and closed exactly once when the evaluator has resolved the
//! underlying prediction. Realized P&L is posted to `current_balance`, so
//! `current_balance == initial_capital + sum(realized_pnl)` holds throughout.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::metrics::PerformanceMetrics;
use super::position::{Position, PositionStatus};
use super::prediction::{Prediction, PredictionStore};
use super::quote::PriceMap;

/// Sizing rules applied when a position is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingRules {
    pub risk_per_trade: f64,
    pub max_position_fraction: f64,
    pub min_position_value: f64,
}

impl Default for SizingRules {
    fn default() -> Self {
        SizingRules {
            risk_per_trade: 0.02,
            max_position_fraction: 0.20,
            min_position_value: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened { units: f64, notional: f64 },
    AssetAlreadyOpen,
    AlreadyTracked,
    NotPending,
    BelowMinimum { notional: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub marked: Vec<String>,
    pub closed: Vec<String>,
    pub unpriced: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub initial_capital: f64,
    pub current_balance: f64,
    pub available_cash: f64,
    pub total_invested: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub open_positions: usize,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    initial_capital: f64,
    current_balance: f64,
    open: Vec<Position>,
    closed: Vec<Position>,
    #[serde(skip)]
    rules: SizingRules,
}

impl Ledger {
    pub fn new(initial_capital: f64, rules: SizingRules) -> Self {
        Ledger {
            initial_capital,
            current_balance: initial_capital,
            open: Vec::new(),
            closed: Vec::new(),
            rules,
        }
    }

    /// Replace the sizing rules after loading a persisted ledger.
    pub fn set_rules(&mut self, rules: SizingRules) {
        self.rules = rules;
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn current_balance(&self) -> f64 {
        self.current_balance
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    /// Closed trades in close order.
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn has_open(&self, asset: &str) -> bool {
        self.open.iter().any(|p| p.asset == asset)
    }

    fn tracks(&self, prediction_id: &str) -> bool {
        self.open
            .iter()
            .chain(self.closed.iter())
            .any(|p| p.prediction_id == prediction_id)
    }

    pub fn total_invested(&self) -> f64 {
        self.open.iter().map(Position::notional).sum()
    }

    pub fn available_cash(&self) -> f64 {
        self.current_balance - self.total_invested()
    }

    /// Open a position at the prediction's entry level.
    ///
    /// Units are sized so a stop-out loses `risk_per_trade` of the capital
    /// base, scaled by confidence, then capped by the per-position fraction
    /// and by available cash.
    pub fn open_position(&mut self, prediction: &Prediction, now: NaiveDateTime) -> OpenOutcome {
        if !prediction.is_pending() {
            return OpenOutcome::NotPending;
        }
        if self.tracks(&prediction.id) {
            return OpenOutcome::AlreadyTracked;
        }
        if self.has_open(&prediction.asset) {
            info!(
                id = %prediction.id,
                asset = %prediction.asset,
                "position already open for asset, not opening another"
            );
            return OpenOutcome::AssetAlreadyOpen;
        }

        let entry = prediction.entry;
        let capital = self.initial_capital;
        let risk_amount = capital * self.rules.risk_per_trade;
        let risk_per_unit = (entry - prediction.stop).abs();
        let confidence_mult = (f64::from(prediction.confidence) / 100.0).clamp(0.5, 1.0);

        let mut units = if risk_per_unit > 0.0 {
            risk_amount / risk_per_unit * confidence_mult
        } else {
            0.0
        };

        let cap = (capital * self.rules.max_position_fraction).min(self.available_cash().max(0.0));
        if units * entry > cap {
            units = cap / entry;
        }

        let notional = units * entry;
        if notional < self.rules.min_position_value {
            info!(
                id = %prediction.id,
                asset = %prediction.asset,
                notional,
                "position below minimum value, not opening"
            );
            return OpenOutcome::BelowMinimum { notional };
        }

        self.open.push(Position {
            prediction_id: prediction.id.clone(),
            asset: prediction.asset.clone(),
            direction: prediction.direction,
            units,
            entry_price: entry,
            current_price: entry,
            stop: prediction.stop,
            target: prediction.target,
            status: PositionStatus::Open,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
            opened_at: now,
            closed_at: None,
            exit_price: None,
            realized_pnl: None,
        });
        info!(
            id = %prediction.id,
            asset = %prediction.asset,
            direction = %prediction.direction,
            units,
            notional,
            "opened position"
        );
        OpenOutcome::Opened { units, notional }
    }

    /// Mark open positions to `prices` and close those whose prediction is
    /// terminal. A missing quote leaves the position untouched.
    pub fn update(
        &mut self,
        prices: &PriceMap,
        predictions: &PredictionStore,
        now: NaiveDateTime,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut still_open = Vec::with_capacity(self.open.len());

        for mut position in std::mem::take(&mut self.open) {
            let outcome = predictions
                .get(&position.prediction_id)
                .filter(|p| p.status.is_terminal());

            if let Some(prediction) = outcome {
                let exit = prediction
                    .close_price
                    .or_else(|| prices.get(&position.asset).map(|q| q.price))
                    .unwrap_or(position.current_price);
                let at = prediction.closed_at.unwrap_or(now);
                if let Some(pnl) = position.close(exit, prediction.status, at) {
                    self.current_balance += pnl;
                    info!(
                        id = %position.prediction_id,
                        asset = %position.asset,
                        exit,
                        pnl,
                        "closed position"
                    );
                    report.closed.push(position.prediction_id.clone());
                    self.closed.push(position);
                    continue;
                }
            }

            match prices.get(&position.asset) {
                Some(quote) => {
                    position.mark(quote.price);
                    report.marked.push(position.prediction_id.clone());
                }
                None => {
                    warn!(
                        id = %position.prediction_id,
                        symbol = %position.asset,
                        "no quote for open position, keeping last mark"
                    );
                    report.unpriced.push(position.prediction_id.clone());
                }
            }
            still_open.push(position);
        }

        self.open = still_open;
        report
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        let realized_pnl: f64 = self.closed.iter().filter_map(|p| p.realized_pnl).sum();
        let unrealized_pnl: f64 = self.open.iter().map(Position::unrealized_pnl).sum();
        let total_pnl = realized_pnl + unrealized_pnl;
        let total_pnl_pct = if self.initial_capital > 0.0 {
            total_pnl / self.initial_capital * 100.0
        } else {
            0.0
        };

        PortfolioSnapshot {
            initial_capital: self.initial_capital,
            current_balance: self.current_balance,
            available_cash: self.available_cash(),
            total_invested: self.total_invested(),
            realized_pnl,
            unrealized_pnl,
            equity: self.current_balance + unrealized_pnl,
            total_pnl,
            total_pnl_pct,
            open_positions: self.open.len(),
            metrics: PerformanceMetrics::compute(&self.closed, self.initial_capital),
            positions: self.open.clone(),
        }
    }
}
