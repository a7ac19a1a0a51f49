//! Simulated positions opened against predictions.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::prediction::{Direction, PredictionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    ClosedWin,
    ClosedLoss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub prediction_id: String,
    pub asset: String,
    pub direction: Direction,
    pub units: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop: f64,
    pub target: f64,
    pub status: PositionStatus,
    /// Best unrealized P&L seen while open (>= 0).
    pub max_favorable_excursion: f64,
    /// Worst unrealized P&L seen while open (<= 0).
    pub max_adverse_excursion: f64,
    pub opened_at: NaiveDateTime,
    #[serde(default)]
    pub closed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Capital committed at entry.
    pub fn notional(&self) -> f64 {
        self.units * self.entry_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.units * price
    }

    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.units * self.direction.sign()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        if self.is_open() {
            self.pnl_at(self.current_price)
        } else {
            0.0
        }
    }

    /// Record a new observation and widen the excursion extremes.
    /// Closed positions are immutable; the call is ignored for them.
    pub fn mark(&mut self, price: f64) {
        if !self.is_open() {
            return;
        }
        self.current_price = price;
        let pnl = self.pnl_at(price);
        if pnl > self.max_favorable_excursion {
            self.max_favorable_excursion = pnl;
        }
        if pnl < self.max_adverse_excursion {
            self.max_adverse_excursion = pnl;
        }
    }

    /// Close at `exit_price`, returning the realized P&L. Returns `None` if
    /// the position was already closed.
    pub fn close(&mut self, exit_price: f64, outcome: PredictionStatus, at: NaiveDateTime) -> Option<f64> {
        if !self.is_open() || !outcome.is_terminal() {
            return None;
        }
        self.mark(exit_price);
        let pnl = self.pnl_at(exit_price);
        self.status = if pnl > 0.0 {
            PositionStatus::ClosedWin
        } else {
            PositionStatus::ClosedLoss
        };
        self.exit_price = Some(exit_price);
        self.closed_at = Some(at);
        self.realized_pnl = Some(pnl);
        Some(pnl)
    }

    /// Per-trade return on committed capital.
    pub fn return_on_notional(&self) -> Option<f64> {
        let pnl = self.realized_pnl?;
        let notional = self.notional();
        if notional > 0.0 { Some(pnl / notional) } else { None }
    }
}
