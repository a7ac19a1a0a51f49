//! Read-only documents published for downstream consumers.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::evaluation::EvaluationResult;
use super::portfolio::PortfolioSnapshot;
use super::regime::{RegimeLabel, Sentiment};

/// Latest-only external snapshot, overwritten after every successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub job: String,
    pub sentiment: Sentiment,
    pub regime: RegimeLabel,
    /// Assets with a quote this tick.
    pub assets: Vec<String>,
    pub signals: EvaluationResult,
    pub risk: PortfolioSnapshot,
}

/// One entry of the append-only per-day stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: String,
    pub timestamp: NaiveDateTime,
    pub sentiment: Sentiment,
    pub assets: Vec<String>,
    pub evaluation: EvaluationResult,
}
