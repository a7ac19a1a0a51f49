//! Engine configuration and the versioned state document.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use super::error::PredledgerError;
use super::portfolio::{Ledger, SizingRules};
use super::prediction::PredictionStore;
use super::regime::{RegimeConfig, RegimeWindow};
use super::schedule::{FlagBook, GateConfig, HEARTBEAT_JOB, JobSpec};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub tracking_window_days: u32,
    pub initial_capital: f64,
    pub sizing: SizingRules,
    pub regime: RegimeConfig,
    pub gate: GateConfig,
    pub heartbeat_interval: Duration,
    pub poll_interval: std::time::Duration,
    /// Daily content jobs as (name, time of day).
    pub schedule: Vec<(String, NaiveTime)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tracking_window_days: 1,
            initial_capital: 10_000.0,
            sizing: SizingRules::default(),
            regime: RegimeConfig::default(),
            gate: GateConfig::default(),
            heartbeat_interval: Duration::minutes(30),
            poll_interval: std::time::Duration::from_secs(30),
            schedule: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Daily jobs ordered by time, then the heartbeat.
    pub fn jobs(&self) -> Vec<JobSpec> {
        let mut daily: Vec<&(String, NaiveTime)> = self.schedule.iter().collect();
        daily.sort_by_key(|(name, at)| (*at, name.clone()));
        let mut jobs: Vec<JobSpec> = daily
            .into_iter()
            .map(|(name, at)| JobSpec::daily(name.clone(), *at))
            .collect();
        jobs.push(JobSpec::interval(HEARTBEAT_JOB, self.heartbeat_interval));
        jobs
    }
}

/// Everything the heartbeat mutates, committed as one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub version: u32,
    pub predictions: PredictionStore,
    pub ledger: Ledger,
    pub flags: FlagBook,
    pub regime: RegimeWindow,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        EngineState {
            version: STATE_VERSION,
            predictions: PredictionStore::new(),
            ledger: Ledger::new(config.initial_capital, config.sizing.clone()),
            flags: FlagBook::new(),
            regime: RegimeWindow::new(config.regime),
        }
    }

    /// Accept a loaded document and re-apply the non-persisted settings.
    /// The capital base of an existing ledger is kept.
    pub fn restore(mut self, config: &EngineConfig) -> Result<Self, PredledgerError> {
        if self.version > STATE_VERSION {
            return Err(PredledgerError::StateVersion {
                found: self.version,
                supported: STATE_VERSION,
            });
        }
        self.version = STATE_VERSION;
        self.ledger.set_rules(config.sizing.clone());
        self.regime.set_config(config.regime);
        Ok(self)
    }
}
