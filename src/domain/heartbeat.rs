//! The heartbeat loop: poll the gate, run due jobs, persist, publish.
//!
//! Each job runs against a copy of the engine state. The copy replaces the
//! live state only after it has been committed, so a failure anywhere in the
//! pipeline leaves the previous tick's persisted state untouched.

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use super::engine::{EngineConfig, EngineState};
use super::error::PredledgerError;
use super::evaluation::{EvaluationResult, evaluate, settle_carried};
use super::portfolio::PortfolioSnapshot;
use super::quote::fetch_prices;
use super::regime::{RegimeLabel, RegimeReading, Sentiment, latest_sentiment};
use super::schedule::{MarkOutcome, ScheduleGate};
use super::snapshot::{LiveState, StageEntry};
use crate::ports::clock_port::Clock;
use crate::ports::quote_port::QuotePort;
use crate::ports::state_port::StatePort;

/// Output of one successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub job: String,
    pub evaluation: EvaluationResult,
    pub portfolio: PortfolioSnapshot,
    pub regime: RegimeLabel,
    pub sentiment: Sentiment,
    pub assets: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub due: Vec<String>,
    pub completed: Vec<JobOutput>,
    pub failed: Vec<(String, PredledgerError)>,
}

pub struct Heartbeat<'a> {
    config: EngineConfig,
    gate: ScheduleGate,
    quotes: &'a dyn QuotePort,
    store: &'a dyn StatePort,
    clock: &'a dyn Clock,
    state: EngineState,
}

impl<'a> Heartbeat<'a> {
    /// Load the persisted state, or start fresh when none exists.
    pub fn new(
        config: EngineConfig,
        quotes: &'a dyn QuotePort,
        store: &'a dyn StatePort,
        clock: &'a dyn Clock,
    ) -> Result<Self, PredledgerError> {
        let state = match store.load_state()? {
            Some(state) => state.restore(&config)?,
            None => {
                info!(capital = config.initial_capital, "no saved state, starting fresh");
                EngineState::new(&config)
            }
        };
        let gate = ScheduleGate::new(config.jobs(), config.gate);
        Ok(Heartbeat {
            config,
            gate,
            quotes,
            store,
            clock,
            state,
        })
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn gate(&self) -> &ScheduleGate {
        &self.gate
    }

    /// One poll: decide, then run every due job in order.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let flags_before = self.state.flags.clone();
        let due = self.gate.decide(&mut self.state.flags, now);
        let mut report = TickReport {
            due: due.clone(),
            ..TickReport::default()
        };

        if due.is_empty() {
            if self.state.flags != flags_before {
                if let Err(e) = self.store.commit_state(&self.state) {
                    warn!(tick = %now, error = %e, "failed to persist schedule flags");
                }
            }
            return report;
        }

        for job in due {
            self.gate.record_attempt(&mut self.state.flags, &job, now);
            let mut working = self.state.clone();

            match self.run_job(&mut working, &job, now) {
                Ok(output) => {
                    self.state = working;
                    self.publish(&output, now);
                    info!(
                        job = %job,
                        tick = %now,
                        hits = output.evaluation.hits,
                        misses = output.evaluation.misses,
                        pending = output.evaluation.pending,
                        regime = %output.regime.state,
                        "job completed"
                    );
                    report.completed.push(output);
                }
                Err(e) => {
                    error!(job = %job, tick = %now, error = %e, "job failed, results discarded");
                    if let Err(commit_err) = self.store.commit_state(&self.state) {
                        warn!(
                            job = %job,
                            tick = %now,
                            error = %commit_err,
                            "failed to persist attempt time"
                        );
                    }
                    report.failed.push((job, e));
                }
            }
        }
        report
    }

    fn run_job(
        &self,
        state: &mut EngineState,
        job: &str,
        now: NaiveDateTime,
    ) -> Result<JobOutput, PredledgerError> {
        let today = now.date();
        let window = self.config.tracking_window_days;

        let drafts = self.store.load_inbox(today)?;
        let ingest = state.predictions.ingest(&drafts, now);
        for skipped in &ingest.skipped {
            warn!(job = %job, asset = %skipped.asset, reason = %skipped.reason, "skipping invalid signal");
        }
        for id in &ingest.added {
            if let Some(prediction) = state.predictions.get(id) {
                state.ledger.open_position(prediction, now);
            }
        }

        let mut symbols = state.predictions.pending_assets(today, window);
        symbols.extend(state.ledger.open_positions().iter().map(|p| p.asset.clone()));
        symbols.sort();
        symbols.dedup();

        let fetch = fetch_prices(self.quotes, &symbols);
        let evaluation = evaluate(&mut state.predictions, &fetch.prices, now, window);
        let carried: Vec<String> = state
            .ledger
            .open_positions()
            .iter()
            .map(|p| p.prediction_id.clone())
            .collect();
        settle_carried(&mut state.predictions, &carried, &fetch.prices, now, window);
        state.ledger.update(&fetch.prices, &state.predictions, now);

        let sentiment = match self.store.load_sentiment(today) {
            Ok(stages) => latest_sentiment(&stages),
            Err(e) => {
                warn!(job = %job, error = %e, "sentiment unreadable, using neutral");
                Sentiment::Neutral
            }
        };
        state
            .regime
            .push(RegimeReading::new(now, evaluation.accuracy_pct, sentiment));

        if self.gate.mark_sent(&mut state.flags, job, now) == MarkOutcome::AlreadySent {
            debug!(job = %job, "flag already marked today");
        }

        self.store.commit_state(state)?;
        debug!(job = %job, tick = %now, predictions = state.predictions.len(), "state committed");

        Ok(JobOutput {
            job: job.to_string(),
            evaluation,
            portfolio: state.ledger.snapshot(),
            regime: state.regime.classify(),
            sentiment,
            assets: fetch.prices.keys().cloned().collect(),
        })
    }

    /// Stage log and live snapshot are derived documents; a failure here is
    /// logged and repaired by the next successful job.
    fn publish(&self, output: &JobOutput, now: NaiveDateTime) {
        let stage = StageEntry {
            stage: output.job.clone(),
            timestamp: now,
            sentiment: output.sentiment,
            assets: output.assets.clone(),
            evaluation: output.evaluation.clone(),
        };
        if let Err(e) = self.store.append_stage(now.date(), &stage) {
            warn!(job = %output.job, error = %e, "failed to append stage entry");
        }

        let live = LiveState {
            date: now.date(),
            timestamp: now,
            job: output.job.clone(),
            sentiment: output.sentiment,
            regime: output.regime.clone(),
            assets: output.assets.clone(),
            signals: output.evaluation.clone(),
            risk: output.portfolio.clone(),
        };
        if let Err(e) = self.store.publish_live_state(&live) {
            warn!(job = %output.job, error = %e, "failed to publish live state");
        }
    }

    /// Tick every `poll` until `stop` returns true.
    pub fn run_until(&mut self, poll: std::time::Duration, mut stop: impl FnMut() -> bool) {
        info!(poll_secs = poll.as_secs(), jobs = self.gate.jobs().len(), "heartbeat started");
        while !stop() {
            let report = self.tick();
            if !report.due.is_empty() {
                debug!(
                    due = report.due.len(),
                    completed = report.completed.len(),
                    failed = report.failed.len(),
                    "tick finished"
                );
            }
            std::thread::sleep(poll);
        }
        info!("heartbeat stopped");
    }

    pub fn run_forever(&mut self, poll: std::time::Duration) {
        self.run_until(poll, || false);
    }
}
