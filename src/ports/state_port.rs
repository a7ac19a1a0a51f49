//! Persistence port: engine state plus the per-date documents exchanged
//! with upstream producers and downstream readers.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::domain::engine::EngineState;
use crate::domain::error::PredledgerError;
use crate::domain::prediction::SignalDraft;
use crate::domain::regime::SentimentStage;
use crate::domain::snapshot::{LiveState, StageEntry};

pub trait StatePort {
    /// `Ok(None)` when nothing has been committed yet.
    fn load_state(&self) -> Result<Option<EngineState>, PredledgerError>;

    /// Replace the whole engine state atomically. Readers observe either the
    /// previous or the new document, never a mix.
    fn commit_state(&self, state: &EngineState) -> Result<(), PredledgerError>;

    /// Upstream signals for `date`; empty when none were dropped.
    fn load_inbox(&self, date: NaiveDate) -> Result<Vec<SignalDraft>, PredledgerError>;

    /// Upstream sentiment stages for `date`; empty when absent.
    fn load_sentiment(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, SentimentStage>, PredledgerError>;

    fn append_stage(&self, date: NaiveDate, entry: &StageEntry) -> Result<(), PredledgerError>;

    fn load_stages(&self, date: NaiveDate) -> Result<Vec<StageEntry>, PredledgerError>;

    fn publish_live_state(&self, live: &LiveState) -> Result<(), PredledgerError>;

    fn load_live_state(&self) -> Result<Option<LiveState>, PredledgerError>;
}
