//! JSON directory store.
//!
//! Layout under the state directory:
//! - `engine_state.json`: predictions, ledger, schedule flags, regime window
//! - `live_state.json`: latest published snapshot
//! - `stages_YYYY-MM-DD.json`: per-day stage log
//! - `predictions_YYYY-MM-DD.json`, `sentiment_YYYY-MM-DD.json`: upstream
//!   inputs, read only
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::engine::EngineState;
use crate::domain::error::PredledgerError;
use crate::domain::prediction::SignalDraft;
use crate::domain::regime::SentimentStage;
use crate::domain::snapshot::{LiveState, StageEntry};
use crate::ports::state_port::StatePort;

const ENGINE_STATE_FILE: &str = "engine_state.json";
const LIVE_STATE_FILE: &str = "live_state.json";

#[derive(Deserialize)]
#[serde(untagged)]
enum InboxFile {
    Wrapped { predictions: Vec<SignalDraft> },
    Bare(Vec<SignalDraft>),
}

pub struct JsonStateAdapter {
    dir: PathBuf,
}

impl JsonStateAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PredledgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| PredledgerError::persistence(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dated(&self, prefix: &str, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{prefix}_{}.json", date.format("%Y-%m-%d")))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PredledgerError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PredledgerError> {
        let target = path.display().to_string();
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp).map_err(|e| PredledgerError::persistence(&target, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| PredledgerError::persistence(&target, e))?;
        fs::rename(&tmp, path).map_err(|e| PredledgerError::persistence(&target, e))?;
        Ok(())
    }
}

impl StatePort for JsonStateAdapter {
    fn load_state(&self) -> Result<Option<EngineState>, PredledgerError> {
        Self::read_json(&self.dir.join(ENGINE_STATE_FILE))
    }

    fn commit_state(&self, state: &EngineState) -> Result<(), PredledgerError> {
        Self::write_atomic(&self.dir.join(ENGINE_STATE_FILE), state)
    }

    fn load_inbox(&self, date: NaiveDate) -> Result<Vec<SignalDraft>, PredledgerError> {
        Ok(
            match Self::read_json::<InboxFile>(&self.dated("predictions", date))? {
                Some(InboxFile::Wrapped { predictions }) | Some(InboxFile::Bare(predictions)) => {
                    predictions
                }
                None => Vec::new(),
            },
        )
    }

    fn load_sentiment(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, SentimentStage>, PredledgerError> {
        Ok(Self::read_json(&self.dated("sentiment", date))?.unwrap_or_default())
    }

    fn append_stage(&self, date: NaiveDate, entry: &StageEntry) -> Result<(), PredledgerError> {
        let path = self.dated("stages", date);
        let mut stages: Vec<StageEntry> = Self::read_json(&path)?.unwrap_or_default();
        stages.push(entry.clone());
        Self::write_atomic(&path, &stages)
    }

    fn load_stages(&self, date: NaiveDate) -> Result<Vec<StageEntry>, PredledgerError> {
        Ok(Self::read_json(&self.dated("stages", date))?.unwrap_or_default())
    }

    fn publish_live_state(&self, live: &LiveState) -> Result<(), PredledgerError> {
        Self::write_atomic(&self.dir.join(LIVE_STATE_FILE), live)
    }

    fn load_live_state(&self) -> Result<Option<LiveState>, PredledgerError> {
        Self::read_json(&self.dir.join(LIVE_STATE_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::engine::EngineConfig;
    use crate::domain::evaluation::EvaluationResult;
    use crate::domain::regime::Sentiment;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn adapter() -> (TempDir, JsonStateAdapter) {
        let dir = TempDir::new().unwrap();
        let adapter = JsonStateAdapter::new(dir.path()).unwrap();
        (dir, adapter)
    }

    #[test]
    fn missing_documents_are_empty() {
        let (_d, a) = adapter();
        assert!(a.load_state().unwrap().is_none());
        assert!(a.load_live_state().unwrap().is_none());
        assert!(a.load_inbox(day()).unwrap().is_empty());
        assert!(a.load_sentiment(day()).unwrap().is_empty());
        assert!(a.load_stages(day()).unwrap().is_empty());
    }

    #[test]
    fn commit_then_load_state() {
        let (dir, a) = adapter();
        let state = EngineState::new(&EngineConfig::default());
        a.commit_state(&state).unwrap();
        assert_eq!(a.load_state().unwrap(), Some(state));
        assert!(!dir.path().join("engine_state.json.tmp").exists());
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let (dir, a) = adapter();
        fs::write(dir.path().join(ENGINE_STATE_FILE), "{not json").unwrap();
        assert!(matches!(
            a.load_state().unwrap_err(),
            PredledgerError::Serialization(_)
        ));
    }

    #[test]
    fn reads_wrapped_and_bare_inbox() {
        let (dir, a) = adapter();
        fs::write(
            dir.path().join("predictions_2025-03-10.json"),
            r#"{"predictions":[{"asset":"BTC","direction":"LONG","entry":100,"target":110,"stop":95,"confidence":70}]}"#,
        )
        .unwrap();
        let drafts = a.load_inbox(day()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].confidence, 70);

        fs::write(
            dir.path().join("predictions_2025-03-10.json"),
            r#"[{"id":"x","asset":"ETH","direction":"SHORT","entry":3000,"target":2900,"stop":3050}]"#,
        )
        .unwrap();
        let drafts = a.load_inbox(day()).unwrap();
        assert_eq!(drafts[0].id.as_deref(), Some("x"));
        assert_eq!(drafts[0].confidence, 50);
    }

    #[test]
    fn reads_sentiment_stages() {
        let (dir, a) = adapter();
        fs::write(
            dir.path().join("sentiment_2025-03-10.json"),
            r#"{"morning":{"sentiment":"POSITIVE","timestamp":"2025-03-10T08:30:00"}}"#,
        )
        .unwrap();
        let stages = a.load_sentiment(day()).unwrap();
        assert_eq!(stages["morning"].sentiment, "POSITIVE");
    }

    #[test]
    fn stage_log_appends() {
        let (_d, a) = adapter();
        let entry = StageEntry {
            stage: "morning".into(),
            timestamp: day().and_hms_opt(8, 30, 0).unwrap(),
            sentiment: Sentiment::Neutral,
            assets: vec!["BTC".into()],
            evaluation: EvaluationResult::empty(),
        };
        a.append_stage(day(), &entry).unwrap();
        let mut second = entry.clone();
        second.stage = "heartbeat".into();
        a.append_stage(day(), &second).unwrap();

        let stages = a.load_stages(day()).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].stage, "heartbeat");
    }

    #[test]
    fn unwritable_directory_is_persistence_error() {
        let (dir, a) = adapter();
        fs::remove_dir_all(dir.path()).unwrap();
        let err = a
            .commit_state(&EngineState::new(&EngineConfig::default()))
            .unwrap_err();
        assert!(matches!(err, PredledgerError::Persistence { .. }));
    }
}
