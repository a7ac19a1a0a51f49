//! SQLite key/value store.
//!
//! Documents are JSON blobs in a single `documents` table keyed by
//! `(kind, day)`; undated documents use an empty day. Each write replaces
//! its row inside one transaction.

use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::domain::engine::EngineState;
use crate::domain::error::PredledgerError;
use crate::domain::prediction::SignalDraft;
use crate::domain::regime::SentimentStage;
use crate::domain::snapshot::{LiveState, StageEntry};
use crate::ports::config_port::ConfigPort;
use crate::ports::state_port::StatePort;

const KIND_ENGINE: &str = "engine_state";
const KIND_LIVE: &str = "live_state";
const KIND_STAGES: &str = "stages";
const KIND_INBOX: &str = "predictions";
const KIND_SENTIMENT: &str = "sentiment";

pub struct SqliteStateAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> PredledgerError {
    PredledgerError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> PredledgerError {
    PredledgerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl SqliteStateAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PredledgerError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| PredledgerError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;
        let pool_size = config.get_int("sqlite", "pool_size", 2).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, PredledgerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn initialize_schema(&self) -> Result<(), PredledgerError> {
        let conn = self.pool.get().map_err(db_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                kind TEXT NOT NULL,
                day TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (kind, day)
            );",
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, kind: &str, day: &str) -> Result<Option<T>, PredledgerError> {
        let conn = self.pool.get().map_err(db_err)?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE kind = ?1 AND day = ?2",
                params![kind, day],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, kind: &str, day: &str, value: &T) -> Result<(), PredledgerError> {
        let body = serde_json::to_string(value)?;
        let mut conn = self.pool.get().map_err(db_err)?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO documents (kind, day, body, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![kind, day, body],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(())
    }

    /// Store an upstream input document, for feeds that write through the
    /// database instead of the filesystem.
    pub fn put_inbox(&self, date: NaiveDate, drafts: &[SignalDraft]) -> Result<(), PredledgerError> {
        self.put(KIND_INBOX, &day_key(date), &drafts)
    }

    pub fn put_sentiment(
        &self,
        date: NaiveDate,
        stages: &BTreeMap<String, SentimentStage>,
    ) -> Result<(), PredledgerError> {
        self.put(KIND_SENTIMENT, &day_key(date), stages)
    }
}

impl StatePort for SqliteStateAdapter {
    fn load_state(&self) -> Result<Option<EngineState>, PredledgerError> {
        self.get(KIND_ENGINE, "")
    }

    fn commit_state(&self, state: &EngineState) -> Result<(), PredledgerError> {
        self.put(KIND_ENGINE, "", state)
    }

    fn load_inbox(&self, date: NaiveDate) -> Result<Vec<SignalDraft>, PredledgerError> {
        Ok(self.get(KIND_INBOX, &day_key(date))?.unwrap_or_default())
    }

    fn load_sentiment(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, SentimentStage>, PredledgerError> {
        Ok(self.get(KIND_SENTIMENT, &day_key(date))?.unwrap_or_default())
    }

    fn append_stage(&self, date: NaiveDate, entry: &StageEntry) -> Result<(), PredledgerError> {
        let day = day_key(date);
        let mut conn = self.pool.get().map_err(db_err)?;
        let tx = conn.transaction().map_err(query_err)?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE kind = ?1 AND day = ?2",
                params![KIND_STAGES, day],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        let mut stages: Vec<StageEntry> = match existing {
            Some(b) => serde_json::from_str(&b)?,
            None => Vec::new(),
        };
        stages.push(entry.clone());
        tx.execute(
            "INSERT OR REPLACE INTO documents (kind, day, body, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![KIND_STAGES, day, serde_json::to_string(&stages)?],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(())
    }

    fn load_stages(&self, date: NaiveDate) -> Result<Vec<StageEntry>, PredledgerError> {
        Ok(self.get(KIND_STAGES, &day_key(date))?.unwrap_or_default())
    }

    fn publish_live_state(&self, live: &LiveState) -> Result<(), PredledgerError> {
        self.put(KIND_LIVE, "", live)
    }

    fn load_live_state(&self) -> Result<Option<LiveState>, PredledgerError> {
        self.get(KIND_LIVE, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::engine::EngineConfig;
    use crate::domain::evaluation::EvaluationResult;
    use crate::domain::regime::Sentiment;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn stage(name: &str) -> StageEntry {
        StageEntry {
            stage: name.into(),
            timestamp: day().and_hms_opt(9, 0, 0).unwrap(),
            sentiment: Sentiment::Mixed,
            assets: Vec::new(),
            evaluation: EvaluationResult::empty(),
        }
    }

    #[test]
    fn empty_store_returns_nothing() {
        let a = SqliteStateAdapter::in_memory().unwrap();
        assert!(a.load_state().unwrap().is_none());
        assert!(a.load_inbox(day()).unwrap().is_empty());
        assert!(a.load_live_state().unwrap().is_none());
    }

    #[test]
    fn commit_replaces_state() {
        let a = SqliteStateAdapter::in_memory().unwrap();
        a.commit_state(&EngineState::new(&EngineConfig::default()))
            .unwrap();
        let richer = EngineState::new(&EngineConfig {
            initial_capital: 25_000.0,
            ..EngineConfig::default()
        });
        a.commit_state(&richer).unwrap();
        let loaded = a.load_state().unwrap().unwrap();
        assert_eq!(loaded.ledger.initial_capital(), 25_000.0);
    }

    #[test]
    fn stages_append_in_order() {
        let a = SqliteStateAdapter::in_memory().unwrap();
        a.append_stage(day(), &stage("morning")).unwrap();
        a.append_stage(day(), &stage("heartbeat")).unwrap();
        let names: Vec<String> = a
            .load_stages(day())
            .unwrap()
            .into_iter()
            .map(|s| s.stage)
            .collect();
        assert_eq!(names, vec!["morning", "heartbeat"]);
        assert!(a.load_stages(day().succ_opt().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn inbox_round_trips_through_table() {
        let a = SqliteStateAdapter::in_memory().unwrap();
        let draft = SignalDraft {
            id: None,
            asset: "BTC".into(),
            direction: "LONG".into(),
            entry: 100.0,
            target: 110.0,
            stop: 95.0,
            confidence: 70,
        };
        a.put_inbox(day(), std::slice::from_ref(&draft)).unwrap();
        assert_eq!(a.load_inbox(day()).unwrap(), vec![draft]);
    }

    #[test]
    fn from_config_creates_file_database() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("state.db");
        let config = FileConfigAdapter::from_string(&format!(
            "[sqlite]\npath = {}\npool_size = 2\n",
            db.display()
        ))
        .unwrap();
        let a = SqliteStateAdapter::from_config(&config).unwrap();
        a.commit_state(&EngineState::new(&EngineConfig::default()))
            .unwrap();
        assert!(db.exists());
    }
}
