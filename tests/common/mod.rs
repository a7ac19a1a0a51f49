#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use predledger::domain::engine::{EngineConfig, EngineState};
use predledger::domain::error::PredledgerError;
use predledger::domain::prediction::SignalDraft;
use predledger::domain::quote::Quote;
use predledger::domain::regime::SentimentStage;
use predledger::domain::snapshot::{LiveState, StageEntry};
use predledger::ports::clock_port::Clock;
use predledger::ports::quote_port::QuotePort;
use predledger::ports::state_port::StatePort;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

pub struct MockQuotePort {
    pub prices: RefCell<HashMap<String, Quote>>,
    pub calls: Cell<usize>,
}

impl MockQuotePort {
    pub fn new() -> Self {
        Self {
            prices: RefCell::new(HashMap::new()),
            calls: Cell::new(0),
        }
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices
            .borrow_mut()
            .insert(symbol.to_string(), Quote::point(price));
    }

    pub fn set_quote(&self, symbol: &str, quote: Quote) {
        self.prices.borrow_mut().insert(symbol.to_string(), quote);
    }

    pub fn remove(&self, symbol: &str) {
        self.prices.borrow_mut().remove(symbol);
    }
}

impl QuotePort for MockQuotePort {
    fn get_price(&self, symbol: &str) -> Result<Quote, PredledgerError> {
        self.calls.set(self.calls.get() + 1);
        self.prices
            .borrow()
            .get(symbol)
            .copied()
            .ok_or_else(|| PredledgerError::unavailable(symbol, "no quote configured"))
    }
}

/// In-memory store with switches for simulating write failures.
pub struct MemoryState {
    pub state: RefCell<Option<EngineState>>,
    pub inbox: RefCell<BTreeMap<NaiveDate, Vec<SignalDraft>>>,
    pub sentiment: RefCell<BTreeMap<NaiveDate, BTreeMap<String, SentimentStage>>>,
    pub stages: RefCell<BTreeMap<NaiveDate, Vec<StageEntry>>>,
    pub live: RefCell<Option<LiveState>>,
    pub commits: Cell<usize>,
    pub fail_commit: Cell<bool>,
    pub fail_publish: Cell<bool>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(None),
            inbox: RefCell::new(BTreeMap::new()),
            sentiment: RefCell::new(BTreeMap::new()),
            stages: RefCell::new(BTreeMap::new()),
            live: RefCell::new(None),
            commits: Cell::new(0),
            fail_commit: Cell::new(false),
            fail_publish: Cell::new(false),
        }
    }

    pub fn drop_signals(&self, date: NaiveDate, drafts: Vec<SignalDraft>) {
        self.inbox.borrow_mut().entry(date).or_default().extend(drafts);
    }

    pub fn set_sentiment(&self, date: NaiveDate, stage: &str, sentiment: &str, at: NaiveDateTime) {
        self.sentiment.borrow_mut().entry(date).or_default().insert(
            stage.to_string(),
            SentimentStage {
                sentiment: sentiment.to_string(),
                timestamp: at,
            },
        );
    }

    pub fn committed(&self) -> Option<EngineState> {
        self.state.borrow().clone()
    }

    pub fn stage_names(&self, date: NaiveDate) -> Vec<String> {
        self.stages
            .borrow()
            .get(&date)
            .map(|v| v.iter().map(|s| s.stage.clone()).collect())
            .unwrap_or_default()
    }
}

impl StatePort for MemoryState {
    fn load_state(&self) -> Result<Option<EngineState>, PredledgerError> {
        Ok(self.state.borrow().clone())
    }

    fn commit_state(&self, state: &EngineState) -> Result<(), PredledgerError> {
        if self.fail_commit.get() {
            return Err(PredledgerError::persistence("memory", "disk full"));
        }
        self.commits.set(self.commits.get() + 1);
        *self.state.borrow_mut() = Some(state.clone());
        Ok(())
    }

    fn load_inbox(&self, date: NaiveDate) -> Result<Vec<SignalDraft>, PredledgerError> {
        Ok(self.inbox.borrow().get(&date).cloned().unwrap_or_default())
    }

    fn load_sentiment(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, SentimentStage>, PredledgerError> {
        Ok(self.sentiment.borrow().get(&date).cloned().unwrap_or_default())
    }

    fn append_stage(&self, date: NaiveDate, entry: &StageEntry) -> Result<(), PredledgerError> {
        if self.fail_publish.get() {
            return Err(PredledgerError::persistence("stages", "read-only"));
        }
        self.stages
            .borrow_mut()
            .entry(date)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn load_stages(&self, date: NaiveDate) -> Result<Vec<StageEntry>, PredledgerError> {
        Ok(self.stages.borrow().get(&date).cloned().unwrap_or_default())
    }

    fn publish_live_state(&self, live: &LiveState) -> Result<(), PredledgerError> {
        if self.fail_publish.get() {
            return Err(PredledgerError::persistence("live", "read-only"));
        }
        *self.live.borrow_mut() = Some(live.clone());
        Ok(())
    }

    fn load_live_state(&self) -> Result<Option<LiveState>, PredledgerError> {
        Ok(self.live.borrow().clone())
    }
}

pub struct ManualClock {
    now: Cell<NaiveDateTime>,
}

impl ManualClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn day() -> NaiveDate {
    date(2025, 3, 10)
}

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, 0).unwrap()
}

pub fn long_signal(asset: &str, entry: f64, target: f64, stop: f64) -> SignalDraft {
    SignalDraft {
        id: None,
        asset: asset.to_string(),
        direction: "LONG".to_string(),
        entry,
        target,
        stop,
        confidence: 70,
    }
}

pub fn short_signal(asset: &str, entry: f64, target: f64, stop: f64) -> SignalDraft {
    SignalDraft {
        direction: "SHORT".to_string(),
        ..long_signal(asset, entry, target, stop)
    }
}

/// One `morning` job at 08:30 plus a 30 minute heartbeat.
pub fn sample_config() -> EngineConfig {
    EngineConfig {
        schedule: vec![(
            "morning".to_string(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
        )],
        ..EngineConfig::default()
    }
}
