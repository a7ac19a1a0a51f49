//! Market-regime classification with hysteresis.
//!
//! Each evaluation produces a [`RegimeReading`] whose raw regime comes from
//! the accuracy grade and the day's sentiment. The published label only
//! moves to a new regime after `confirmations` consecutive readings agree on
//! it, so a single anomalous reading never flips the label.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
    Mixed,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Unknown labels read as neutral.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "POSITIVE" | "BULLISH" => Sentiment::Positive,
            "NEGATIVE" | "BEARISH" => Sentiment::Negative,
            "MIXED" => Sentiment::Mixed,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Positive => "POSITIVE",
            Sentiment::Negative => "NEGATIVE",
            Sentiment::Mixed => "MIXED",
            Sentiment::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// One stage entry of an upstream sentiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentStage {
    pub sentiment: String,
    pub timestamp: NaiveDateTime,
}

/// The most recent stage by timestamp wins; no stages means neutral.
pub fn latest_sentiment(stages: &BTreeMap<String, SentimentStage>) -> Sentiment {
    stages
        .values()
        .max_by_key(|s| s.timestamp)
        .map(|s| Sentiment::parse(&s.sentiment))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccuracyGrade {
    A,
    B,
    C,
    D,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl AccuracyGrade {
    pub fn from_accuracy(accuracy_pct: Option<f64>) -> Self {
        match accuracy_pct {
            None => AccuracyGrade::NotApplicable,
            Some(a) if a >= 80.0 => AccuracyGrade::A,
            Some(a) if a >= 60.0 => AccuracyGrade::B,
            Some(a) if a >= 40.0 => AccuracyGrade::C,
            Some(_) => AccuracyGrade::D,
        }
    }
}

impl fmt::Display for AccuracyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccuracyGrade::A => "A",
            AccuracyGrade::B => "B",
            AccuracyGrade::C => "C",
            AccuracyGrade::D => "D",
            AccuracyGrade::NotApplicable => "N/A",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    RiskOn,
    RiskOff,
    #[default]
    Neutral,
    Transitioning,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketRegime::RiskOn => "RISK_ON",
            MarketRegime::RiskOff => "RISK_OFF",
            MarketRegime::Neutral => "NEUTRAL",
            MarketRegime::Transitioning => "TRANSITIONING",
        };
        write!(f, "{s}")
    }
}

/// Regime implied by a single reading, before hysteresis.
pub fn infer_regime(grade: AccuracyGrade, sentiment: Sentiment) -> MarketRegime {
    match (grade, sentiment) {
        (AccuracyGrade::A | AccuracyGrade::B, Sentiment::Positive) => MarketRegime::RiskOn,
        (AccuracyGrade::D, Sentiment::Negative) => MarketRegime::RiskOff,
        (_, Sentiment::Mixed) | (AccuracyGrade::C, _) => MarketRegime::Neutral,
        _ => MarketRegime::Transitioning,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeReading {
    pub at: NaiveDateTime,
    pub accuracy_pct: Option<f64>,
    pub sentiment: Sentiment,
    pub grade: AccuracyGrade,
    pub raw: MarketRegime,
}

impl RegimeReading {
    pub fn new(at: NaiveDateTime, accuracy_pct: Option<f64>, sentiment: Sentiment) -> Self {
        let grade = AccuracyGrade::from_accuracy(accuracy_pct);
        RegimeReading {
            at,
            accuracy_pct,
            sentiment,
            grade,
            raw: infer_regime(grade, sentiment),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegimeConfig {
    pub window: usize,
    pub confirmations: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            window: 6,
            confirmations: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeLabel {
    pub state: MarketRegime,
    /// Share of window readings whose raw regime matches `state`.
    pub confidence: f64,
    pub grade: AccuracyGrade,
    pub sentiment: Sentiment,
}

/// Rolling reading window plus the hysteresis state behind the published
/// label. The hysteresis state is persisted with the window, so the label
/// survives readings falling out of the window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeWindow {
    readings: VecDeque<RegimeReading>,
    published: MarketRegime,
    candidate: Option<MarketRegime>,
    streak: u32,
    #[serde(skip)]
    config: RegimeConfig,
}

impl RegimeWindow {
    pub fn new(config: RegimeConfig) -> Self {
        RegimeWindow {
            config,
            ..Self::default()
        }
    }

    pub fn set_config(&mut self, config: RegimeConfig) {
        self.config = config;
        self.trim();
    }

    pub fn readings(&self) -> impl Iterator<Item = &RegimeReading> {
        self.readings.iter()
    }

    pub fn published(&self) -> MarketRegime {
        self.published
    }

    fn trim(&mut self) {
        let cap = self.config.window.max(1);
        while self.readings.len() > cap {
            self.readings.pop_front();
        }
    }

    /// Add a reading and return the published regime after it.
    ///
    /// One reading per observation time: a second reading at the same `at`
    /// (several jobs due in one tick) is dropped and cannot confirm a change.
    pub fn push(&mut self, reading: RegimeReading) -> MarketRegime {
        if self.readings.back().is_some_and(|last| last.at == reading.at) {
            debug!(at = %reading.at, "regime already read at this time");
            return self.published;
        }
        let raw = reading.raw;
        self.readings.push_back(reading);
        self.trim();

        if raw == self.published {
            self.candidate = None;
            self.streak = 0;
            return self.published;
        }

        if self.candidate == Some(raw) {
            self.streak += 1;
        } else {
            self.candidate = Some(raw);
            self.streak = 1;
        }

        if self.streak >= self.config.confirmations.max(1) {
            info!(from = %self.published, to = %raw, readings = self.streak, "regime changed");
            self.published = raw;
            self.candidate = None;
            self.streak = 0;
        }
        self.published
    }

    pub fn classify(&self) -> RegimeLabel {
        let total = self.readings.len();
        let agreeing = self.readings.iter().filter(|r| r.raw == self.published).count();
        let confidence = if total == 0 {
            0.0
        } else {
            agreeing as f64 / total as f64
        };
        let (grade, sentiment) = self
            .readings
            .back()
            .map(|r| (r.grade, r.sentiment))
            .unwrap_or((AccuracyGrade::NotApplicable, Sentiment::Neutral));

        RegimeLabel {
            state: self.published,
            confidence,
            grade,
            sentiment,
        }
    }
}
