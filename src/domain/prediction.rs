//! Predictions, their crossing rule, and the per-day prediction store.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::quote::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Some(Direction::Long),
            "SHORT" | "SELL" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictionStatus {
    Pending,
    Hit,
    Stopped,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PredictionStatus::Pending)
    }
}

/// Outcome of applying the crossing rule to one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub status: PredictionStatus,
    pub exit_price: f64,
}

/// Apply the direction-specific crossing rule.
///
/// When one observation crosses both the target and the stop (a gapped
/// range), the prediction resolves to `Stopped`: the adverse move is assumed
/// to have happened first.
///
/// The exit price is the last price when it sits beyond the crossed level,
/// otherwise the level itself (the range touched it intra-interval).
pub fn resolve(direction: Direction, target: f64, stop: f64, quote: &Quote) -> Option<Resolution> {
    let (hit, stopped) = match direction {
        Direction::Long => (quote.high >= target, quote.low <= stop),
        Direction::Short => (quote.low <= target, quote.high >= stop),
    };

    if stopped {
        let exit_price = match direction {
            Direction::Long if quote.price <= stop => quote.price,
            Direction::Short if quote.price >= stop => quote.price,
            _ => stop,
        };
        return Some(Resolution {
            status: PredictionStatus::Stopped,
            exit_price,
        });
    }

    if hit {
        let exit_price = match direction {
            Direction::Long if quote.price >= target => quote.price,
            Direction::Short if quote.price <= target => quote.price,
            _ => target,
        };
        return Some(Resolution {
            status: PredictionStatus::Hit,
            exit_price,
        });
    }

    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub entry: f64,
    pub target: f64,
    pub stop: f64,
    pub confidence: u32,
    pub created_at: NaiveDateTime,
    pub status: PredictionStatus,
    #[serde(default)]
    pub closed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub close_price: Option<f64>,
    /// First time a price was checked against the levels. Ranges carried by
    /// a quote only count from the second observation on.
    #[serde(default)]
    pub first_observed_at: Option<NaiveDateTime>,
}

impl Prediction {
    pub fn is_pending(&self) -> bool {
        self.status == PredictionStatus::Pending
    }

    /// Apply one observation. Terminal predictions are never touched again.
    ///
    /// Returns the resolution when this call moved the prediction out of
    /// `Pending`.
    pub fn observe(&mut self, quote: &Quote, now: NaiveDateTime) -> Option<Resolution> {
        if self.status.is_terminal() {
            return None;
        }
        // The low/high of the first quote can predate the prediction.
        let observed = match self.first_observed_at {
            Some(first) if first < now => *quote,
            Some(_) => Quote::point(quote.price),
            None => {
                self.first_observed_at = Some(now);
                Quote::point(quote.price)
            }
        };
        let resolution = resolve(self.direction, self.target, self.stop, &observed)?;
        self.status = resolution.status;
        self.closed_at = Some(now);
        self.close_price = Some(resolution.exit_price);
        Some(resolution)
    }

    /// Signed distance still to travel before the target is reached.
    pub fn distance_to_target(&self, price: f64) -> f64 {
        (self.target - price) * self.direction.sign()
    }
}

/// A signal as emitted by upstream analysis, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub asset: String,
    pub direction: String,
    pub entry: f64,
    pub target: f64,
    pub stop: f64,
    #[serde(default = "default_confidence")]
    pub confidence: u32,
}

fn default_confidence() -> u32 {
    50
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingAsset,
    UnknownDirection(String),
    NonPositiveLevel,
    TargetWrongSide,
    StopWrongSide,
    Duplicate(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingAsset => write!(f, "missing asset"),
            SkipReason::UnknownDirection(d) => write!(f, "unknown direction '{d}'"),
            SkipReason::NonPositiveLevel => write!(f, "entry, target and stop must be positive"),
            SkipReason::TargetWrongSide => write!(f, "target on the wrong side of entry"),
            SkipReason::StopWrongSide => write!(f, "stop on the wrong side of entry"),
            SkipReason::Duplicate(id) => write!(f, "duplicate id {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSignal {
    pub asset: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub added: Vec<String>,
    pub skipped: Vec<SkippedSignal>,
}

/// Turn a draft into a pending prediction, or explain why it cannot be one.
pub fn validate_draft(
    draft: &SignalDraft,
    fallback_id: String,
    now: NaiveDateTime,
) -> Result<Prediction, SkipReason> {
    let asset = draft.asset.trim().to_uppercase();
    if asset.is_empty() {
        return Err(SkipReason::MissingAsset);
    }
    let direction = Direction::parse(&draft.direction)
        .ok_or_else(|| SkipReason::UnknownDirection(draft.direction.clone()))?;
    if draft.entry <= 0.0 || draft.target <= 0.0 || draft.stop <= 0.0 {
        return Err(SkipReason::NonPositiveLevel);
    }
    let target_ok = match direction {
        Direction::Long => draft.target > draft.entry,
        Direction::Short => draft.target < draft.entry,
    };
    if !target_ok {
        return Err(SkipReason::TargetWrongSide);
    }
    let stop_ok = match direction {
        Direction::Long => draft.stop < draft.entry,
        Direction::Short => draft.stop > draft.entry,
    };
    if !stop_ok {
        return Err(SkipReason::StopWrongSide);
    }

    Ok(Prediction {
        id: draft
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(fallback_id),
        asset,
        direction,
        entry: draft.entry,
        target: draft.target,
        stop: draft.stop,
        confidence: draft.confidence.min(100),
        created_at: now,
        status: PredictionStatus::Pending,
        closed_at: None,
        close_price: None,
        first_observed_at: None,
    })
}

/// Durable record of predictions, one list per creation day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionStore {
    days: BTreeMap<NaiveDate, Vec<Prediction>>,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_day(&self, date: NaiveDate) -> &[Prediction] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.days.values().flatten().any(|p| p.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Prediction> {
        self.days.values().flatten().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a pending prediction under its creation day.
    pub fn insert(&mut self, prediction: Prediction) -> Result<(), SkipReason> {
        if self.contains(&prediction.id) {
            return Err(SkipReason::Duplicate(prediction.id));
        }
        self.days
            .entry(prediction.created_at.date())
            .or_default()
            .push(prediction);
        Ok(())
    }

    /// Validate and add upstream drafts for `now`'s day. Ids already present
    /// are skipped, so re-ingesting the same inbox is a no-op.
    pub fn ingest(&mut self, drafts: &[SignalDraft], now: NaiveDateTime) -> IngestReport {
        let date = now.date();
        let mut report = IngestReport::default();

        for (idx, draft) in drafts.iter().enumerate() {
            let fallback_id = format!(
                "{}-{}-{}-{}",
                date.format("%Y%m%d"),
                draft.asset.trim().to_uppercase(),
                draft.direction.trim().to_uppercase(),
                idx + 1
            );
            let outcome = validate_draft(draft, fallback_id, now)
                .and_then(|p| {
                    let id = p.id.clone();
                    self.insert(p).map(|_| id)
                });
            match outcome {
                Ok(id) => report.added.push(id),
                Err(SkipReason::Duplicate(_)) => {}
                Err(reason) => report.skipped.push(SkippedSignal {
                    asset: draft.asset.clone(),
                    reason,
                }),
            }
        }

        report
    }

    fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
        today - Duration::days(i64::from(days.max(1)) - 1)
    }

    /// Predictions created in the last `days` calendar days ending `today`.
    pub fn window(&self, today: NaiveDate, days: u32) -> impl Iterator<Item = &Prediction> {
        let start = Self::window_start(today, days);
        self.days.range(start..=today).flat_map(|(_, v)| v.iter())
    }

    pub fn window_mut(
        &mut self,
        today: NaiveDate,
        days: u32,
    ) -> impl Iterator<Item = &mut Prediction> {
        let start = Self::window_start(today, days);
        self.days.range_mut(start..=today).flat_map(|(_, v)| v.iter_mut())
    }

    /// Predictions created before the window that starts `days` back from `today`.
    pub fn before_window_mut(
        &mut self,
        today: NaiveDate,
        days: u32,
    ) -> impl Iterator<Item = &mut Prediction> {
        let start = Self::window_start(today, days);
        self.days.range_mut(..start).flat_map(|(_, v)| v.iter_mut())
    }

    /// Assets with a pending prediction in the window, deduplicated and sorted.
    pub fn pending_assets(&self, today: NaiveDate, days: u32) -> Vec<String> {
        let mut assets: Vec<String> = self
            .window(today, days)
            .filter(|p| p.is_pending())
            .map(|p| p.asset.clone())
            .collect();
        assets.sort();
        assets.dedup();
        assets
    }
}
