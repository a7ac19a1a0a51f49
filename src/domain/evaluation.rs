//! Prediction evaluation against live prices.
//!
//! [`evaluate`] advances every pending prediction in the tracking window by
//! one observation and aggregates day-level accuracy. Terminal predictions
//! are skipped, so evaluating twice with the same price map yields the same
//! result and never re-triggers a close.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prediction::{Direction, PredictionStatus, PredictionStore};
use super::quote::PriceMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationItem {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub status: PredictionStatus,
    /// Close price for terminal predictions, current price for pending ones,
    /// `None` when no quote was available.
    pub price: Option<f64>,
    pub distance_to_target: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub hits: usize,
    pub misses: usize,
    pub pending: usize,
    /// Pending predictions with no quote this tick.
    pub unpriced: usize,
    /// Closed predictions only: `hits + misses`.
    pub total_tracked: usize,
    /// `None` until at least one prediction has closed.
    pub accuracy_pct: Option<f64>,
    pub items: Vec<EvaluationItem>,
}

impl EvaluationResult {
    pub fn empty() -> Self {
        EvaluationResult {
            hits: 0,
            misses: 0,
            pending: 0,
            unpriced: 0,
            total_tracked: 0,
            accuracy_pct: None,
            items: Vec::new(),
        }
    }
}

/// Accuracy over closed predictions; `None` when nothing has closed.
pub fn accuracy_pct(hits: usize, misses: usize) -> Option<f64> {
    let closed = hits + misses;
    if closed == 0 {
        None
    } else {
        Some(hits as f64 / closed as f64 * 100.0)
    }
}

pub fn evaluate(
    store: &mut PredictionStore,
    prices: &PriceMap,
    now: NaiveDateTime,
    window_days: u32,
) -> EvaluationResult {
    let today = now.date();
    let mut result = EvaluationResult::empty();

    for prediction in store.window_mut(today, window_days) {
        let quote = prices.get(&prediction.asset);

        if prediction.is_pending() {
            match quote {
                Some(q) => {
                    if let Some(resolution) = prediction.observe(q, now) {
                        info!(
                            id = %prediction.id,
                            asset = %prediction.asset,
                            status = ?resolution.status,
                            exit = resolution.exit_price,
                            "prediction closed"
                        );
                    }
                }
                None => {
                    debug!(id = %prediction.id, asset = %prediction.asset, "no quote, prediction stays pending");
                }
            }
        }

        let (price, distance) = match prediction.status {
            PredictionStatus::Pending => match quote {
                Some(q) => (Some(q.price), Some(prediction.distance_to_target(q.price))),
                None => (None, None),
            },
            _ => (prediction.close_price, None),
        };

        match prediction.status {
            PredictionStatus::Hit => result.hits += 1,
            PredictionStatus::Stopped => result.misses += 1,
            PredictionStatus::Pending => {
                result.pending += 1;
                if quote.is_none() {
                    result.unpriced += 1;
                }
            }
        }

        result.items.push(EvaluationItem {
            id: prediction.id.clone(),
            asset: prediction.asset.clone(),
            direction: prediction.direction,
            status: prediction.status,
            price,
            distance_to_target: distance,
        });
    }

    result.total_tracked = result.hits + result.misses;
    result.accuracy_pct = accuracy_pct(result.hits, result.misses);
    result
}

/// Advance pending predictions that have aged out of the tracking window but
/// still back an open position. They are not counted in any day's accuracy.
///
/// Returns the ids that closed on this observation.
pub fn settle_carried(
    store: &mut PredictionStore,
    carried_ids: &[String],
    prices: &PriceMap,
    now: NaiveDateTime,
    window_days: u32,
) -> Vec<String> {
    let mut closed = Vec::new();
    if carried_ids.is_empty() {
        return closed;
    }

    for prediction in store.before_window_mut(now.date(), window_days) {
        if !prediction.is_pending() || !carried_ids.contains(&prediction.id) {
            continue;
        }
        let Some(quote) = prices.get(&prediction.asset) else {
            debug!(id = %prediction.id, asset = %prediction.asset, "no quote for carried prediction");
            continue;
        };
        if let Some(resolution) = prediction.observe(quote, now) {
            info!(
                id = %prediction.id,
                asset = %prediction.asset,
                status = ?resolution.status,
                exit = resolution.exit_price,
                created = %prediction.created_at,
                "carried prediction closed"
            );
            closed.push(prediction.id.clone());
        }
    }

    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::Prediction;
    use crate::domain::quote::Quote;
    use chrono::{NaiveDate, NaiveTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn prediction(id: &str, asset: &str) -> Prediction {
        Prediction {
            id: id.into(),
            asset: asset.into(),
            direction: Direction::Long,
            entry: 100.0,
            target: 110.0,
            stop: 95.0,
            confidence: 70,
            created_at: at(9, 0),
            status: PredictionStatus::Pending,
            closed_at: None,
            close_price: None,
            first_observed_at: None,
        }
    }

    fn store_with(preds: Vec<Prediction>) -> PredictionStore {
        let mut store = PredictionStore::new();
        for p in preds {
            store.insert(p).unwrap();
        }
        store
    }

    fn prices(pairs: &[(&str, f64)]) -> PriceMap {
        pairs
            .iter()
            .map(|(s, p)| (s.to_string(), Quote::point(*p)))
            .collect()
    }

    #[test]
    fn empty_store_reports_not_applicable() {
        let mut store = PredictionStore::new();
        let result = evaluate(&mut store, &PriceMap::new(), at(10, 0), 1);
        assert_eq!(result.total_tracked, 0);
        assert_eq!(result.accuracy_pct, None);
    }

    #[test]
    fn pending_only_is_not_zero_accuracy() {
        let mut store = store_with(vec![prediction("a", "BTC")]);
        let result = evaluate(&mut store, &prices(&[("BTC", 102.0)]), at(10, 0), 1);
        assert_eq!(result.pending, 1);
        assert_eq!(result.total_tracked, 0);
        assert_eq!(result.accuracy_pct, None);
        assert_eq!(result.items[0].distance_to_target, Some(8.0));
    }

    #[test]
    fn one_hit_one_stop_is_fifty_percent() {
        let mut store = store_with(vec![prediction("a", "BTC"), prediction("b", "ETH")]);
        let result = evaluate(
            &mut store,
            &prices(&[("BTC", 112.0), ("ETH", 90.0)]),
            at(10, 0),
            1,
        );
        assert_eq!(result.hits, 1);
        assert_eq!(result.misses, 1);
        assert_eq!(result.total_tracked, 2);
        assert_eq!(result.accuracy_pct, Some(50.0));
    }

    #[test]
    fn unavailable_quote_leaves_prediction_pending() {
        let mut store = store_with(vec![prediction("a", "BTC"), prediction("b", "ETH")]);
        let result = evaluate(&mut store, &prices(&[("ETH", 112.0)]), at(10, 0), 1);
        assert_eq!(result.hits, 1);
        assert_eq!(result.pending, 1);
        assert_eq!(result.unpriced, 1);
        assert_eq!(result.total_tracked, 1);
        assert_eq!(result.accuracy_pct, Some(100.0));
        assert!(store.get("a").unwrap().is_pending());
        assert_eq!(result.items[0].price, None);
    }

    #[test]
    fn evaluating_twice_is_idempotent() {
        let mut store = store_with(vec![prediction("a", "BTC"), prediction("b", "ETH")]);
        let map = prices(&[("BTC", 112.0), ("ETH", 101.0)]);
        let first = evaluate(&mut store, &map, at(10, 0), 1);
        let second = evaluate(&mut store, &map, at(10, 0), 1);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(store.get("a").unwrap().closed_at, Some(at(10, 0)));
    }

    #[test]
    fn closed_predictions_ignore_later_prices() {
        let mut store = store_with(vec![prediction("a", "BTC")]);
        evaluate(&mut store, &prices(&[("BTC", 112.0)]), at(10, 0), 1);
        let later = evaluate(&mut store, &prices(&[("BTC", 80.0)]), at(11, 0), 1);
        assert_eq!(later.hits, 1);
        assert_eq!(later.misses, 0);
        assert_eq!(later.items[0].price, Some(112.0));
        assert_eq!(store.get("a").unwrap().closed_at, Some(at(10, 0)));
    }

    #[test]
    fn carried_prediction_settles_after_leaving_window() {
        let mut store = store_with(vec![prediction("old", "BTC"), prediction("untracked", "ETH")]);
        let next_day = at(10, 0) + chrono::Duration::days(1);
        let map = prices(&[("BTC", 112.0), ("ETH", 112.0)]);

        let in_window = evaluate(&mut store, &map, next_day, 1);
        assert!(in_window.items.is_empty());

        let closed = settle_carried(&mut store, &["old".to_string()], &map, next_day, 1);
        assert_eq!(closed, vec!["old".to_string()]);
        assert_eq!(store.get("old").unwrap().status, PredictionStatus::Hit);
        assert_eq!(store.get("old").unwrap().closed_at, Some(next_day));
        // no position behind it, so it is left alone
        assert!(store.get("untracked").unwrap().is_pending());
    }

    #[test]
    fn carried_settlement_skips_window_and_unpriced() {
        let mut store = store_with(vec![prediction("a", "BTC")]);
        let ids = vec!["a".to_string()];

        // still inside the window: evaluate owns it
        assert!(settle_carried(&mut store, &ids, &prices(&[("BTC", 112.0)]), at(10, 0), 1).is_empty());
        assert!(store.get("a").unwrap().is_pending());

        let next_day = at(10, 0) + chrono::Duration::days(1);
        assert!(settle_carried(&mut store, &ids, &PriceMap::new(), next_day, 1).is_empty());
        assert!(store.get("a").unwrap().is_pending());
    }

    #[test]
    fn accuracy_formula() {
        assert_eq!(accuracy_pct(0, 0), None);
        assert_eq!(accuracy_pct(3, 1), Some(75.0));
        assert_eq!(accuracy_pct(0, 4), Some(0.0));
    }
}
