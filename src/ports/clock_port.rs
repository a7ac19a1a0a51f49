//! Wall-clock port.

use chrono::NaiveDateTime;

/// Source of the current local time. Schedules, flags and predictions are
/// all keyed by this clock's calendar date.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}
