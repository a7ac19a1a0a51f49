//! Wall clock at a fixed UTC offset.

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};

use crate::ports::clock_port::Clock;

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Offsets outside +/- 24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn offset_shifts_local_time() {
        let utc = SystemClock::with_offset_minutes(0).now();
        let cet = SystemClock::with_offset_minutes(60).now();
        let diff = cet - utc;
        assert!(diff >= Duration::minutes(59) && diff <= Duration::minutes(61));
    }

    #[test]
    fn absurd_offset_falls_back_to_utc() {
        let clock = SystemClock::with_offset_minutes(100_000);
        assert_eq!(clock.offset.local_minus_utc(), 0);
    }
}
