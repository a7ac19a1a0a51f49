//! Schedule gate: decides which periodic jobs are due on each poll.
//!
//! Daily jobs fire at most once per calendar day inside
//! `[time, time + catch_up]`, with failed attempts retried no sooner than the
//! throttle interval. Interval jobs (the heartbeat) are due whenever the
//! interval has elapsed since their last attempt. Flags are kept per date;
//! only today's flags are ever written.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const HEARTBEAT_JOB: &str = "heartbeat";

/// Parse an `HH:MM` time of day.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    Daily { at: NaiveTime },
    Interval { every: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub cadence: Cadence,
}

impl JobSpec {
    pub fn daily(name: impl Into<String>, at: NaiveTime) -> Self {
        JobSpec {
            name: name.into(),
            cadence: Cadence::Daily { at },
        }
    }

    pub fn interval(name: impl Into<String>, every: Duration) -> Self {
        JobSpec {
            name: name.into(),
            cadence: Cadence::Interval { every },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub throttle: Duration,
    pub catch_up: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            throttle: Duration::minutes(30),
            catch_up: Duration::minutes(180),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFlag {
    pub content_type: String,
    pub date: NaiveDate,
    pub sent: bool,
    pub last_attempt_at: Option<NaiveDateTime>,
    /// Set once when a daily job's window closed without a successful fire.
    #[serde(default)]
    pub missed: bool,
}

impl ScheduleFlag {
    fn new(content_type: &str, date: NaiveDate) -> Self {
        ScheduleFlag {
            content_type: content_type.to_string(),
            date,
            sent: false,
            last_attempt_at: None,
            missed: false,
        }
    }
}

/// Persisted flag history, keyed by date then content type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagBook {
    current_date: Option<NaiveDate>,
    days: BTreeMap<NaiveDate, BTreeMap<String, ScheduleFlag>>,
}

impl FlagBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current_date
    }

    pub fn flags_for(&self, date: NaiveDate) -> impl Iterator<Item = &ScheduleFlag> {
        self.days.get(&date).into_iter().flat_map(|m| m.values())
    }

    pub fn flag(&self, date: NaiveDate, content_type: &str) -> Option<&ScheduleFlag> {
        self.days.get(&date).and_then(|m| m.get(content_type))
    }

    fn flag_mut(&mut self, date: NaiveDate, content_type: &str) -> &mut ScheduleFlag {
        self.days
            .entry(date)
            .or_default()
            .entry(content_type.to_string())
            .or_insert_with(|| ScheduleFlag::new(content_type, date))
    }

    /// Most recent attempt across all dates.
    fn last_attempt(&self, content_type: &str) -> Option<NaiveDateTime> {
        self.days
            .values()
            .rev()
            .filter_map(|m| m.get(content_type))
            .find_map(|f| f.last_attempt_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadySent,
}

#[derive(Debug, Clone)]
pub struct ScheduleGate {
    jobs: Vec<JobSpec>,
    config: GateConfig,
}

impl ScheduleGate {
    pub fn new(jobs: Vec<JobSpec>, config: GateConfig) -> Self {
        ScheduleGate { jobs, config }
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    fn end_of_day(date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
    }

    /// Initialize today's flags on the first call of a new day. Prior dates
    /// are kept as-is.
    fn rollover(&self, book: &mut FlagBook, today: NaiveDate) {
        if book.current_date != Some(today) {
            info!(from = ?book.current_date, to = %today, "schedule day rollover");
            book.current_date = Some(today);
        }
        for job in &self.jobs {
            book.flag_mut(today, &job.name);
        }
    }

    /// Jobs due at `now`, in configured order.
    pub fn decide(&self, book: &mut FlagBook, now: NaiveDateTime) -> Vec<String> {
        let today = now.date();
        self.rollover(book, today);

        let mut due = Vec::new();
        for job in &self.jobs {
            match job.cadence {
                Cadence::Daily { at } => {
                    let start = today.and_time(at);
                    let end = (start + self.config.catch_up).min(Self::end_of_day(today));
                    let throttle = self.config.throttle;
                    let flag = book.flag_mut(today, &job.name);
                    if flag.sent || now < start {
                        continue;
                    }
                    if now > end {
                        if !flag.missed {
                            flag.missed = true;
                            warn!(
                                job = %job.name,
                                date = %today,
                                attempted = flag.last_attempt_at.is_some(),
                                "job missed for the day"
                            );
                        }
                        continue;
                    }
                    let throttled = flag
                        .last_attempt_at
                        .is_some_and(|last| now - last < throttle);
                    if !throttled {
                        due.push(job.name.clone());
                    }
                }
                Cadence::Interval { every } => {
                    let elapsed = book
                        .last_attempt(&job.name)
                        .map_or(true, |last| now - last >= every);
                    if elapsed {
                        due.push(job.name.clone());
                    }
                }
            }
        }
        due
    }

    /// Stamp an attempt, successful or not.
    pub fn record_attempt(&self, book: &mut FlagBook, content_type: &str, now: NaiveDateTime) {
        book.flag_mut(now.date(), content_type).last_attempt_at = Some(now);
    }

    /// Mark today's flag as sent. Repeat calls are no-ops.
    pub fn mark_sent(&self, book: &mut FlagBook, content_type: &str, now: NaiveDateTime) -> MarkOutcome {
        let flag = book.flag_mut(now.date(), content_type);
        if flag.sent {
            MarkOutcome::AlreadySent
        } else {
            flag.sent = true;
            MarkOutcome::Marked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn gate() -> ScheduleGate {
        ScheduleGate::new(
            vec![
                JobSpec::daily("morning", parse_time_of_day("08:30").unwrap()),
                JobSpec::interval(HEARTBEAT_JOB, Duration::minutes(30)),
            ],
            GateConfig::default(),
        )
    }

    fn daily_only() -> ScheduleGate {
        ScheduleGate::new(
            vec![JobSpec::daily("morning", parse_time_of_day("08:30").unwrap())],
            GateConfig::default(),
        )
    }

    #[test]
    fn parse_time_of_day_formats() {
        assert_eq!(
            parse_time_of_day("08:30"),
            NaiveTime::from_hms_opt(8, 30, 0)
        );
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day("noon"), None);
    }

    #[test]
    fn daily_job_due_only_inside_window() {
        let g = daily_only();
        let mut book = FlagBook::new();
        assert!(g.decide(&mut book, at(8, 29)).is_empty());
        assert_eq!(g.decide(&mut book, at(8, 30)), vec!["morning".to_string()]);
        assert_eq!(g.decide(&mut book, at(11, 30)), vec!["morning".to_string()]);
        assert!(g.decide(&mut book, at(11, 31)).is_empty());
    }

    #[test]
    fn sent_job_is_not_due_again() {
        let g = daily_only();
        let mut book = FlagBook::new();
        g.decide(&mut book, at(8, 30));
        g.record_attempt(&mut book, "morning", at(8, 30));
        assert_eq!(g.mark_sent(&mut book, "morning", at(8, 31)), MarkOutcome::Marked);
        assert_eq!(g.mark_sent(&mut book, "morning", at(8, 32)), MarkOutcome::AlreadySent);
        assert!(g.decide(&mut book, at(9, 30)).is_empty());
    }

    #[test]
    fn failed_attempt_is_throttled_then_retried() {
        let g = daily_only();
        let mut book = FlagBook::new();
        assert_eq!(g.decide(&mut book, at(8, 30)).len(), 1);
        g.record_attempt(&mut book, "morning", at(8, 30));
        assert!(g.decide(&mut book, at(8, 45)).is_empty());
        assert!(g.decide(&mut book, at(8, 59)).is_empty());
        assert_eq!(g.decide(&mut book, at(9, 0)).len(), 1);
    }

    #[test]
    fn window_end_marks_missed_once() {
        let g = daily_only();
        let mut book = FlagBook::new();
        g.decide(&mut book, at(12, 0));
        let flag = book.flag(day(), "morning").unwrap();
        assert!(flag.missed);
        assert!(!flag.sent);
        assert!(g.decide(&mut book, at(13, 0)).is_empty());
    }

    #[test]
    fn catch_up_clamped_to_end_of_day() {
        let g = ScheduleGate::new(
            vec![JobSpec::daily("late", parse_time_of_day("23:00").unwrap())],
            GateConfig::default(),
        );
        let mut book = FlagBook::new();
        let last_second = day().and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(g.decide(&mut book, last_second).len(), 1);
        let next_day = (day() + Duration::days(1)).and_hms_opt(0, 30, 0).unwrap();
        assert!(g.decide(&mut book, next_day).is_empty());
    }

    #[test]
    fn rollover_initializes_new_day_and_keeps_old() {
        let g = daily_only();
        let mut book = FlagBook::new();
        g.decide(&mut book, at(8, 30));
        g.record_attempt(&mut book, "morning", at(8, 30));
        g.mark_sent(&mut book, "morning", at(8, 30));

        let tomorrow = (day() + Duration::days(1)).and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(g.decide(&mut book, tomorrow), vec!["morning".to_string()]);
        assert_eq!(book.current_date(), Some(tomorrow.date()));
        assert!(book.flag(day(), "morning").unwrap().sent);
        assert!(!book.flag(tomorrow.date(), "morning").unwrap().sent);
    }

    #[test]
    fn missed_rollover_days_self_heal() {
        let g = daily_only();
        let mut book = FlagBook::new();
        g.decide(&mut book, at(8, 30));
        let later = (day() + Duration::days(5)).and_hms_opt(9, 0, 0).unwrap();
        assert_eq!(g.decide(&mut book, later).len(), 1);
        assert_eq!(book.flags_for(later.date()).count(), 1);
    }

    #[test]
    fn heartbeat_due_on_interval() {
        let g = gate();
        let mut book = FlagBook::new();
        assert_eq!(g.decide(&mut book, at(7, 0)), vec![HEARTBEAT_JOB.to_string()]);
        g.record_attempt(&mut book, HEARTBEAT_JOB, at(7, 0));
        assert!(g.decide(&mut book, at(7, 29)).is_empty());
        assert_eq!(g.decide(&mut book, at(7, 30)), vec![HEARTBEAT_JOB.to_string()]);
    }

    #[test]
    fn heartbeat_interval_spans_midnight() {
        let g = gate();
        let mut book = FlagBook::new();
        let before = day().and_hms_opt(23, 50, 0).unwrap();
        g.decide(&mut book, before);
        g.record_attempt(&mut book, HEARTBEAT_JOB, before);
        let after = (day() + Duration::days(1)).and_hms_opt(0, 5, 0).unwrap();
        assert!(g.decide(&mut book, after).is_empty());
    }

    #[test]
    fn per_second_polling_marks_once() {
        let g = daily_only();
        let mut book = FlagBook::new();
        let mut marks = 0;
        for s in 0..3600 {
            let now = at(8, 30) + Duration::seconds(s);
            for job in g.decide(&mut book, now) {
                g.record_attempt(&mut book, &job, now);
                if g.mark_sent(&mut book, &job, now) == MarkOutcome::Marked {
                    marks += 1;
                }
            }
        }
        assert_eq!(marks, 1);
    }
}
