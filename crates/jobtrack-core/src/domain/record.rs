//! Tracker record: durable progress state of one job invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TrackerError;
use super::ids::{JobId, TrackerId};
use super::status::TrackerStatus;
use super::trackable::TrackableRef;

const TRUNCATION_MARKER: &str = "...";

/// Cache key holding the unflushed progress of a tracker.
pub fn progress_cache_key(id: TrackerId) -> String {
    format!("jobtrack:{id}:progress_cache")
}

/// Durable progress record.
///
/// Design:
/// - This is the single source of truth for `current`.
/// - `current` is only mutated through the counter's locked paths.
/// - Status changes go through the `mark_*` methods, which enforce the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub id: TrackerId,
    pub job_id: JobId,
    pub trackable: TrackableRef,
    pub status: TrackerStatus,

    /// Durable, authoritative progress count. Never clamped to `target`.
    pub current: u64,

    /// Expected total units of work.
    pub target: u64,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub backtrace: Option<String>,

    /// Per-record flush threshold. `None` falls back to the configured default.
    pub cache_threshold: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackerRecord {
    pub fn new(
        id: TrackerId,
        job_id: JobId,
        trackable: TrackableRef,
        target: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            trackable,
            status: TrackerStatus::Pending,
            current: 0,
            target,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            backtrace: None,
            cache_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress_cache_key(&self) -> String {
        progress_cache_key(self.id)
    }

    /// Back to a fresh pending state (job enqueued again).
    ///
    /// Besides progress and the start/completion times, this also clears a
    /// previous failure (`failed_at`, `error`, `backtrace`).
    pub fn reset(&mut self, target: u64) {
        self.status = TrackerStatus::Pending;
        self.current = 0;
        self.target = target;
        self.started_at = None;
        self.completed_at = None;
        self.failed_at = None;
        self.error = None;
        self.backtrace = None;
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.transition(TrackerStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.transition(TrackerStatus::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record a failure. `backtrace` is capped at `backtrace_limit` characters.
    pub fn mark_failed(
        &mut self,
        now: DateTime<Utc>,
        error: String,
        backtrace: &str,
        backtrace_limit: usize,
    ) -> Result<(), TrackerError> {
        self.transition(TrackerStatus::Failed)?;
        self.failed_at = Some(now);
        self.error = Some(error);
        self.backtrace = Some(truncate(backtrace, backtrace_limit));
        Ok(())
    }

    fn transition(&mut self, next: TrackerStatus) -> Result<(), TrackerError> {
        if !self.status.can_transition_to(next) {
            return Err(TrackerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn effective_cache_threshold(&self, default: u64) -> u64 {
        self.cache_threshold.unwrap_or(default)
    }

    /// `current / target`, capped at 1.0. Zero target yields 0.0.
    pub fn progress_ratio(&self) -> f64 {
        if self.target == 0 {
            return 0.0;
        }
        (self.current as f64 / self.target as f64).min(1.0)
    }

    pub fn progress_percentage(&self) -> u32 {
        (self.progress_ratio() * 100.0).floor() as u32
    }

    /// Elapsed seconds since start, ending at completion/failure or `now`.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let started_at = self.started_at?;
        let end = self.completed_at.or(self.failed_at).unwrap_or(now);
        let elapsed = end - started_at;
        Some(
            elapsed
                .num_microseconds()
                .map(|us| us as f64 / 1_000_000.0)
                .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1_000.0),
        )
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_at(Utc::now())
    }
}

/// Cut `text` to at most `limit` characters, ending with "..." when cut.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn record(current: u64, target: u64) -> TrackerRecord {
        let mut r = TrackerRecord::new(
            TrackerId::from_ulid(Ulid::from_parts(1, 1)),
            JobId::parse("test_job_id").unwrap(),
            TrackableRef::new("CsvUpload", "1"),
            target,
            now(),
        );
        r.current = current;
        r
    }

    #[test]
    fn new_record_starts_pending_at_zero() {
        let r = record(0, 100);
        assert_eq!(r.status, TrackerStatus::Pending);
        assert_eq!(r.current, 0);
        assert_eq!(r.cache_threshold, None);
    }

    #[test]
    fn cache_key_is_unique_per_record() {
        let a = record(0, 1);
        let mut b = record(0, 1);
        b.id = TrackerId::from_ulid(Ulid::from_parts(2, 2));

        assert_eq!(a.progress_cache_key(), format!("jobtrack:{}:progress_cache", a.id));
        assert_ne!(a.progress_cache_key(), b.progress_cache_key());
    }

    #[rstest]
    #[case::empty(0, 100, 0.0, 0)]
    #[case::quarter(25, 100, 0.25, 25)]
    #[case::half(50, 100, 0.5, 50)]
    #[case::full(100, 100, 1.0, 100)]
    #[case::over_target_is_capped(150, 100, 1.0, 100)]
    #[case::zero_target(10, 0, 0.0, 0)]
    #[case::rounds_down(2, 3, 2.0 / 3.0, 66)]
    fn ratio_and_percentage(
        #[case] current: u64,
        #[case] target: u64,
        #[case] ratio: f64,
        #[case] pct: u32,
    ) {
        let r = record(current, target);
        assert_eq!(r.progress_ratio(), ratio);
        assert_eq!(r.progress_percentage(), pct);
    }

    #[test]
    fn duration_is_none_before_start() {
        let r = record(0, 100);
        assert_eq!(r.duration_at(now()), None);
    }

    #[test]
    fn duration_runs_until_now_while_running() {
        let mut r = record(0, 100);
        r.started_at = Some(now() - Duration::seconds(10));
        assert_eq!(r.duration_at(now()), Some(10.0));

        r.started_at = Some(Utc::now() - Duration::seconds(10));
        let live = r.duration().unwrap();
        assert!((live - 10.0).abs() < 1.0);
    }

    #[test]
    fn duration_stops_at_completion() {
        let mut r = record(0, 100);
        r.started_at = Some(now() - Duration::seconds(20));
        r.completed_at = Some(now() - Duration::seconds(10));
        assert_eq!(r.duration_at(now()), Some(10.0));
    }

    #[test]
    fn duration_stops_at_failure() {
        let mut r = record(0, 100);
        r.started_at = Some(now() - Duration::seconds(30));
        r.failed_at = Some(now() - Duration::seconds(5));
        assert_eq!(r.duration_at(now()), Some(25.0));
    }

    #[test]
    fn threshold_override_falls_back_to_default() {
        let mut r = record(0, 100);
        assert_eq!(r.effective_cache_threshold(10), 10);

        r.cache_threshold = Some(20);
        assert_eq!(r.effective_cache_threshold(10), 20);

        r.cache_threshold = None;
        assert_eq!(r.effective_cache_threshold(10), 10);
    }

    #[test]
    fn lifecycle_marks_follow_state_machine() {
        let mut r = record(0, 100);
        r.mark_running(now()).unwrap();
        assert_eq!(r.status, TrackerStatus::Running);
        assert_eq!(r.started_at, Some(now()));

        r.mark_completed(now()).unwrap();
        assert_eq!(r.status, TrackerStatus::Completed);

        let err = r.mark_running(now()).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidTransition {
                from: TrackerStatus::Completed,
                to: TrackerStatus::Running
            }
        ));
    }

    #[test]
    fn mark_failed_caps_backtrace() {
        let mut r = record(0, 100);
        r.mark_running(now()).unwrap();

        let long = "x".repeat(1500);
        r.mark_failed(now(), "boom".into(), &long, 1000).unwrap();

        assert_eq!(r.status, TrackerStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("boom"));
        let bt = r.backtrace.unwrap();
        assert_eq!(bt.chars().count(), 1000);
        assert!(bt.ends_with("..."));
    }

    #[test]
    fn short_backtrace_is_kept_verbatim() {
        assert_eq!(truncate("a\nb", 1000), "a\nb");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn reset_clears_progress_and_timestamps() {
        let mut r = record(40, 100);
        r.mark_running(now()).unwrap();
        r.mark_completed(now()).unwrap();

        r.reset(250);

        assert_eq!(r.status, TrackerStatus::Pending);
        assert_eq!(r.current, 0);
        assert_eq!(r.target, 250);
        assert_eq!(r.started_at, None);
        assert_eq!(r.completed_at, None);
    }

    #[test]
    fn reset_clears_previous_failure() {
        let mut r = record(40, 100);
        r.mark_running(now()).unwrap();
        r.mark_failed(now(), "boom".to_string(), "boom", 1000).unwrap();

        r.reset(100);

        assert_eq!(r.failed_at, None);
        assert_eq!(r.error, None);
        assert_eq!(r.backtrace, None);
        assert_eq!(r.duration_at(now()), None);
    }
}
