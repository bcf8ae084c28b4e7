//! Lifecycle - ジョブ実行基盤のフックと TrackerRecord の状態遷移をつなぐ
//!
//! ジョブ実行基盤（キューイング・スケジューリング）は外部にある前提で、
//! その before-enqueue / before-perform / after-perform / 失敗時 の 4 箇所から
//! 呼ばれるメソッドだけを定義します。

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::counter::ProgressCounter;
use crate::config::TrackerConfig;
use crate::domain::{JobId, TrackableRef, TrackerError, TrackerRecord, TrackerStatus};
use crate::ports::Clock;

/// Identity of one job invocation and the object it works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    pub trackable: TrackableRef,
}

impl JobContext {
    /// Fails with `Configuration` for a blank job id or trackable.
    pub fn new(job_id: impl Into<String>, trackable: TrackableRef) -> Result<Self, TrackerError> {
        let job_id = JobId::parse(job_id)?;
        trackable.validate()?;
        Ok(Self { job_id, trackable })
    }
}

/// LifecycleHooks はジョブ実行基盤から呼ばれる 4 つの遷移点
///
/// # 遷移
/// - on_enqueue: レコードを作成（または取得）して pending にリセット
/// - on_start: running
/// - on_success: 残りの進捗を flush し、current == target なら completed
/// - on_failure: failed + エラー内容を記録
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_enqueue(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError>;

    async fn on_start(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError>;

    async fn on_success(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError>;

    async fn on_failure(
        &self,
        ctx: &JobContext,
        error: &(dyn StdError + Send + Sync + 'static),
    ) -> Result<TrackerRecord, TrackerError>;
}

/// LifecycleHooks implementation backed by a `ProgressCounter`.
pub struct TrackerLifecycle {
    counter: ProgressCounter,
    clock: Arc<dyn Clock>,
    default_target: u64,
    backtrace_limit: usize,
}

impl TrackerLifecycle {
    pub fn new(counter: ProgressCounter, clock: Arc<dyn Clock>, config: &TrackerConfig) -> Self {
        Self {
            counter,
            clock,
            default_target: config.default_target,
            backtrace_limit: config.backtrace_limit,
        }
    }

    pub fn counter(&self) -> &ProgressCounter {
        &self.counter
    }

    async fn find(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError> {
        self.counter.store().find_by_job_id(&ctx.job_id).await
    }
}

#[async_trait]
impl LifecycleHooks for TrackerLifecycle {
    async fn on_enqueue(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError> {
        ctx.trackable.validate()?;
        let store = self.counter.store();
        let record = store
            .create_or_fetch(&ctx.job_id, &ctx.trackable, self.default_target)
            .await?;
        self.counter.discard_pending(record.id).await?;

        let target = self.default_target;
        let record = store
            .lock_and_update(
                record.id,
                Box::new(move |r: &mut TrackerRecord| {
                    r.reset(target);
                    Ok(())
                }),
            )
            .await?;
        info!(job_id = %ctx.job_id, tracker_id = %record.id, target, "tracker enqueued");
        Ok(record)
    }

    async fn on_start(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError> {
        let record = self.find(ctx).await?;
        let now = self.clock.now();
        let record = self
            .counter
            .store()
            .lock_and_update(
                record.id,
                Box::new(move |r: &mut TrackerRecord| r.mark_running(now)),
            )
            .await?;
        info!(job_id = %ctx.job_id, tracker_id = %record.id, "tracker running");
        Ok(record)
    }

    async fn on_success(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError> {
        let record = self.find(ctx).await?;
        self.counter.flush(record.id).await?;

        let record = self.counter.store().get(record.id).await?;
        if record.current != record.target {
            // Exact match only: over- or under-counted jobs stay running.
            warn!(
                job_id = %ctx.job_id,
                tracker_id = %record.id,
                current = record.current,
                target = record.target,
                "job finished without reaching its target; leaving tracker running"
            );
            return Ok(record);
        }

        let now = self.clock.now();
        let record = self
            .counter
            .store()
            .lock_and_update(
                record.id,
                Box::new(move |r: &mut TrackerRecord| {
                    if r.current == r.target {
                        r.mark_completed(now)?;
                    }
                    Ok(())
                }),
            )
            .await?;
        if record.status == TrackerStatus::Completed {
            info!(job_id = %ctx.job_id, tracker_id = %record.id, "tracker completed");
        }
        Ok(record)
    }

    async fn on_failure(
        &self,
        ctx: &JobContext,
        error: &(dyn StdError + Send + Sync + 'static),
    ) -> Result<TrackerRecord, TrackerError> {
        let record = self.find(ctx).await?;
        let now = self.clock.now();
        let message = error.to_string();
        let backtrace = error_chain(error);
        let limit = self.backtrace_limit;
        let record = self
            .counter
            .store()
            .lock_and_update(
                record.id,
                Box::new(move |r: &mut TrackerRecord| r.mark_failed(now, message, &backtrace, limit)),
            )
            .await?;
        warn!(
            job_id = %ctx.job_id,
            tracker_id = %record.id,
            error = record.error.as_deref().unwrap_or_default(),
            "tracker failed"
        );
        Ok(record)
    }
}

/// The error and its causes, one per line.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::TrackerStatus;
    use crate::impls::{InMemoryCacheStore, InMemoryCounterStore, LocalLockProvider};
    use crate::ports::{CounterStore, FixedClock, UlidGenerator};

    #[derive(Debug, thiserror::Error)]
    #[error("Error Message")]
    struct JobBodyError {
        #[source]
        source: std::io::Error,
    }

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryCounterStore>,
        lifecycle: TrackerLifecycle,
    }

    fn fixture(config: TrackerConfig) -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCounterStore::new(
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
        ));
        let cache = Arc::new(InMemoryCacheStore::new(clock.clone()));
        let counter = ProgressCounter::new(
            store.clone(),
            cache,
            Arc::new(LocalLockProvider::new()),
            &config,
        );
        let lifecycle = TrackerLifecycle::new(counter, clock.clone(), &config);
        Fixture {
            clock,
            store,
            lifecycle,
        }
    }

    fn ctx() -> JobContext {
        JobContext::new("job-1", TrackableRef::new("CsvUpload", "1")).unwrap()
    }

    #[test]
    fn context_rejects_missing_identity() {
        assert!(matches!(
            JobContext::new("", TrackableRef::new("CsvUpload", "1")),
            Err(TrackerError::Configuration(_))
        ));
        assert!(matches!(
            JobContext::new("job-1", TrackableRef::new("CsvUpload", "")),
            Err(TrackerError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_completed() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx();

        let record = f.lifecycle.on_enqueue(&ctx).await.unwrap();
        assert_eq!(record.status, TrackerStatus::Pending);
        assert_eq!(record.target, 100);

        let record = f.lifecycle.on_start(&ctx).await.unwrap();
        assert_eq!(record.status, TrackerStatus::Running);
        assert_eq!(record.started_at, Some(f.clock.now()));

        let counter = f.lifecycle.counter();
        counter.set_target(record.id, 3).await.unwrap();
        for _ in 0..3 {
            counter.increment(record.id, true).await.unwrap();
        }
        assert_eq!(f.store.get(record.id).await.unwrap().current, 0);

        f.clock.advance(Duration::seconds(10));
        let record = f.lifecycle.on_success(&ctx).await.unwrap();
        assert_eq!(record.current, 3);
        assert_eq!(record.status, TrackerStatus::Completed);
        assert_eq!(record.completed_at, Some(f.clock.now()));
        assert_eq!(record.duration_at(f.clock.now()), Some(10.0));
    }

    #[tokio::test]
    async fn success_below_target_stays_running() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx();
        let record = f.lifecycle.on_enqueue(&ctx).await.unwrap();
        f.lifecycle.on_start(&ctx).await.unwrap();
        f.lifecycle.counter().increment(record.id, true).await.unwrap();

        let record = f.lifecycle.on_success(&ctx).await.unwrap();
        assert_eq!(record.current, 1);
        assert_eq!(record.status, TrackerStatus::Running);
        assert_eq!(record.completed_at, None);
    }

    #[tokio::test]
    async fn success_above_target_stays_running() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx();
        let record = f.lifecycle.on_enqueue(&ctx).await.unwrap();
        f.lifecycle.on_start(&ctx).await.unwrap();
        let counter = f.lifecycle.counter();
        counter.set_target(record.id, 2).await.unwrap();
        for _ in 0..3 {
            counter.increment(record.id, false).await.unwrap();
        }

        let record = f.lifecycle.on_success(&ctx).await.unwrap();
        assert_eq!(record.current, 3);
        assert_eq!(record.status, TrackerStatus::Running);
    }

    #[tokio::test]
    async fn failure_records_error_and_chain() {
        let f = fixture(TrackerConfig {
            backtrace_limit: 40,
            ..TrackerConfig::default()
        });
        let ctx = ctx();
        f.lifecycle.on_enqueue(&ctx).await.unwrap();
        f.lifecycle.on_start(&ctx).await.unwrap();

        let err = JobBodyError {
            source: std::io::Error::other("disk quota exceeded on the upload volume"),
        };
        let record = f.lifecycle.on_failure(&ctx, &err).await.unwrap();

        assert_eq!(record.status, TrackerStatus::Failed);
        assert_eq!(record.failed_at, Some(f.clock.now()));
        assert_eq!(record.error.as_deref(), Some("Error Message"));
        let backtrace = record.backtrace.unwrap();
        assert!(backtrace.starts_with("Error Message\ncaused by: disk"));
        assert_eq!(backtrace.chars().count(), 40);
    }

    #[tokio::test]
    async fn reenqueue_resets_progress_and_stale_cache() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx();
        let record = f.lifecycle.on_enqueue(&ctx).await.unwrap();
        f.lifecycle.on_start(&ctx).await.unwrap();
        let counter = f.lifecycle.counter();
        counter.increment(record.id, false).await.unwrap();
        counter.increment(record.id, true).await.unwrap();

        let again = f.lifecycle.on_enqueue(&ctx).await.unwrap();
        assert_eq!(again.id, record.id);
        assert_eq!(again.status, TrackerStatus::Pending);
        assert_eq!(again.current, 0);
        assert_eq!(again.started_at, None);
        assert_eq!(counter.pending(record.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hooks_for_unknown_job_fail() {
        let f = fixture(TrackerConfig::default());
        assert!(matches!(
            f.lifecycle.on_start(&ctx()).await,
            Err(TrackerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_is_an_invalid_transition() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx();
        f.lifecycle.on_enqueue(&ctx).await.unwrap();
        f.lifecycle.on_start(&ctx).await.unwrap();

        assert!(matches!(
            f.lifecycle.on_start(&ctx).await,
            Err(TrackerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn error_chain_lists_causes() {
        let err = JobBodyError {
            source: std::io::Error::other("inner"),
        };
        assert_eq!(error_chain(&err), "Error Message\ncaused by: inner");
    }
}
