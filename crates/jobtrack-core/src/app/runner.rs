//! JobRunner - ジョブ本体を lifecycle hooks に通して実行する
//!
//! # 流れ
//! - enqueue: on_enqueue
//! - perform: on_start → TrackedJob::perform → on_success / on_failure
//!
//! ジョブ本体のエラーは記録したうえで、そのまま呼び出し元へ返す。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::counter::ProgressCounter;
use super::lifecycle::{JobContext, LifecycleHooks};
use crate::domain::{TrackerError, TrackerId, TrackerRecord};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The job body failed. Already recorded on the tracker when possible.
    #[error("job failed: {0}")]
    Job(BoxError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// TrackedJob はジョブ本体
///
/// # 使用例
/// ```ignore
/// struct ImportRows { rows: Vec<Row> }
///
/// #[async_trait]
/// impl TrackedJob for ImportRows {
///     async fn perform(&self, progress: &JobProgress) -> Result<(), BoxError> {
///         progress.set_target(self.rows.len() as u64).await?;
///         for row in &self.rows {
///             import(row).await?;
///             progress.increment(true).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TrackedJob: Send + Sync {
    async fn perform(&self, progress: &JobProgress) -> Result<(), BoxError>;
}

/// Job-facing handle on one tracker.
#[derive(Clone)]
pub struct JobProgress {
    id: TrackerId,
    counter: ProgressCounter,
}

impl JobProgress {
    pub fn new(id: TrackerId, counter: ProgressCounter) -> Self {
        Self { id, counter }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub async fn set_target(&self, target: u64) -> Result<TrackerRecord, TrackerError> {
        self.counter.set_target(self.id, target).await
    }

    pub async fn set_cache_threshold(
        &self,
        threshold: Option<u64>,
    ) -> Result<TrackerRecord, TrackerError> {
        self.counter.set_cache_threshold(self.id, threshold).await
    }

    pub async fn increment(&self, use_cache: bool) -> Result<TrackerRecord, TrackerError> {
        self.counter.increment(self.id, use_cache).await
    }

    /// Durable state only; unflushed cache hits are not included.
    pub async fn record(&self) -> Result<TrackerRecord, TrackerError> {
        self.counter.store().get(self.id).await
    }
}

pub struct JobRunner<H: LifecycleHooks> {
    hooks: Arc<H>,
    counter: ProgressCounter,
}

impl<H: LifecycleHooks> Clone for JobRunner<H> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
            counter: self.counter.clone(),
        }
    }
}

impl<H: LifecycleHooks> JobRunner<H> {
    pub fn new(hooks: Arc<H>, counter: ProgressCounter) -> Self {
        Self { hooks, counter }
    }

    pub fn hooks(&self) -> &Arc<H> {
        &self.hooks
    }

    pub async fn enqueue(&self, ctx: &JobContext) -> Result<TrackerRecord, TrackerError> {
        self.hooks.on_enqueue(ctx).await
    }

    /// Run an already enqueued job.
    pub async fn perform<J>(&self, ctx: &JobContext, job: &J) -> Result<TrackerRecord, RunError>
    where
        J: TrackedJob + ?Sized,
    {
        let record = self.hooks.on_start(ctx).await?;
        let progress = JobProgress::new(record.id, self.counter.clone());

        match job.perform(&progress).await {
            Ok(()) => Ok(self.hooks.on_success(ctx).await?),
            Err(err) => {
                if let Err(record_err) = self.hooks.on_failure(ctx, &*err).await {
                    error!(
                        job_id = %ctx.job_id,
                        tracker_id = %record.id,
                        error = %record_err,
                        "failed to record job failure"
                    );
                }
                Err(RunError::Job(err))
            }
        }
    }

    /// enqueue + perform.
    pub async fn run<J>(&self, ctx: &JobContext, job: &J) -> Result<TrackerRecord, RunError>
    where
        J: TrackedJob + ?Sized,
    {
        self.enqueue(ctx).await?;
        self.perform(ctx, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::lifecycle::TrackerLifecycle;
    use crate::config::TrackerConfig;
    use crate::domain::{TrackableRef, TrackerStatus};
    use crate::impls::{InMemoryCacheStore, InMemoryCounterStore, LocalLockProvider};
    use crate::ports::{CounterStore, SystemClock, UlidGenerator};

    struct Fixture {
        store: Arc<InMemoryCounterStore>,
        runner: JobRunner<TrackerLifecycle>,
    }

    fn fixture(config: TrackerConfig) -> Fixture {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(InMemoryCounterStore::new(
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
        ));
        let counter = ProgressCounter::new(
            store.clone(),
            Arc::new(InMemoryCacheStore::new(clock.clone())),
            Arc::new(LocalLockProvider::new()),
            &config,
        );
        let lifecycle = Arc::new(TrackerLifecycle::new(counter.clone(), clock, &config));
        Fixture {
            store,
            runner: JobRunner::new(lifecycle, counter),
        }
    }

    fn ctx(job_id: &str) -> JobContext {
        JobContext::new(job_id, TrackableRef::new("CsvUpload", job_id)).unwrap()
    }

    /// Sets a target and increments through the cache.
    struct CountingJob {
        target: u64,
        increments: u64,
    }

    #[async_trait]
    impl TrackedJob for CountingJob {
        async fn perform(&self, progress: &JobProgress) -> Result<(), BoxError> {
            progress.set_target(self.target).await?;
            for _ in 0..self.increments {
                progress.increment(true).await?;
            }
            Ok(())
        }
    }

    struct FailingJob;

    #[async_trait]
    impl TrackedJob for FailingJob {
        async fn perform(&self, progress: &JobProgress) -> Result<(), BoxError> {
            progress.increment(false).await?;
            Err("Error Message".into())
        }
    }

    #[tokio::test]
    async fn target_twelve_threshold_ten_flushes_at_ten_and_completes() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx("job-12");
        let record = f.runner.enqueue(&ctx).await.unwrap();
        f.runner.hooks().on_start(&ctx).await.unwrap();

        let progress = JobProgress::new(record.id, f.runner.counter.clone());
        progress.set_target(12).await.unwrap();
        for i in 1..=12u64 {
            let persisted = progress.increment(true).await.unwrap();
            let expected = if i < 10 { 0 } else { 10 };
            assert_eq!(persisted.current, expected, "after increment {i}");
        }
        assert_eq!(f.runner.counter.pending(record.id).await.unwrap(), 2);

        let done = f.runner.hooks().on_success(&ctx).await.unwrap();
        assert_eq!(done.current, 12);
        assert_eq!(done.status, TrackerStatus::Completed);
        assert_eq!(done.progress_percentage(), 100);
        assert_eq!(f.runner.counter.pending(record.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_drives_job_to_completion() {
        let f = fixture(TrackerConfig::default());
        let record = f
            .runner
            .run(
                &ctx("job-1"),
                &CountingJob {
                    target: 25,
                    increments: 25,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.status, TrackerStatus::Completed);
        assert_eq!(record.current, 25);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn short_job_is_left_running() {
        let f = fixture(TrackerConfig::default());
        let record = f
            .runner
            .run(
                &ctx("job-1"),
                &CountingJob {
                    target: 25,
                    increments: 7,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.status, TrackerStatus::Running);
        assert_eq!(record.current, 7);
        assert_eq!(record.progress_percentage(), 28);
    }

    #[tokio::test]
    async fn failing_job_is_recorded_and_reraised() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx("job-1");

        let err = f.runner.run(&ctx, &FailingJob).await.unwrap_err();
        match err {
            RunError::Job(inner) => assert_eq!(inner.to_string(), "Error Message"),
            other => panic!("unexpected error: {other}"),
        }

        let record = f.store.find_by_job_id(&ctx.job_id).await.unwrap();
        assert_eq!(record.status, TrackerStatus::Failed);
        assert_eq!(record.current, 1);
        assert_eq!(record.error.as_deref(), Some("Error Message"));
        assert!(record.backtrace.is_some());
        assert!(record.failed_at.is_some());
    }

    #[tokio::test]
    async fn failure_recording_error_keeps_original_error() {
        let f = fixture(TrackerConfig::default());
        let ctx = ctx("job-1");
        f.runner.enqueue(&ctx).await.unwrap();

        struct OutageJob(Arc<InMemoryCounterStore>);

        #[async_trait]
        impl TrackedJob for OutageJob {
            async fn perform(&self, _progress: &JobProgress) -> Result<(), BoxError> {
                self.0.set_unavailable(true);
                Err("boom".into())
            }
        }

        let err = f
            .runner
            .perform(&ctx, &OutageJob(f.store.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Job(ref inner) if inner.to_string() == "boom"));

        f.store.set_unavailable(false);
        let record = f.store.find_by_job_id(&ctx.job_id).await.unwrap();
        assert_eq!(record.status, TrackerStatus::Running);
    }

    #[tokio::test]
    async fn perform_without_enqueue_is_a_tracker_error() {
        let f = fixture(TrackerConfig::default());
        let err = f
            .runner
            .perform(
                &ctx("job-1"),
                &CountingJob {
                    target: 1,
                    increments: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Tracker(TrackerError::JobNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn independent_jobs_run_concurrently() {
        let f = fixture(TrackerConfig::default());
        let mut handles = Vec::new();
        for n in 0..8 {
            let runner = f.runner.clone();
            handles.push(tokio::spawn(async move {
                runner
                    .run(
                        &ctx(&format!("job-{n}")),
                        &CountingJob {
                            target: 33,
                            increments: 33,
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.status, TrackerStatus::Completed);
            assert_eq!(record.current, 33);
        }
        assert_eq!(f.store.counts_by_status().await.completed, 8);
    }
}
