use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobtrack_core::app::{BoxError, JobContext, JobProgress, RunError, TrackedJob, TrackerBuilder};
use jobtrack_core::config::TrackerConfig;
use jobtrack_core::domain::{TrackableRef, TrackerRecord};
use jobtrack_core::impls::{ChannelEventSink, InMemoryCounterStore};
use jobtrack_core::observability::StatusCounts;
use jobtrack_core::ports::{Clock, CounterStore, SystemClock, UlidGenerator};

/// Run a simulated import job and report its tracked progress.
#[derive(Debug, Parser)]
#[command(name = "jobtrack", version)]
struct Args {
    /// Units of work in the simulated job.
    #[arg(long, default_value_t = 120)]
    target: u64,

    /// Per-job cache threshold override.
    #[arg(long)]
    threshold: Option<u64>,

    /// Concurrent workers sharing the job.
    #[arg(long, default_value_t = 4)]
    workers: u64,

    /// Fail the job after this many units.
    #[arg(long)]
    fail_after: Option<u64>,

    /// Delay per unit, in milliseconds.
    #[arg(long, default_value_t = 5)]
    delay_ms: u64,

    /// JSON config file; `JOBTRACK_*` variables are applied on top.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// 複数 worker で target 件を分担して処理するジョブ
struct SimulatedImport {
    target: u64,
    threshold: Option<u64>,
    workers: u64,
    fail_after: Option<u64>,
    delay: Duration,
}

#[derive(Debug)]
struct ImportFailed(u64);

impl std::fmt::Display for ImportFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "import failed after {} rows", self.0)
    }
}

impl std::error::Error for ImportFailed {}

#[async_trait]
impl TrackedJob for SimulatedImport {
    async fn perform(&self, progress: &JobProgress) -> Result<(), BoxError> {
        progress.set_target(self.target).await?;
        if self.threshold.is_some() {
            progress.set_cache_threshold(self.threshold).await?;
        }

        let units = self
            .fail_after
            .map_or(self.target, |limit| limit.min(self.target));

        // 端数は先頭の worker から 1 件ずつ配る
        let workers = self.workers.max(1);
        let mut handles = Vec::new();
        for n in 0..workers {
            let share = units / workers + u64::from(n < units % workers);
            let progress = progress.clone();
            let delay = self.delay;
            handles.push(tokio::spawn(async move {
                for _ in 0..share {
                    sleep(delay).await;
                    progress.increment(true).await?;
                }
                Ok::<_, BoxError>(())
            }));
        }

        let mut done = 0;
        for handle in handles {
            handle.await??;
            done += 1;
            info!(worker_done = done, workers, "worker finished");
        }

        if units < self.target {
            return Err(Box::new(ImportFailed(units)));
        }
        Ok(())
    }
}

/// Log each percentage change until every sender is gone.
///
/// Returns the number of progress lines logged.
async fn log_progress(mut updates: broadcast::Receiver<TrackerRecord>) -> usize {
    let mut last = None;
    let mut logged = 0;
    loop {
        let record = match updates.recv().await {
            Ok(record) => record,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "progress watcher lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let pct = record.progress_percentage();
        if last != Some(pct) {
            info!(tracker_id = %record.id, status = %record.status, pct, "progress");
            last = Some(pct);
            logged += 1;
        }
    }
    logged
}

#[derive(Serialize)]
struct Summary<'a> {
    record: &'a TrackerRecord,
    percentage: u32,
    duration_secs: Option<f64>,
    counts: StatusCounts,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TrackerConfig> {
    let config = match path {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    // (A) in-memory の ports を用意（store は集計のため手元に残す）
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryCounterStore::new(
        Arc::new(UlidGenerator::new(clock.clone())),
        clock.clone(),
    ));
    let sink = Arc::new(ChannelEventSink::new(256));
    let updates = sink.subscribe();

    let tracker = TrackerBuilder::new()
        .config(config)
        .clock(clock.clone())
        .store(store.clone())
        .event_sink(sink)
        .build()?;

    // (B) 更新通知を購読して進捗を表示
    let watcher = tokio::spawn(log_progress(updates));

    // (C) enqueue → perform
    let ctx = JobContext::new("demo-import-1", TrackableRef::new("CsvUpload", "1"))?;
    let job = SimulatedImport {
        target: args.target,
        threshold: args.threshold,
        workers: args.workers,
        fail_after: args.fail_after,
        delay: Duration::from_millis(args.delay_ms),
    };
    match tracker.runner().run(&ctx, &job).await {
        Ok(_) => {}
        Err(RunError::Job(err)) => tracing::warn!(error = %err, "job failed"),
        Err(err) => return Err(err.into()),
    }

    // (D) 結果を表示
    let record = tracker.counter().store().find_by_job_id(&ctx.job_id).await?;
    let summary = Summary {
        record: &record,
        percentage: record.progress_percentage(),
        duration_secs: record.duration_at(clock.now()),
        counts: store.counts_by_status().await,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    // sender を閉じて watcher を終わらせる
    drop(tracker);
    let logged = watcher.await.context("progress watcher panicked")?;
    tracing::debug!(logged, "progress watcher finished");
    Ok(())
}
