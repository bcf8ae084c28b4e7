//! InMemoryCounterStore - 開発用の永続ストア
//!
//! # 実装詳細
//! - 索引（id / job_id / trackable）は 1 つの Mutex で保護
//! - 各レコードは自分専用の Mutex を持ち、これが row-level lock の代わり
//! - ロック順序は「索引 → レコード」の一方向のみ（逆順で取らない）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobId, TrackableRef, TrackerError, TrackerId, TrackerRecord, TrackerStatus};
use crate::observability::StatusCounts;
use crate::ports::{Clock, CounterStore, IdGenerator, UpdateFn};

#[derive(Default)]
struct InMemoryStoreState {
    /// All tracker records (single source of truth).
    records: HashMap<TrackerId, Arc<Mutex<TrackerRecord>>>,

    /// Unique index: job_id -> record.
    by_job: HashMap<JobId, TrackerId>,

    /// Unique index: trackable -> its latest record.
    by_trackable: HashMap<TrackableRef, TrackerId>,
}

/// In-memory durable store.
pub struct InMemoryCounterStore {
    state: Mutex<InMemoryStoreState>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCounterStore {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryStoreState::default()),
            ids,
            clock,
            writes: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of persisted writes (creates + updates) so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate losing the connection: every operation fails with `Persistence`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn counts_by_status(&self) -> StatusCounts {
        let rows: Vec<_> = {
            let state = self.state.lock().await;
            state.records.values().cloned().collect()
        };
        let mut counts = StatusCounts::default();
        for row in rows {
            match row.lock().await.status {
                TrackerStatus::Pending => counts.pending += 1,
                TrackerStatus::Running => counts.running += 1,
                TrackerStatus::Completed => counts.completed += 1,
                TrackerStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn ensure_available(&self) -> Result<(), TrackerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence(
                "counter store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn row(&self, id: TrackerId) -> Result<Arc<Mutex<TrackerRecord>>, TrackerError> {
        let state = self.state.lock().await;
        state
            .records
            .get(&id)
            .cloned()
            .ok_or(TrackerError::NotFound(id))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn create_or_fetch(
        &self,
        job_id: &JobId,
        trackable: &TrackableRef,
        default_target: u64,
    ) -> Result<TrackerRecord, TrackerError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if let Some(id) = state.by_job.get(job_id).copied() {
            let row = state.records.get(&id).cloned().ok_or(TrackerError::NotFound(id))?;
            let record = row.lock().await.clone();
            if &record.trackable != trackable {
                return Err(TrackerError::Persistence(format!(
                    "job_id={job_id} is already tracking {}",
                    record.trackable
                )));
            }
            return Ok(record);
        }

        // Only one active tracker per trackable. A finished one may be replaced.
        if let Some(existing) = state.by_trackable.get(trackable).copied()
            && let Some(row) = state.records.get(&existing)
        {
            let status = row.lock().await.status;
            if !status.is_terminal() {
                return Err(TrackerError::Persistence(format!(
                    "trackable {trackable} already has an active tracker ({existing})"
                )));
            }
        }

        let record = TrackerRecord::new(
            self.ids.generate_tracker_id(),
            job_id.clone(),
            trackable.clone(),
            default_target,
            self.clock.now(),
        );
        state.by_job.insert(job_id.clone(), record.id);
        state.by_trackable.insert(trackable.clone(), record.id);
        state
            .records
            .insert(record.id, Arc::new(Mutex::new(record.clone())));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn get(&self, id: TrackerId) -> Result<TrackerRecord, TrackerError> {
        self.ensure_available()?;
        let row = self.row(id).await?;
        let record = row.lock().await.clone();
        Ok(record)
    }

    async fn find_by_job_id(&self, job_id: &JobId) -> Result<TrackerRecord, TrackerError> {
        self.ensure_available()?;
        let id = {
            let state = self.state.lock().await;
            state
                .by_job
                .get(job_id)
                .copied()
                .ok_or_else(|| TrackerError::JobNotFound(job_id.clone()))?
        };
        self.get(id).await
    }

    async fn lock_and_update(
        &self,
        id: TrackerId,
        update: UpdateFn,
    ) -> Result<TrackerRecord, TrackerError> {
        let row = self.row(id).await?;

        // The guard is the row lock; dropping it on any path releases the row.
        let mut guard = row.lock().await;
        self.ensure_available()?;

        let mut next = guard.clone();
        update(&mut next)?;
        next.updated_at = self.clock.now();
        *guard = next.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}
