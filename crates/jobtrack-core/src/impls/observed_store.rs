//! ObservedStore - 書き込み成功後に EventSink へ通知する CounterStore ラッパー
//!
//! 通知はコアのカウンタではなく、ここ（永続ストアの外側）で行う。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{JobId, TrackableRef, TrackerError, TrackerId, TrackerRecord};
use crate::ports::{CounterStore, EventSink, UpdateFn};

pub struct ObservedStore {
    inner: Arc<dyn CounterStore>,
    sink: Arc<dyn EventSink>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn CounterStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl CounterStore for ObservedStore {
    async fn create_or_fetch(
        &self,
        job_id: &JobId,
        trackable: &TrackableRef,
        default_target: u64,
    ) -> Result<TrackerRecord, TrackerError> {
        self.inner
            .create_or_fetch(job_id, trackable, default_target)
            .await
    }

    async fn get(&self, id: TrackerId) -> Result<TrackerRecord, TrackerError> {
        self.inner.get(id).await
    }

    async fn find_by_job_id(&self, job_id: &JobId) -> Result<TrackerRecord, TrackerError> {
        self.inner.find_by_job_id(job_id).await
    }

    async fn lock_and_update(
        &self,
        id: TrackerId,
        update: UpdateFn,
    ) -> Result<TrackerRecord, TrackerError> {
        let record = self.inner.lock_and_update(id, update).await?;
        self.sink.record_changed(&record);
        Ok(record)
    }
}
