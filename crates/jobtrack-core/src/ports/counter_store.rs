//! CounterStore port - 進捗の正本（source of truth）
//!
//! CounterStore は TrackerRecord の永続化を担当します。
//! `current` の更新は必ず `lock_and_update` を経由し、
//! レコード単位の排他ロック（row-level lock 相当）の下で read-modify-write します。
//!
//! # 実装
//! - InMemoryCounterStore（開発・テスト用）
//! - ObservedStore（書き込み後に EventSink へ通知するラッパー）

use async_trait::async_trait;

use crate::domain::{JobId, TrackableRef, TrackerError, TrackerId, TrackerRecord};

/// Mutation applied to a record while its lock is held.
///
/// Returning an error aborts the update: nothing is persisted.
pub type UpdateFn = Box<dyn FnOnce(&mut TrackerRecord) -> Result<(), TrackerError> + Send>;

/// CounterStore は TrackerRecord の正本
///
/// # 設計原則
/// - `lock_and_update` は record 単位で直列化される
/// - ロックは全ての終了経路で解放される
/// - 制約違反（job_id / trackable の重複）や接続断は `TrackerError::Persistence`
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the record for `job_id`, creating it when absent.
    ///
    /// Creating a second record for a trackable that already has one fails
    /// with `Persistence`. An existing record must belong to `trackable`.
    async fn create_or_fetch(
        &self,
        job_id: &JobId,
        trackable: &TrackableRef,
        default_target: u64,
    ) -> Result<TrackerRecord, TrackerError>;

    async fn get(&self, id: TrackerId) -> Result<TrackerRecord, TrackerError>;

    async fn find_by_job_id(&self, job_id: &JobId) -> Result<TrackerRecord, TrackerError>;

    /// Run `update` under the record's exclusive lock and persist the result.
    async fn lock_and_update(
        &self,
        id: TrackerId,
        update: UpdateFn,
    ) -> Result<TrackerRecord, TrackerError>;
}
