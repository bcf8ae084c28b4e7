//! ProgressCounter - キャッシュでまとめてから永続化する進捗カウンタ
//!
//! # フロー
//! 1. increment(use_cache=true): キャッシュキーのロック内で read-add-write
//! 2. ロック解放後、閾値に達していれば flush
//! 3. flush: キャッシュキーのロック内で read-then-delete、
//!    ロック解放後に CounterStore のレコードロックで `current` に加算
//!
//! # 不変条件
//! - durable `current` + キャッシュ値 == 発行済み increment 数
//! - キャッシュ側ロックを持ったまま永続ストアのロックを取らない

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::domain::{TrackerError, TrackerId, TrackerRecord, progress_cache_key};
use crate::ports::{CacheStore, CounterStore, LockProvider};

#[derive(Clone)]
pub struct ProgressCounter {
    store: Arc<dyn CounterStore>,
    cache: Arc<dyn CacheStore>,
    locks: Arc<dyn LockProvider>,
    default_threshold: u64,
    cache_ttl: Duration,
}

impl ProgressCounter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        cache: Arc<dyn CacheStore>,
        locks: Arc<dyn LockProvider>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            default_threshold: config.cache_threshold,
            cache_ttl: config.cache_ttl(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn default_threshold(&self) -> u64 {
        self.default_threshold
    }

    /// Count one unit of progress.
    ///
    /// With `use_cache`, the hit lands in the cache and is flushed once the
    /// record's threshold is reached. Without it, `current` is bumped directly
    /// under the record lock.
    pub async fn increment(
        &self,
        id: TrackerId,
        use_cache: bool,
    ) -> Result<TrackerRecord, TrackerError> {
        if !use_cache {
            return self
                .store
                .lock_and_update(
                    id,
                    Box::new(|r: &mut TrackerRecord| {
                        r.current += 1;
                        Ok(())
                    }),
                )
                .await;
        }

        let record = self.store.get(id).await?;
        let threshold = record.effective_cache_threshold(self.default_threshold);
        let key = progress_cache_key(id);

        let cached = self
            .locks
            .with_lock(&key, || async {
                let next = self.cache.get(&key).await? + 1;
                self.cache.set(&key, next, self.cache_ttl).await?;
                Ok::<_, TrackerError>(next)
            })
            .await?;
        debug!(tracker_id = %id, cached, threshold, "cached progress");

        // The cache lock is released here; flush takes it again on its own.
        if cached >= threshold {
            self.flush(id).await?;
            return self.store.get(id).await;
        }
        Ok(record)
    }

    /// Move the cached progress of `id` into the durable `current`.
    ///
    /// A zero cache is a no-op and takes no durable lock. If the durable write
    /// fails, the drained amount is put back into the cache before the error
    /// is returned.
    pub async fn flush(&self, id: TrackerId) -> Result<(), TrackerError> {
        let key = progress_cache_key(id);
        let pending = self
            .locks
            .with_lock(&key, || async {
                let value = self.cache.get(&key).await?;
                if value > 0 {
                    self.cache.delete(&key).await?;
                }
                Ok::<_, TrackerError>(value)
            })
            .await?;

        if pending == 0 {
            debug!(tracker_id = %id, "nothing to flush");
            return Ok(());
        }

        let result = self
            .store
            .lock_and_update(
                id,
                Box::new(move |r: &mut TrackerRecord| {
                    r.current += pending;
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(record) => {
                info!(
                    tracker_id = %id,
                    pending,
                    current = record.current,
                    target = record.target,
                    "flushed progress cache"
                );
                Ok(())
            }
            Err(err) => {
                warn!(tracker_id = %id, pending, error = %err, "flush failed, restoring cache");
                if let Err(restore_err) = self.restore(id, pending).await {
                    error!(
                        tracker_id = %id,
                        pending,
                        error = %restore_err,
                        "failed to restore progress cache; drained progress is lost"
                    );
                }
                Err(err)
            }
        }
    }

    async fn restore(&self, id: TrackerId, amount: u64) -> Result<(), TrackerError> {
        let key = progress_cache_key(id);
        self.locks
            .with_lock(&key, || async {
                let value = self.cache.get(&key).await? + amount;
                self.cache.set(&key, value, self.cache_ttl).await
            })
            .await
    }

    /// Drop any unflushed progress for `id` and return the discarded amount.
    ///
    /// Used when a job is enqueued again so a stale entry from an earlier run
    /// is not counted towards the new one.
    pub async fn discard_pending(&self, id: TrackerId) -> Result<u64, TrackerError> {
        let key = progress_cache_key(id);
        let discarded = self
            .locks
            .with_lock(&key, || async {
                let value = self.cache.get(&key).await?;
                self.cache.delete(&key).await?;
                Ok::<_, TrackerError>(value)
            })
            .await?;
        if discarded > 0 {
            warn!(tracker_id = %id, discarded, "discarded stale progress cache");
        }
        Ok(discarded)
    }

    /// Unflushed progress for `id`. Advisory: not synchronized with writers.
    pub async fn pending(&self, id: TrackerId) -> Result<u64, TrackerError> {
        self.cache.get(&progress_cache_key(id)).await
    }

    pub async fn set_target(
        &self,
        id: TrackerId,
        target: u64,
    ) -> Result<TrackerRecord, TrackerError> {
        self.store
            .lock_and_update(
                id,
                Box::new(move |r: &mut TrackerRecord| {
                    r.target = target;
                    Ok(())
                }),
            )
            .await
    }

    /// Override the flush threshold for one record. `None` restores the default.
    pub async fn set_cache_threshold(
        &self,
        id: TrackerId,
        threshold: Option<u64>,
    ) -> Result<TrackerRecord, TrackerError> {
        if threshold == Some(0) {
            return Err(TrackerError::Configuration(
                "cache_threshold must be at least 1".to_string(),
            ));
        }
        self.store
            .lock_and_update(
                id,
                Box::new(move |r: &mut TrackerRecord| {
                    r.cache_threshold = threshold;
                    Ok(())
                }),
            )
            .await
    }
}
