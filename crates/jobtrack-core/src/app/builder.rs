//! TrackerBuilder - ports のワイヤリングと起動時検証
//!
//! # 学習ポイント
//! - Builder パターン（未指定の port は in-memory 実装で補う）
//! - 起動時検証（Fail-fast 設計）: 設定の不整合は build() で弾く

use std::sync::Arc;

use super::counter::ProgressCounter;
use super::lifecycle::TrackerLifecycle;
use super::runner::JobRunner;
use crate::config::{ConfigError, TrackerConfig};
use crate::impls::{InMemoryCacheStore, InMemoryCounterStore, LocalLockProvider, ObservedStore};
use crate::ports::{
    CacheStore, Clock, CounterStore, EventSink, IdGenerator, LockProvider, SystemClock,
    UlidGenerator,
};

/// TrackerBuilder は JobTracker を構築
///
/// # 使用例
/// ```ignore
/// let tracker = TrackerBuilder::new()
///     .config(TrackerConfig::default().with_env_overrides()?)
///     .event_sink(Arc::new(ChannelEventSink::new(64)))
///     .build()?;
/// tracker.runner().run(&ctx, &job).await?;
/// ```
#[derive(Default)]
pub struct TrackerBuilder {
    config: TrackerConfig,
    store: Option<Arc<dyn CounterStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    locks: Option<Arc<dyn LockProvider>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid tracker config: {0}")]
    Config(#[from] ConfigError),
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Only used by the default in-memory store.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// # 検証
    /// - TrackerConfig::validate() に失敗したら BuildError::Config
    pub fn build(self) -> Result<JobTracker, BuildError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::new(ids, clock.clone())));
        let store: Arc<dyn CounterStore> = match self.event_sink {
            Some(sink) if self.config.auto_broadcast => Arc::new(ObservedStore::new(store, sink)),
            _ => store,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new(clock.clone())));
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(LocalLockProvider::new()));

        let counter = ProgressCounter::new(store, cache, locks, &self.config);
        let lifecycle = Arc::new(TrackerLifecycle::new(
            counter.clone(),
            clock.clone(),
            &self.config,
        ));
        Ok(JobTracker {
            config: self.config,
            clock,
            runner: JobRunner::new(lifecycle, counter),
        })
    }
}

/// Wired tracker: counter, lifecycle hooks and runner sharing the same ports.
#[derive(Clone)]
pub struct JobTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    runner: JobRunner<TrackerLifecycle>,
}

impl JobTracker {
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn counter(&self) -> &ProgressCounter {
        self.runner.hooks().counter()
    }

    pub fn lifecycle(&self) -> &Arc<TrackerLifecycle> {
        self.runner.hooks()
    }

    pub fn runner(&self) -> &JobRunner<TrackerLifecycle> {
        &self.runner
    }
}
