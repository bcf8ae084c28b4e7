//! jobtrack-core
//!
//! Progress tracking for long-running background jobs.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, trackable, status, record, errors）
//! - **ports**: 抽象化レイヤー（CounterStore, CacheStore, LockProvider, Clock, など）
//! - **app**: アプリケーションロジック（counter, lifecycle, runner, builder）
//! - **impls**: 実装（InMemoryCounterStore など開発用）
//! - **config**: TrackerConfig
//! - **observability**: 集計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{JobContext, JobRunner, JobTracker, ProgressCounter, TrackedJob, TrackerBuilder};
pub use config::TrackerConfig;
pub use domain::{TrackerError, TrackerRecord, TrackerStatus};
