//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（RDB, Redis など）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - CounterStore（RDB）が `current` の正本
//! - CacheStore（Redis など）は未 flush の進捗を一時的に持つだけ
//! - LockProvider がキャッシュ側の複合操作を直列化する

pub mod cache_store;
pub mod clock;
pub mod counter_store;
pub mod event_sink;
pub mod id_generator;
pub mod lock_provider;

pub use self::cache_store::CacheStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::counter_store::{CounterStore, UpdateFn};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock_provider::{LockLease, LockProvider};
