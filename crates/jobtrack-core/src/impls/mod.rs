//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryCounterStore**: 開発用の永続ストア
//! - **InMemoryCacheStore**: 開発用の共有キャッシュ（TTL 付き）
//! - **LocalLockProvider**: プロセス内のキー単位ロック
//! - **ObservedStore**: 書き込み後に EventSink へ通知するラッパー
//! - **ChannelEventSink**: broadcast チャネルへの通知
//!
//! # 本番用実装
//! RDB / Redis 向けの実装は別クレートに置き、同じ ports を実装する。

pub mod channel_sink;
pub mod inmem_cache;
pub mod inmem_store;
pub mod local_lock;
pub mod observed_store;

pub use self::channel_sink::ChannelEventSink;
pub use self::inmem_cache::InMemoryCacheStore;
pub use self::inmem_store::InMemoryCounterStore;
pub use self::local_lock::LocalLockProvider;
pub use self::observed_store::ObservedStore;
