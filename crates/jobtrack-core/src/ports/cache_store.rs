//! CacheStore port - 共有キャッシュ（Redis または InMemory）
//!
//! 複数ワーカー・複数プロセスから共有される key-value ストア。
//! 単一キーの get/set/delete はそれぞれ atomic ですが、
//! 複合操作（read-add-write など）の atomic 性は提供しません。
//! 複合操作は ProgressCounter が LockProvider で直列化します。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TrackerError;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Current value for `key`; absent or expired entries read as 0.
    async fn get(&self, key: &str) -> Result<u64, TrackerError>;

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), TrackerError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), TrackerError>;
}
