//! LockProvider port - キー単位の排他制御
//!
//! キャッシュの read-add-write / read-then-delete を、同じレコードを触る
//! 全ての呼び出し元の間で直列化するためのロック。
//!
//! # 実装
//! - LocalLockProvider: プロセス内（tokio Mutex）
//! - 複数プロセス構成では、キャッシュストア側で atomic に実装された分散ロックを差し込む

use std::future::Future;

use async_trait::async_trait;

use crate::domain::TrackerError;

/// A held lock. The holder must `release` it when the critical section ends.
///
/// Implementations also release on drop, so a panicking critical section
/// does not leave the key locked.
#[async_trait]
pub trait LockLease: Send {
    fn key(&self) -> &str;

    async fn release(self: Box<Self>) -> Result<(), TrackerError>;
}

/// LockProvider はキー単位の排他ロックを発行する
///
/// 取得に失敗した場合は `TrackerError::Lock` を返す。
/// 呼び出し側はロックなしの更新にフォールバックしてはいけない。
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn acquire(&self, key: &str) -> Result<Box<dyn LockLease>, TrackerError>;
}

impl dyn LockProvider {
    /// Run `f` while holding the lock for `key`.
    ///
    /// Acquisition failure is returned before `f` runs. A release failure after
    /// `f` finished is logged; `f`'s result is returned either way.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T, TrackerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TrackerError>>,
    {
        let lease = self.acquire(key).await?;
        let result = f().await;
        if let Err(err) = lease.release().await {
            tracing::warn!(key, error = %err, "lock release failed");
        }
        result
    }
}
