//! LocalLockProvider - プロセス内のキー単位ロック
//!
//! # 実装詳細
//! - HashMap<String, Arc<tokio::sync::Mutex<()>>> でキーごとに Mutex を持つ
//! - lease は OwnedMutexGuard を保持し、release / drop で解放
//! - 全ての呼び出し元が同一プロセスにいる場合にのみ十分

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::TrackerError;
use crate::ports::{LockLease, LockProvider};

type KeyLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Default)]
pub struct LocalLockProvider {
    locks: KeyLocks,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a live mutex (held or awaited).
    pub fn tracked_keys(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LockProvider for LocalLockProvider {
    async fn acquire(&self, key: &str) -> Result<Box<dyn LockLease>, TrackerError> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| TrackerError::Lock(format!("lock table poisoned: {e}")))?;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        Ok(Box::new(LocalLease {
            key: key.to_string(),
            guard,
            locks: Arc::clone(&self.locks),
        }))
    }
}

struct LocalLease {
    key: String,
    guard: OwnedMutexGuard<()>,
    locks: KeyLocks,
}

#[async_trait]
impl LockLease for LocalLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), TrackerError> {
        let LocalLease { key, guard, locks } = *self;
        {
            let mut table = locks
                .lock()
                .map_err(|e| TrackerError::Lock(format!("lock table poisoned: {e}")))?;
            // Only the table and this guard reference the mutex: nobody is waiting.
            if let Some(mutex) = table.get(&key)
                && Arc::strong_count(mutex) == 2
            {
                table.remove(&key);
            }
        }
        drop(guard);
        Ok(())
    }
}
