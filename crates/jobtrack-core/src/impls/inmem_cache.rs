//! InMemoryCacheStore - 開発用の共有キャッシュ
//!
//! # 実装詳細
//! - HashMap<String, CacheEntry> を tokio Mutex で保護
//! - TTL は Clock で判定（期限切れのエントリは読み出し時に削除）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::TrackerError;
use crate::ports::{CacheStore, Clock};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: u64,
    expires_at: DateTime<Utc>,
}

pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub async fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.get(key).is_some_and(|e| e.expires_at > now)
    }

    /// Simulate an outage: every operation fails with `Cache`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), TrackerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TrackerError::Cache("cache store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<u64, TrackerError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(entry.value),
            Some(_) => {
                entries.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), TrackerError> {
        self.ensure_available()?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| TrackerError::Cache(format!("invalid ttl: {e}")))?;
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| TrackerError::Cache(format!("ttl out of range: {ttl}")))?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TrackerError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}
