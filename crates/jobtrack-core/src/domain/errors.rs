//! Errors - エラー型と分類

use thiserror::Error;

use super::ids::{JobId, TrackerId};
use super::status::TrackerStatus;

/// ErrorKind は実行エラーの分類
///
/// コアはリトライしません。呼び出し側がこの分類を見てリトライ方針を決めます。
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（ストアやロックの障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// TrackerError はドメインエラー
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Durable store write failed (constraint violation, connection loss).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing or invalid job id / trackable / configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Lock acquisition failed. Never downgraded to an unsynchronized update.
    #[error("lock error: {0}")]
    Lock(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("tracker not found: {0}")]
    NotFound(TrackerId),

    #[error("no tracker for job_id={0}")]
    JobNotFound(JobId),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: TrackerStatus,
        to: TrackerStatus,
    },
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::Lock(_) => ErrorKind::Transient,
            TrackerError::Persistence(_) | TrackerError::Cache(_) => ErrorKind::Infrastructure,
            TrackerError::Configuration(_)
            | TrackerError::NotFound(_)
            | TrackerError::JobNotFound(_)
            | TrackerError::InvalidTransition { .. } => ErrorKind::Permanent,
        }
    }
}
