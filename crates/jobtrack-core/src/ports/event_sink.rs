//! EventSink port - 変更通知の抽象化
//!
//! 永続ストアへの書き込みが成功した後に呼ばれるオブザーバ。
//! UI への push などのトランスポートはコアに持ち込まず、ここで差し替える。
//!
//! # 実装
//! - NoopEventSink: 何もしない
//! - ChannelEventSink: tokio broadcast でスナップショットを配信

use crate::domain::TrackerRecord;

/// EventSink は TrackerRecord の変更を受け取る
///
/// 書き込みパスの中で同期的に呼ばれるので、ブロックしないこと。
pub trait EventSink: Send + Sync {
    fn record_changed(&self, record: &TrackerRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record_changed(&self, _record: &TrackerRecord) {}
}
