//! ChannelEventSink - tokio broadcast でレコードのスナップショットを配信

use tokio::sync::broadcast;

use crate::domain::TrackerRecord;
use crate::ports::EventSink;

pub struct ChannelEventSink {
    tx: broadcast::Sender<TrackerRecord>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerRecord> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn record_changed(&self, record: &TrackerRecord) {
        // No subscribers is fine.
        let _ = self.tx.send(record.clone());
    }
}
