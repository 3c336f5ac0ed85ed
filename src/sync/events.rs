//! Score notifications
//!
//! Publish/subscribe over a `tokio::sync::broadcast` channel. Events sent
//! while nobody is subscribed are dropped.

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::VigorScore;

/// Default event buffer size
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Today's score was recomputed
    TodayScoreUpdated { score: VigorScore },

    /// A run finished and the watermark moved
    Completed {
        run_id: Uuid,
        days_synced: usize,
        watermark: Option<NaiveDate>,
    },

    /// A run aborted; the watermark is unchanged
    Failed {
        run_id: Uuid,
        error: String,
        retryable: bool,
    },
}

/// Broadcast channel for [`SyncEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        match self.sender.send(event) {
            Ok(receivers) => trace!(receivers, "Published sync event"),
            Err(_) => trace!("Sync event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
