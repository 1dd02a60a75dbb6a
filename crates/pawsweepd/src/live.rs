//! Live update fan-out.
//!
//! Delivery is at-most-once: a subscriber that falls behind skips what it
//! missed, and nothing is replayed to late joiners.

use pawsweep_shared::LiveEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::inference::InferenceGate;

#[derive(Clone)]
pub struct LiveBus {
    tx: broadcast::Sender<LiveEvent>,
}

impl LiveBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to whoever is connected right now.
    pub fn publish(&self, event: LiveEvent) {
        let kind = event.kind();
        // Err only means nobody is listening.
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!("live event {} -> {} subscriber(s)", kind, delivered);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LiveBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Push a performance snapshot every `period`.
pub fn spawn_performance_reporter(
    bus: LiveBus,
    inference: Arc<InferenceGate>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately; subscribers already get a snapshot on connect.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            bus.publish(LiveEvent::Performance(inference.performance()));
        }
    })
}
