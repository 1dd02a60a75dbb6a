//! Presence monitor.
//!
//! Turns raw level readings into edge-triggered `presence_changed` events.
//! Glitch filtering belongs to the source; the monitor only compares each
//! reading with the last one it reported.

use async_trait::async_trait;
use pawsweep_shared::ConfigUpdateError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coordinator::PresenceSink;

/// Shortest period the bench signal may be set to at runtime.
pub const MIN_TEST_INTERVAL: Duration = Duration::from_millis(3_000);

/// Raw presence readings, level-triggered.
#[async_trait]
pub trait PresenceSource: Send {
    fn name(&self) -> &str;

    /// Wait for the next reading; `None` ends the stream.
    async fn next_reading(&mut self) -> Option<bool>;
}

// ============================================================================
// Edge detection
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    /// Returns the new level when it differs from the last reported one.
    pub fn observe(&mut self, reading: bool) -> Option<bool> {
        if reading == self.last {
            return None;
        }
        self.last = reading;
        Some(reading)
    }
}

pub struct PresenceMonitor {
    source: Box<dyn PresenceSource>,
    edges: EdgeDetector,
    sink: PresenceSink,
}

impl PresenceMonitor {
    pub fn new(source: Box<dyn PresenceSource>, sink: PresenceSink) -> Self {
        Self {
            source,
            edges: EdgeDetector::default(),
            sink,
        }
    }

    /// Forward edges until the source ends or the coordinator goes away.
    pub async fn run(mut self) {
        info!("Presence monitor started ({})", self.source.name());
        while let Some(reading) = self.source.next_reading().await {
            if let Some(present) = self.edges.observe(reading) {
                debug!("Presence edge: {}", present);
                if !self.sink.report(present) {
                    debug!("Coordinator gone, presence monitor exiting");
                    return;
                }
            }
        }
        warn!("Presence source {} ended", self.source.name());
    }
}

// ============================================================================
// Bench test signal
// ============================================================================

/// Square wave toggling every `period`. A new period restarts the current
/// half-cycle.
pub struct TestSignal {
    period: watch::Receiver<Duration>,
    level: bool,
    follow_updates: bool,
}

/// Runtime control for a `TestSignal`.
#[derive(Clone)]
pub struct TestSignalHandle {
    period: watch::Sender<Duration>,
}

impl TestSignal {
    pub fn new(period: Duration) -> (Self, TestSignalHandle) {
        let (tx, rx) = watch::channel(period);
        (
            Self {
                period: rx,
                level: false,
                follow_updates: true,
            },
            TestSignalHandle { period: tx },
        )
    }
}

#[async_trait]
impl PresenceSource for TestSignal {
    fn name(&self) -> &str {
        "test-signal"
    }

    async fn next_reading(&mut self) -> Option<bool> {
        loop {
            let period = *self.period.borrow_and_update();
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.level = !self.level;
                    info!("[TEST] presence {}", if self.level { "arrived" } else { "left" });
                    return Some(self.level);
                }
                changed = self.period.changed(), if self.follow_updates => {
                    if changed.is_err() {
                        self.follow_updates = false;
                    }
                }
            }
        }
    }
}

impl TestSignalHandle {
    pub fn period(&self) -> Duration {
        *self.period.borrow()
    }

    /// Change the toggle period; takes effect immediately with a fresh timer.
    pub fn set_period(&self, period: Duration) -> Result<(), ConfigUpdateError> {
        if period < MIN_TEST_INTERVAL {
            return Err(ConfigUpdateError::IntervalTooShort {
                requested_ms: period.as_millis() as u64,
                min_ms: MIN_TEST_INTERVAL.as_millis() as u64,
            });
        }
        self.period.send_replace(period);
        info!("Test signal period set to {}ms", period.as_millis());
        Ok(())
    }
}

// ============================================================================
// GPIO line
// ============================================================================

/// Polls a sysfs GPIO `value` file; `1` means present.
pub struct GpioLine {
    value_path: PathBuf,
    poll: tokio::time::Interval,
}

impl GpioLine {
    pub fn new(value_path: PathBuf, poll_every: Duration) -> Self {
        let mut poll = tokio::time::interval(poll_every);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self { value_path, poll }
    }
}

#[async_trait]
impl PresenceSource for GpioLine {
    fn name(&self) -> &str {
        "gpio"
    }

    async fn next_reading(&mut self) -> Option<bool> {
        loop {
            self.poll.tick().await;
            match tokio::fs::read_to_string(&self.value_path).await {
                Ok(raw) => return Some(raw.trim() == "1"),
                Err(e) => warn!("GPIO read {} failed: {}", self.value_path.display(), e),
            }
        }
    }
}
