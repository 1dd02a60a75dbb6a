//! Status types for the pawsweep daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cleaning::CleaningStatus;

/// Edge-triggered presence reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub present: bool,
    pub last_changed_at: DateTime<Utc>,
}

impl PresenceState {
    pub fn absent_since(at: DateTime<Utc>) -> Self {
        Self {
            present: false,
            last_changed_at: at,
        }
    }
}

/// Inference bookkeeping exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub inference_count: u64,
    pub avg_inference_ms: f64,
    pub input_size: u32,
    pub inference_running: bool,
}

/// Overall daemon status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: String,
    pub presence: PresenceState,
    pub monitoring_active: bool,
    pub pending_waste: bool,
    pub cleaning: CleaningStatus,
    pub inference_running: bool,
    pub model_ready: bool,
    /// True when any hardware collaborator is missing and the daemon runs
    /// without it.
    pub degraded: bool,
    pub last_photo: Option<String>,
}
