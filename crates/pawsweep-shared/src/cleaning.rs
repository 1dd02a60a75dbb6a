//! Cleaning run vocabulary shared between the sequencer and observers.

use serde::{Deserialize, Serialize};

/// Who asked for a cleaning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningKind {
    /// Started by the coordinator after a positive verdict.
    Auto,
    /// Started by an operator request.
    Manual,
}

impl std::fmt::Display for CleaningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleaningKind::Auto => write!(f, "auto"),
            CleaningKind::Manual => write!(f, "manual"),
        }
    }
}

/// Sequencer lifecycle. `Completed` is transient and folds back into `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Running,
    Paused,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "IDLE"),
            SequencerState::Running => write!(f, "RUNNING"),
            SequencerState::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Read-only view of the active cleaning run, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningStatus {
    pub state: SequencerState,
    pub kind: Option<CleaningKind>,
    /// Index of the next program step to fire (equal to the step count once the
    /// terminal step has run).
    pub step_index: usize,
    pub resumable: bool,
    /// Milliseconds since the run (or its latest resume) started.
    pub elapsed_ms: Option<u64>,
}

impl CleaningStatus {
    pub fn idle() -> Self {
        Self {
            state: SequencerState::Idle,
            kind: None,
            step_index: 0,
            resumable: false,
            elapsed_ms: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != SequencerState::Idle
    }
}

impl Default for CleaningStatus {
    fn default() -> Self {
        Self::idle()
    }
}
