//! Error types for pawsweep.
//!
//! Every error here is locally recoverable. `code()` returns the stable reason
//! string used in HTTP bodies and live events.

use thiserror::Error;

use crate::cleaning::SequencerState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture rate limited, next capture allowed in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("no capture backend configured")]
    NoBackend,

    #[error("capture device error: {0}")]
    DeviceError(String),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::RateLimited { .. } => "rate_limited",
            CaptureError::NoBackend => "no_backend",
            CaptureError::DeviceError(_) => "device_error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("an inference is already running")]
    Busy,

    #[error("model not loaded yet")]
    NotReady,

    #[error("could not decode image: {0}")]
    BadImage(String),

    #[error("prediction failed: {0}")]
    Prediction(String),
}

impl InferenceError {
    pub fn code(&self) -> &'static str {
        match self {
            InferenceError::Busy => "busy",
            InferenceError::NotReady => "not_ready",
            InferenceError::BadImage(_) => "bad_image",
            InferenceError::Prediction(_) => "prediction_failed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CleaningError {
    /// Sequencer-level rejection of `start`.
    #[error("a cleaning run is already active")]
    AlreadyRunning,

    /// Coordinator-level rejection of a manual clean request.
    #[error("already cleaning")]
    AlreadyCleaning,

    #[error("coordinator is not running")]
    CoordinatorStopped,

    #[error("invalid cleaning transition from {from} to {to}")]
    InvalidTransition {
        from: SequencerState,
        to: SequencerState,
    },
}

impl CleaningError {
    pub fn code(&self) -> &'static str {
        match self {
            CleaningError::AlreadyRunning => "already_running",
            CleaningError::AlreadyCleaning => "already_cleaning",
            CleaningError::CoordinatorStopped => "stopped",
            CleaningError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// Failure of one capture + classify cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl CycleError {
    pub fn code(&self) -> &'static str {
        match self {
            CycleError::Capture(e) => e.code(),
            CycleError::Inference(e) => e.code(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdateError {
    #[error("test interval {requested_ms} ms is below the minimum of {min_ms} ms")]
    IntervalTooShort { requested_ms: u64, min_ms: u64 },

    #[error("presence source is not a test signal")]
    NoTestSignal,
}

impl ConfigUpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigUpdateError::IntervalTooShort { .. } => "invalid_interval",
            ConfigUpdateError::NoTestSignal => "no_test_signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_forwards_code() {
        let err: CycleError = CaptureError::RateLimited { retry_after_ms: 10 }.into();
        assert_eq!(err.code(), "rate_limited");

        let err: CycleError = InferenceError::Busy.into();
        assert_eq!(err.code(), "busy");
        assert_eq!(err.to_string(), "an inference is already running");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = CleaningError::InvalidTransition {
            from: SequencerState::Idle,
            to: SequencerState::Running,
        };
        assert_eq!(err.to_string(), "invalid cleaning transition from IDLE to RUNNING");
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn test_stopped_coordinator_has_own_code() {
        assert_eq!(CleaningError::CoordinatorStopped.code(), "stopped");
        assert_ne!(
            CleaningError::CoordinatorStopped.code(),
            CleaningError::AlreadyCleaning.code()
        );
    }
}
