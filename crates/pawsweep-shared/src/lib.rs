//! Shared types for pawsweep components.
//!
//! Everything the daemon exposes over HTTP or the live channel lives here so
//! viewers and tools can deserialize it without pulling in the runtime.

pub mod cleaning;
pub mod error;
pub mod events;
pub mod status;
pub mod verdict;

pub use cleaning::{CleaningKind, CleaningStatus, SequencerState};
pub use error::{CaptureError, CleaningError, ConfigUpdateError, CycleError, InferenceError};
pub use events::{ClientMessage, LiveEvent};
pub use status::{PerformanceSnapshot, PresenceState, StatusSnapshot};
pub use verdict::{InferenceVerdict, Thresholds};

/// Crate version, reported in status snapshots.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
