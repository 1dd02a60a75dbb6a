//! Servo actuator abstraction.
//!
//! Commands are fire-and-forget: a driver failure is logged and never reaches
//! the sequencer.
//!
//! Production uses `SysfsServo`; bench runs without a PWM channel use
//! `DryRunActuator`; tests use `RecordingActuator`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Servo pulse width in microseconds.
pub type PulseWidth = u32;

pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    /// Command the servo toward `pulse`. Must not block on motion.
    fn move_to(&self, pulse: PulseWidth);
}

// ============================================================================
// Sysfs PWM servo
// ============================================================================

/// Servo on a kernel PWM channel (`/sys/class/pwm/pwmchipN/pwmM`).
pub struct SysfsServo {
    channel: PathBuf,
}

impl SysfsServo {
    /// Configure the period and enable the channel. The chip must already
    /// have the channel exported.
    pub fn open(channel: &Path, period_ns: u64) -> Result<Self> {
        let servo = Self {
            channel: channel.to_path_buf(),
        };
        servo
            .write_attr("period", &period_ns.to_string())
            .with_context(|| format!("setting PWM period on {}", channel.display()))?;
        servo
            .write_attr("enable", "1")
            .with_context(|| format!("enabling PWM on {}", channel.display()))?;
        info!("Servo ready on {}", channel.display());
        Ok(servo)
    }

    fn write_attr(&self, attr: &str, value: &str) -> std::io::Result<()> {
        fs::write(self.channel.join(attr), value)
    }
}

impl Actuator for SysfsServo {
    fn name(&self) -> &str {
        "sysfs-pwm"
    }

    fn move_to(&self, pulse: PulseWidth) {
        let duty_ns = u64::from(pulse) * 1_000;
        match self.write_attr("duty_cycle", &duty_ns.to_string()) {
            Ok(()) => debug!("servo -> {}us", pulse),
            Err(e) => warn!("servo write failed ({}us): {}", pulse, e),
        }
    }
}

// ============================================================================
// Dry run
// ============================================================================

/// Logs commands instead of moving anything.
#[derive(Default)]
pub struct DryRunActuator;

impl Actuator for DryRunActuator {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn move_to(&self, pulse: PulseWidth) {
        info!("[dry-run] servo -> {}us", pulse);
    }
}

// ============================================================================
// Recording actuator (tests, bench diagnostics)
// ============================================================================

/// Records every command with the (tokio) instant it was issued.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    moves: Arc<Mutex<Vec<(Instant, PulseWidth)>>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn moves(&self) -> Vec<(Instant, PulseWidth)> {
        self.moves.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pulses(&self) -> Vec<PulseWidth> {
        self.moves().into_iter().map(|(_, p)| p).collect()
    }

    /// Offsets of each command relative to `origin`, in milliseconds.
    pub fn offsets_ms(&self, origin: Instant) -> Vec<(u64, PulseWidth)> {
        self.moves()
            .into_iter()
            .map(|(at, p)| (at.saturating_duration_since(origin).as_millis() as u64, p))
            .collect()
    }

    pub fn clear(&self) {
        self.moves.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Actuator for RecordingActuator {
    fn name(&self) -> &str {
        "recording"
    }

    fn move_to(&self, pulse: PulseWidth) {
        self.moves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((Instant::now(), pulse));
    }
}
