//! Configuration management for pawsweepd.
//!
//! Loads settings from /etc/pawsweep/config.toml or uses defaults. Every field
//! has a default so partial files are fine.

use crate::presence::MIN_TEST_INTERVAL;
use anyhow::{bail, Context, Result};
use pawsweep_shared::Thresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/pawsweep/config.toml";

/// HTTP / live channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Period of the performance snapshot pushed to live subscribers
    #[serde(default = "default_performance_interval")]
    pub performance_interval_ms: u64,

    /// Per-subscriber buffer before a slow subscriber starts skipping events
    #[serde(default = "default_live_capacity")]
    pub live_capacity: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_performance_interval() -> u64 {
    5_000
}

fn default_live_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            performance_interval_ms: default_performance_interval(),
            live_capacity: default_live_capacity(),
        }
    }
}

/// Still-image capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Minimum spacing between accepted capture requests
    #[serde(default = "default_min_capture_interval")]
    pub min_interval_ms: u64,

    /// Directory holding the most recent photo
    #[serde(default = "default_capture_dir")]
    pub dir: PathBuf,

    /// External capture command; absent means no capture backend
    #[serde(default)]
    pub command: Option<CaptureCommandConfig>,
}

fn default_min_capture_interval() -> u64 {
    3_000
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("/var/lib/pawsweep/photos")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_capture_interval(),
            dir: default_capture_dir(),
            command: None,
        }
    }
}

/// fswebcam-compatible capture command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureCommandConfig {
    #[serde(default = "default_capture_program")]
    pub program: String,

    #[serde(default = "default_capture_device")]
    pub device: String,

    #[serde(default = "default_capture_width")]
    pub width: u32,

    #[serde(default = "default_capture_height")]
    pub height: u32,

    /// JPEG quality, 1-100
    #[serde(default = "default_capture_quality")]
    pub quality: u8,

    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,
}

fn default_capture_program() -> String {
    "fswebcam".to_string()
}

fn default_capture_device() -> String {
    "/dev/video0".to_string()
}

fn default_capture_width() -> u32 {
    480
}

fn default_capture_height() -> u32 {
    360
}

fn default_capture_quality() -> u8 {
    85
}

fn default_capture_timeout() -> u64 {
    10
}

impl Default for CaptureCommandConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            device: default_capture_device(),
            width: default_capture_width(),
            height: default_capture_height(),
            quality: default_capture_quality(),
            timeout_secs: default_capture_timeout(),
        }
    }
}

/// Classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Square model input edge in pixels
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default = "default_thresh_sum")]
    pub thresh_sum: f64,

    #[serde(default = "default_thresh_margin")]
    pub thresh_margin: f64,

    /// Run the model's reclamation hook every N completed inferences
    #[serde(default = "default_reclaim_every")]
    pub reclaim_every: u64,

    /// HTTP model runtime endpoint; absent means the gate stays not-ready
    #[serde(default)]
    pub model_url: Option<String>,

    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

fn default_input_size() -> u32 {
    224
}

fn default_thresh_sum() -> f64 {
    0.85
}

fn default_thresh_margin() -> f64 {
    0.15
}

fn default_reclaim_every() -> u64 {
    10
}

fn default_model_timeout() -> u64 {
    15
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            thresh_sum: default_thresh_sum(),
            thresh_margin: default_thresh_margin(),
            reclaim_every: default_reclaim_every(),
            model_url: None,
            model_timeout_secs: default_model_timeout(),
        }
    }
}

impl InferenceConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            sum: self.thresh_sum,
            margin: self.thresh_margin,
        }
    }
}

/// Cleaning program timing and servo positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Presence returns earlier than this after a run starts are ignored;
    /// zero disables the guard
    #[serde(default = "default_grace_window")]
    pub grace_window_ms: u64,

    #[serde(default = "default_clean_offset")]
    pub clean_offset_ms: u64,

    #[serde(default = "default_rest_offset")]
    pub rest_offset_ms: u64,

    #[serde(default = "default_complete_offset")]
    pub complete_offset_ms: u64,

    /// Servo pulse widths in microseconds
    #[serde(default = "default_start_pulse")]
    pub start_pulse_us: u32,

    #[serde(default = "default_clean_pulse")]
    pub clean_pulse_us: u32,

    #[serde(default = "default_rest_pulse")]
    pub rest_pulse_us: u32,
}

fn default_grace_window() -> u64 {
    4_000
}

fn default_clean_offset() -> u64 {
    2_000
}

fn default_rest_offset() -> u64 {
    4_000
}

fn default_complete_offset() -> u64 {
    10_000
}

fn default_start_pulse() -> u32 {
    500
}

fn default_clean_pulse() -> u32 {
    2_500
}

fn default_rest_pulse() -> u32 {
    1_500
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: default_grace_window(),
            clean_offset_ms: default_clean_offset(),
            rest_offset_ms: default_rest_offset(),
            complete_offset_ms: default_complete_offset(),
            start_pulse_us: default_start_pulse(),
            clean_pulse_us: default_clean_pulse(),
            rest_pulse_us: default_rest_pulse(),
        }
    }
}

/// Where presence readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceSourceKind {
    /// Square wave for bench testing
    TestSignal,
    /// Sysfs GPIO value file
    Gpio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_presence_source")]
    pub source: PresenceSourceKind,

    #[serde(default = "default_test_interval")]
    pub test_interval_ms: u64,

    #[serde(default = "default_gpio_value_path")]
    pub gpio_value_path: PathBuf,

    #[serde(default = "default_gpio_poll")]
    pub gpio_poll_ms: u64,
}

fn default_presence_source() -> PresenceSourceKind {
    PresenceSourceKind::TestSignal
}

fn default_test_interval() -> u64 {
    8_000
}

fn default_gpio_value_path() -> PathBuf {
    PathBuf::from("/sys/class/gpio/gpio23/value")
}

fn default_gpio_poll() -> u64 {
    500
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            source: default_presence_source(),
            test_interval_ms: default_test_interval(),
            gpio_value_path: default_gpio_value_path(),
            gpio_poll_ms: default_gpio_poll(),
        }
    }
}

/// Coordinator policy delays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Wait after the animal leaves before capturing
    #[serde(default = "default_departure_delay")]
    pub departure_delay_ms: u64,

    /// Wait after the animal leaves before resuming a paused run
    #[serde(default = "default_resume_delay")]
    pub resume_delay_ms: u64,
}

fn default_departure_delay() -> u64 {
    800
}

fn default_resume_delay() -> u64 {
    1_500
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            departure_delay_ms: default_departure_delay(),
            resume_delay_ms: default_resume_delay(),
        }
    }
}

impl CoordinatorConfig {
    pub fn departure_delay(&self) -> Duration {
        Duration::from_millis(self.departure_delay_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

/// Servo output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Sysfs PWM channel directory, e.g. /sys/class/pwm/pwmchip0/pwm0;
    /// absent means dry-run
    #[serde(default)]
    pub pwm_channel: Option<PathBuf>,

    #[serde(default = "default_pwm_period")]
    pub period_ns: u64,
}

fn default_pwm_period() -> u64 {
    20_000_000
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            pwm_channel: None,
            period_ns: default_pwm_period(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub cleaning: CleaningConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub actuator: ActuatorConfig,
}

impl Config {
    /// Load config. An explicit path must exist and parse; the default path
    /// falls back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_path(path)
                .with_context(|| format!("loading config from {}", path.display())),
            None => Ok(Self::load_from_path(Path::new(CONFIG_PATH)).unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })),
        }
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values that would stall a timer loop or bypass runtime limits.
    pub fn validate(&self) -> Result<()> {
        if self.server.performance_interval_ms == 0 {
            bail!("server.performance_interval_ms must be greater than 0");
        }
        if self.presence.gpio_poll_ms == 0 {
            bail!("presence.gpio_poll_ms must be greater than 0");
        }
        let min_ms = MIN_TEST_INTERVAL.as_millis() as u64;
        if self.presence.test_interval_ms < min_ms {
            bail!(
                "presence.test_interval_ms is {}, minimum is {}",
                self.presence.test_interval_ms,
                min_ms
            );
        }
        if self.inference.input_size == 0 {
            bail!("inference.input_size must be greater than 0");
        }
        if self.inference.model_timeout_secs == 0 {
            bail!("inference.model_timeout_secs must be greater than 0");
        }
        let c = &self.cleaning;
        if !(c.clean_offset_ms <= c.rest_offset_ms && c.rest_offset_ms <= c.complete_offset_ms) {
            bail!(
                "cleaning offsets must be ordered: clean {} <= rest {} <= complete {}",
                c.clean_offset_ms,
                c.rest_offset_ms,
                c.complete_offset_ms
            );
        }
        Ok(())
    }
}
