//! Common test utilities and helpers
#![allow(dead_code)]

use pawsweep_shared::{LiveEvent, Thresholds};
use pawsweepd::actuator::RecordingActuator;
use pawsweepd::capture::{CaptureGate, FakeCapture};
use pawsweepd::config::{CleaningConfig, CoordinatorConfig};
use pawsweepd::coordinator::{Coordinator, CoordinatorHandle};
use pawsweepd::inference::{solid_png, FakeModel, InferenceGate};
use pawsweepd::live::LiveBus;
use pawsweepd::sequencer::{CleaningProgram, CleaningSequencer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Model output that clears both thresholds.
pub const WASTE: [f32; 3] = [0.6, 0.3, 0.05];
/// Model output for a clean box.
pub const CLEAN: [f32; 3] = [0.05, 0.05, 0.9];

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// A coordinator wired to in-memory collaborators.
pub struct Rig {
    pub handle: CoordinatorHandle,
    pub actuator: RecordingActuator,
    pub camera: Arc<FakeCapture>,
    pub model: Arc<FakeModel>,
    pub capture: Arc<CaptureGate>,
    pub inference: Arc<InferenceGate>,
    pub bus: LiveBus,
    pub dir: TempDir,
}

pub struct RigOptions {
    pub outputs: Vec<f32>,
    pub model_latency: Duration,
    pub load_model: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            outputs: WASTE.to_vec(),
            model_latency: Duration::ZERO,
            load_model: true,
        }
    }
}

impl Rig {
    pub async fn new() -> Self {
        Self::with(RigOptions::default()).await
    }

    pub async fn with(options: RigOptions) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let bus = LiveBus::new(256);

        let camera = Arc::new(FakeCapture::returning(solid_png(32, 32, [120, 90, 40])));
        let capture = Arc::new(CaptureGate::new(
            Some(camera.clone()),
            dir.path().to_path_buf(),
            ms(3_000),
            bus.clone(),
        ));

        let model = Arc::new(FakeModel::new(options.outputs).with_latency(options.model_latency));
        let inference = Arc::new(InferenceGate::new(16, Thresholds::default(), 10));
        if options.load_model {
            inference.load(model.clone()).await.expect("model warm-up");
        }

        let actuator = RecordingActuator::new();
        let sequencer_actuator = Arc::new(actuator.clone());
        let cleaning = CleaningConfig::default();
        let (handle, _task) = Coordinator::spawn(
            |ticks| {
                CleaningSequencer::new(
                    CleaningProgram::from_config(&cleaning),
                    ms(cleaning.grace_window_ms),
                    sequencer_actuator,
                    ticks,
                )
            },
            capture.clone(),
            inference.clone(),
            bus.clone(),
            CoordinatorConfig::default(),
            false,
        );

        Self {
            handle,
            actuator,
            camera,
            model,
            capture,
            inference,
            bus,
            dir,
        }
    }

    pub fn report(&self, present: bool) {
        assert!(self.handle.presence_sink().report(present));
    }
}

/// Everything currently buffered on a live subscription.
pub fn drain(rx: &mut broadcast::Receiver<LiveEvent>) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[LiveEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}
