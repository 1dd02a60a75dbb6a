//! pawsweep daemon - presence-aware litter cleaning controller
//!
//! Watches the presence line, photographs the box after the animal leaves,
//! classifies the photo and drives the cleaning servo.

use anyhow::Result;
use clap::Parser;
use pawsweepd::actuator::{Actuator, DryRunActuator, SysfsServo};
use pawsweepd::capture::{CaptureBackend, CaptureGate, CommandCapture};
use pawsweepd::config::{Config, PresenceSourceKind};
use pawsweepd::coordinator::Coordinator;
use pawsweepd::inference::{HttpModel, InferenceGate, Model};
use pawsweepd::live::{spawn_performance_reporter, LiveBus};
use pawsweepd::presence::{GpioLine, PresenceMonitor, PresenceSource, TestSignal};
use pawsweepd::sequencer::{CleaningProgram, CleaningSequencer};
use pawsweepd::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// pawsweep daemon
#[derive(Parser)]
#[command(name = "pawsweepd")]
#[command(about = "Presence-aware litter box cleaning daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to /etc/pawsweep/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("[BOOT] pawsweepd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(cli.config.as_deref())?;
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let bus = LiveBus::new(config.server.live_capacity);
    let mut degraded = false;

    // Capture
    let backend: Option<Arc<dyn CaptureBackend>> = match config.capture.command.clone() {
        Some(command) => {
            info!("[BOOT] Capture via {} on {}", command.program, command.device);
            Some(Arc::new(CommandCapture::new(command)))
        }
        None => {
            warn!("[BOOT] No capture command configured, captures will fail");
            degraded = true;
            None
        }
    };
    let capture = Arc::new(CaptureGate::new(
        backend,
        config.capture.dir.clone(),
        Duration::from_millis(config.capture.min_interval_ms),
        bus.clone(),
    ));

    // Inference
    let inference = Arc::new(InferenceGate::new(
        config.inference.input_size,
        config.inference.thresholds(),
        config.inference.reclaim_every,
    ));
    match &config.inference.model_url {
        Some(url) => {
            let model: Arc<dyn Model> = Arc::new(HttpModel::new(
                url,
                Duration::from_secs(config.inference.model_timeout_secs),
            )?);
            let gate = inference.clone();
            tokio::spawn(async move {
                if let Err(e) = gate.load(model).await {
                    error!("[BOOT] Model warm-up failed, classifier stays unavailable: {:#}", e);
                }
            });
        }
        None => {
            warn!("[BOOT] No model configured, running without classification");
            degraded = true;
        }
    }

    // Actuator
    let actuator: Arc<dyn Actuator> = match &config.actuator.pwm_channel {
        Some(channel) => match SysfsServo::open(channel, config.actuator.period_ns) {
            Ok(servo) => Arc::new(servo),
            Err(e) => {
                warn!("[BOOT] Servo unavailable, using dry run: {:#}", e);
                degraded = true;
                Arc::new(DryRunActuator)
            }
        },
        None => {
            warn!("[BOOT] No PWM channel configured, using dry run");
            degraded = true;
            Arc::new(DryRunActuator)
        }
    };
    info!("[BOOT] Actuator: {}", actuator.name());

    // Coordinator
    let program = CleaningProgram::from_config(&config.cleaning);
    let grace_window = Duration::from_millis(config.cleaning.grace_window_ms);
    let (coordinator, coordinator_task) = Coordinator::spawn(
        |ticks| CleaningSequencer::new(program, grace_window, actuator, ticks),
        capture.clone(),
        inference.clone(),
        bus.clone(),
        config.coordinator.clone(),
        degraded,
    );
    if degraded {
        warn!("[BOOT] Running in degraded mode");
    }

    // Presence
    let (source, test_signal) = match config.presence.source {
        PresenceSourceKind::TestSignal => {
            let (signal, handle) =
                TestSignal::new(Duration::from_millis(config.presence.test_interval_ms));
            info!(
                "[BOOT] Presence from test signal every {}ms",
                config.presence.test_interval_ms
            );
            (Box::new(signal) as Box<dyn PresenceSource>, Some(handle))
        }
        PresenceSourceKind::Gpio => {
            info!(
                "[BOOT] Presence from {}",
                config.presence.gpio_value_path.display()
            );
            (
                Box::new(GpioLine::new(
                    config.presence.gpio_value_path.clone(),
                    Duration::from_millis(config.presence.gpio_poll_ms),
                )) as Box<dyn PresenceSource>,
                None,
            )
        }
    };
    let monitor = tokio::spawn(PresenceMonitor::new(source, coordinator.presence_sink()).run());

    let reporter = spawn_performance_reporter(
        bus.clone(),
        inference.clone(),
        Duration::from_millis(config.server.performance_interval_ms),
    );

    info!("[BOOT] pawsweepd ready");

    let state = AppState::new(
        coordinator.clone(),
        capture,
        inference,
        bus,
        test_signal,
    );
    let served = server::run(state, &bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down gracefully");
    })
    .await;

    monitor.abort();
    reporter.abort();
    coordinator.shutdown().await;
    let _ = coordinator_task.await;

    served
}
