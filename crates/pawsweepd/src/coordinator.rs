//! Coordinator: the presence/cleaning state machine.
//!
//! One task owns all mutable state and handles inputs strictly one at a time:
//! presence edges, sequencer timer ticks, policy delays, cycle results and
//! external commands. Capture and inference run in spawned tasks and report
//! back here, so presence keeps flowing while a classifier call is pending;
//! their results are judged against whatever the state is when they land.
//!
//! ## Presence transitions
//!
//! - arrived: pause a running clean (the sequencer ignores it inside the
//!   grace window), mark monitoring active
//! - left: after `departure_delay`, if still away, run capture → classify →
//!   maybe auto-clean; if a paused run is resumable, resume it after
//!   `resume_delay` provided the animal is still away and the run is still
//!   resumable

use chrono::Utc;
use pawsweep_shared::{
    CleaningError, CleaningKind, CycleError, InferenceError, InferenceVerdict, LiveEvent,
    PresenceState, SequencerState, StatusSnapshot, VERSION,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::CaptureGate;
use crate::config::CoordinatorConfig;
use crate::inference::InferenceGate;
use crate::live::LiveBus;
use crate::sequencer::{CleaningSequencer, PauseOutcome, SequencerTick, TickOutcome};

/// Sending half of the presence input.
#[derive(Clone)]
pub struct PresenceSink {
    tx: mpsc::UnboundedSender<bool>,
}

impl PresenceSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a presence edge. Returns false once the receiver is gone.
    pub fn report(&self, present: bool) -> bool {
        self.tx.send(present).is_ok()
    }
}

/// Why a capture + classify cycle ran.
enum CycleOrigin {
    Departure,
    OnDemand(oneshot::Sender<Result<InferenceVerdict, CycleError>>),
}

enum Command {
    Status(oneshot::Sender<StatusSnapshot>),
    ManualClean(oneshot::Sender<Result<(), CleaningError>>),
    CaptureNow(oneshot::Sender<Result<InferenceVerdict, CycleError>>),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    DepartureDelayElapsed,
    ResumeDelayElapsed,
    CycleFinished {
        origin: CycleOrigin,
        result: Result<InferenceVerdict, CycleError>,
    },
}

/// Cloneable front door to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    presence: PresenceSink,
}

impl CoordinatorHandle {
    pub fn presence_sink(&self) -> PresenceSink {
        self.presence.clone()
    }

    pub async fn status(&self) -> Option<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Request a manual cleaning run.
    pub async fn manual_clean(&self) -> Result<(), CleaningError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ManualClean(tx))
            .map_err(|_| CleaningError::CoordinatorStopped)?;
        rx.await.unwrap_or(Err(CleaningError::CoordinatorStopped))
    }

    /// Run one capture + classify cycle outside the presence flow.
    pub async fn capture_now(&self) -> Result<InferenceVerdict, CycleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::CaptureNow(tx))
            .map_err(|_| CycleError::Inference(InferenceError::NotReady))?;
        rx.await
            .unwrap_or(Err(CycleError::Inference(InferenceError::NotReady)))
    }

    /// Stop the coordinator, parking the servo. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct Coordinator {
    presence: PresenceState,
    monitoring_active: bool,
    pending_waste: bool,
    degraded: bool,
    sequencer: CleaningSequencer,
    capture: Arc<CaptureGate>,
    inference: Arc<InferenceGate>,
    bus: LiveBus,
    config: CoordinatorConfig,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

struct Inputs {
    presence: mpsc::UnboundedReceiver<bool>,
    ticks: mpsc::UnboundedReceiver<SequencerTick>,
    internal: mpsc::UnboundedReceiver<Internal>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Coordinator {
    /// Start the coordinator task. `build_sequencer` receives the tick sender
    /// the sequencer must report timer firings on.
    pub fn spawn(
        build_sequencer: impl FnOnce(mpsc::UnboundedSender<SequencerTick>) -> CleaningSequencer,
        capture: Arc<CaptureGate>,
        inference: Arc<InferenceGate>,
        bus: LiveBus,
        config: CoordinatorConfig,
        degraded: bool,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (presence_sink, presence_rx) = PresenceSink::channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            presence: PresenceState::absent_since(Utc::now()),
            monitoring_active: false,
            pending_waste: false,
            degraded,
            sequencer: build_sequencer(tick_tx),
            capture,
            inference,
            bus,
            config,
            internal_tx,
        };
        let inputs = Inputs {
            presence: presence_rx,
            ticks: tick_rx,
            internal: internal_rx,
            commands: command_rx,
        };
        let task = tokio::spawn(coordinator.run(inputs));

        (
            CoordinatorHandle {
                commands: command_tx,
                presence: presence_sink,
            },
            task,
        )
    }

    async fn run(mut self, mut inputs: Inputs) {
        info!("Coordinator started");
        loop {
            // Biased: presence edges first, so a pause always lands before
            // anything queued behind it.
            tokio::select! {
                biased;
                Some(present) = inputs.presence.recv() => self.on_presence(present),
                Some(tick) = inputs.ticks.recv() => self.on_tick(tick),
                Some(event) = inputs.internal.recv() => self.on_internal(event),
                command = inputs.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.on_command(command).await,
                        None => {
                            self.sequencer.shutdown();
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
            }
        }
        info!("Coordinator stopped");
    }

    fn on_presence(&mut self, present: bool) {
        if present == self.presence.present {
            return;
        }
        self.presence = PresenceState {
            present,
            last_changed_at: Utc::now(),
        };
        self.bus.publish(LiveEvent::SensorUpdate(self.presence));

        if present {
            self.on_arrival();
        } else {
            self.on_departure();
        }
    }

    fn on_arrival(&mut self) {
        if self.sequencer.state() == SequencerState::Running {
            match self.sequencer.pause() {
                PauseOutcome::Paused => {
                    info!("Animal returned, cleaning paused");
                    self.publish_cleaning();
                }
                PauseOutcome::WithinGraceWindow { elapsed } => {
                    info!(
                        "Animal returned {}ms into cleaning, inside grace window; continuing",
                        elapsed.as_millis()
                    );
                }
                PauseOutcome::NotRunning => {}
            }
        }
        if !self.monitoring_active {
            self.monitoring_active = true;
            info!("Monitoring started");
        }
    }

    fn on_departure(&mut self) {
        self.monitoring_active = false;
        info!("Animal left, checking in {}ms", self.config.departure_delay_ms);
        self.after(self.config.departure_delay(), Internal::DepartureDelayElapsed);

        if self.sequencer.is_resumable() {
            self.after(self.config.resume_delay(), Internal::ResumeDelayElapsed);
        }
    }

    fn on_tick(&mut self, tick: SequencerTick) {
        match self.sequencer.on_tick(tick) {
            TickOutcome::Completed {
                kind,
                clear_pending_waste,
            } => {
                if clear_pending_waste {
                    self.pending_waste = false;
                }
                debug!("{} run finished, pending waste: {}", kind, self.pending_waste);
                self.publish_cleaning();
            }
            TickOutcome::AwaitingResume => self.publish_cleaning(),
            TickOutcome::Moved(_) | TickOutcome::Ignored => {}
        }
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::DepartureDelayElapsed => {
                if self.presence.present {
                    info!("Animal back before departure check, skipping");
                    return;
                }
                if self.inference.is_busy() {
                    info!("Inference already running, skipping this departure check");
                    return;
                }
                self.start_cycle(CycleOrigin::Departure);
            }
            Internal::ResumeDelayElapsed => {
                if self.presence.present {
                    debug!("Animal back before resume delay, staying paused");
                } else if self.sequencer.is_resumable() {
                    match self.sequencer.resume() {
                        Ok(()) => self.publish_cleaning(),
                        Err(e) => warn!("Resume rejected: {}", e),
                    }
                }
            }
            Internal::CycleFinished { origin, result } => self.on_cycle_finished(origin, result),
        }
    }

    fn on_cycle_finished(
        &mut self,
        origin: CycleOrigin,
        result: Result<InferenceVerdict, CycleError>,
    ) {
        match &result {
            Ok(verdict) => {
                self.pending_waste = verdict.waste_detected();
                self.bus.publish(LiveEvent::InferenceResult(*verdict));
                if matches!(origin, CycleOrigin::Departure) {
                    if verdict.waste_detected() {
                        info!("Waste detected, requesting auto clean");
                        self.try_auto_clean();
                    } else {
                        info!("No waste detected");
                    }
                }
            }
            Err(CycleError::Inference(InferenceError::NotReady)) => {
                warn!("No verdict: model not loaded");
            }
            Err(CycleError::Inference(e)) => {
                warn!("Classification failed: {}", e);
                self.bus.publish(LiveEvent::InferenceError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
            // The capture gate already notified observers.
            Err(CycleError::Capture(e)) => debug!("Cycle ended at capture: {}", e),
        }

        if let CycleOrigin::OnDemand(reply) = origin {
            let _ = reply.send(result);
        }
    }

    /// Start an auto run unless the animal is back, a run is active or an
    /// inference is in flight. A skipped start leaves `pending_waste` set.
    fn try_auto_clean(&mut self) {
        if self.presence.present {
            info!("Animal present, auto clean skipped");
            return;
        }
        if self.sequencer.state() != SequencerState::Idle {
            info!(
                "Cleaning already {}, auto clean not started",
                self.sequencer.state()
            );
            return;
        }
        if self.inference.is_busy() {
            info!("Inference in flight, auto clean skipped");
            return;
        }
        match self.sequencer.start(CleaningKind::Auto) {
            Ok(()) => self.publish_cleaning(),
            Err(e) => warn!("Auto clean rejected: {}", e),
        }
    }

    async fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Status(reply) => {
                let _ = reply.send(self.snapshot().await);
            }
            Command::ManualClean(reply) => {
                let result = if self.sequencer.state() == SequencerState::Idle {
                    self.sequencer
                        .start(CleaningKind::Manual)
                        .map_err(|_| CleaningError::AlreadyCleaning)
                } else {
                    Err(CleaningError::AlreadyCleaning)
                };
                match &result {
                    Ok(()) => self.publish_cleaning(),
                    Err(e) => info!("Manual clean rejected: {}", e),
                }
                let _ = reply.send(result);
            }
            Command::CaptureNow(reply) => {
                if self.inference.is_busy() {
                    let _ = reply.send(Err(InferenceError::Busy.into()));
                } else {
                    self.start_cycle(CycleOrigin::OnDemand(reply));
                }
            }
            Command::Shutdown(reply) => {
                self.sequencer.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            version: VERSION.to_string(),
            presence: self.presence,
            monitoring_active: self.monitoring_active,
            pending_waste: self.pending_waste,
            cleaning: self.sequencer.status(),
            inference_running: self.inference.is_busy(),
            model_ready: self.inference.is_ready().await,
            degraded: self.degraded,
            last_photo: self.capture.last_photo().await.map(|p| p.filename),
        }
    }

    fn start_cycle(&self, origin: CycleOrigin) {
        let capture = self.capture.clone();
        let inference = self.inference.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = run_cycle(&capture, &inference).await;
            let _ = tx.send(Internal::CycleFinished { origin, result });
        });
    }

    fn after(&self, delay: Duration, event: Internal) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn publish_cleaning(&self) {
        self.bus.publish(LiveEvent::CleaningUpdate(self.sequencer.status()));
    }
}

async fn run_cycle(
    capture: &CaptureGate,
    inference: &InferenceGate,
) -> Result<InferenceVerdict, CycleError> {
    let image = capture.request_capture().await?;
    let verdict = inference.classify(&image.bytes).await?;
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_sink_reports_until_receiver_dropped() {
        let (sink, mut rx) = PresenceSink::channel();
        assert!(sink.report(true));
        assert!(sink.clone().report(false));
        assert_eq!(rx.try_recv().ok(), Some(true));
        assert_eq!(rx.try_recv().ok(), Some(false));

        drop(rx);
        assert!(!sink.report(true));
    }
}
