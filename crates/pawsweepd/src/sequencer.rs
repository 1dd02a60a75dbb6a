//! Cleaning sequencer.
//!
//! Owns the actuator program: a fixed list of timed steps replayed from
//! offset 0 on every start and every resume.
//!
//! Timers run in one spawned task per scheduled-action set. The task only
//! sends `SequencerTick`s; the owner feeds them back through `on_tick`, where
//! the actuator is actually driven. Each set carries a generation number, so
//! cancelling is abort + bump: a tick already queued from an old set is
//! dropped on arrival instead of firing.

use chrono::{DateTime, Utc};
use pawsweep_shared::{CleaningError, CleaningKind, CleaningStatus, SequencerState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actuator::{Actuator, PulseWidth};
use crate::config::CleaningConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    MoveTo(PulseWidth),
    EvaluateCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStep {
    pub offset: Duration,
    pub action: StepAction,
}

/// Ordered steps; the last one must be `EvaluateCompletion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningProgram {
    steps: Vec<ProgramStep>,
    rest: PulseWidth,
}

impl CleaningProgram {
    pub fn from_config(config: &CleaningConfig) -> Self {
        let step = |ms: u64, action| ProgramStep {
            offset: Duration::from_millis(ms),
            action,
        };
        Self {
            steps: vec![
                step(0, StepAction::MoveTo(config.start_pulse_us)),
                step(config.clean_offset_ms, StepAction::MoveTo(config.clean_pulse_us)),
                step(config.rest_offset_ms, StepAction::MoveTo(config.rest_pulse_us)),
                step(config.complete_offset_ms, StepAction::EvaluateCompletion),
            ],
            rest: config.rest_pulse_us,
        }
    }

    pub fn steps(&self) -> &[ProgramStep] {
        &self.steps
    }

    /// Neutral servo position used for pause and shutdown.
    pub fn rest(&self) -> PulseWidth {
        self.rest
    }
}

impl Default for CleaningProgram {
    fn default() -> Self {
        Self::from_config(&CleaningConfig::default())
    }
}

/// Timer firing for step `step_index` of scheduled-action set `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTick {
    pub generation: u64,
    pub step_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningRun {
    pub kind: CleaningKind,
    /// Start of the current schedule (reset on resume).
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    pub paused: bool,
    pub resumable: bool,
    /// Next step to fire.
    pub current_step_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    /// Pause requested before the grace window elapsed; ignored.
    WithinGraceWindow { elapsed: Duration },
    /// Nothing running (idle or already paused).
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stale or unexpected tick.
    Ignored,
    Moved(PulseWidth),
    Completed {
        kind: CleaningKind,
        clear_pending_waste: bool,
    },
    /// Completion point reached while paused; now resumable.
    AwaitingResume,
}

pub struct CleaningSequencer {
    program: CleaningProgram,
    grace_window: Duration,
    actuator: Arc<dyn Actuator>,
    ticks: mpsc::UnboundedSender<SequencerTick>,
    state: SequencerState,
    run: Option<CleaningRun>,
    generation: u64,
    timers: Option<JoinHandle<()>>,
}

impl CleaningSequencer {
    pub fn new(
        program: CleaningProgram,
        grace_window: Duration,
        actuator: Arc<dyn Actuator>,
        ticks: mpsc::UnboundedSender<SequencerTick>,
    ) -> Self {
        Self {
            program,
            grace_window,
            actuator,
            ticks,
            state: SequencerState::Idle,
            run: None,
            generation: 0,
            timers: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn run(&self) -> Option<&CleaningRun> {
        self.run.as_ref()
    }

    pub fn is_resumable(&self) -> bool {
        self.state == SequencerState::Paused && self.run.as_ref().is_some_and(|r| r.resumable)
    }

    /// Time since the current schedule started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.run.as_ref().map(|r| r.started_at.elapsed())
    }

    pub fn status(&self) -> CleaningStatus {
        match &self.run {
            Some(run) => CleaningStatus {
                state: self.state,
                kind: Some(run.kind),
                step_index: run.current_step_index,
                resumable: run.resumable,
                elapsed_ms: Some(run.started_at.elapsed().as_millis() as u64),
            },
            None => CleaningStatus::idle(),
        }
    }

    pub fn start(&mut self, kind: CleaningKind) -> Result<(), CleaningError> {
        if self.state != SequencerState::Idle {
            return Err(CleaningError::AlreadyRunning);
        }
        info!("{} cleaning started", kind);
        self.run = Some(CleaningRun {
            kind,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            paused: false,
            resumable: false,
            current_step_index: 0,
        });
        self.state = SequencerState::Running;
        self.schedule();
        Ok(())
    }

    /// Interrupt a running program and park the servo.
    pub fn pause(&mut self) -> PauseOutcome {
        if self.state != SequencerState::Running {
            return PauseOutcome::NotRunning;
        }
        let Some(run) = self.run.as_mut() else {
            return PauseOutcome::NotRunning;
        };

        let elapsed = run.started_at.elapsed();
        if elapsed < self.grace_window {
            debug!("Pause ignored {}ms into {} run", elapsed.as_millis(), run.kind);
            return PauseOutcome::WithinGraceWindow { elapsed };
        }

        let kind = run.kind;
        run.paused = true;
        // Reached only before the terminal step: completion resets the run.
        run.resumable = true;
        self.state = SequencerState::Paused;
        self.cancel_timers();
        self.actuator.move_to(self.program.rest());
        info!("{} cleaning paused at {}ms", kind, elapsed.as_millis());
        PauseOutcome::Paused
    }

    /// Restart the full program from offset 0 with the original kind.
    pub fn resume(&mut self) -> Result<(), CleaningError> {
        if self.state != SequencerState::Paused {
            return Err(CleaningError::InvalidTransition {
                from: self.state,
                to: SequencerState::Running,
            });
        }
        let Some(run) = self.run.as_mut() else {
            return Err(CleaningError::InvalidTransition {
                from: self.state,
                to: SequencerState::Running,
            });
        };

        run.paused = false;
        run.resumable = false;
        run.started_at = Instant::now();
        run.current_step_index = 0;
        info!("{} cleaning resumed", run.kind);
        self.state = SequencerState::Running;
        self.schedule();
        Ok(())
    }

    /// Drop the current run without completing it.
    pub fn abandon(&mut self) {
        self.cancel_timers();
        if let Some(run) = self.run.take() {
            warn!("{} cleaning abandoned in state {}", run.kind, self.state);
            self.actuator.move_to(self.program.rest());
        }
        self.state = SequencerState::Idle;
    }

    /// Cancel everything and park the servo, whatever the state.
    pub fn shutdown(&mut self) {
        self.cancel_timers();
        self.run = None;
        self.state = SequencerState::Idle;
        self.actuator.move_to(self.program.rest());
        info!("Sequencer stopped, servo at rest");
    }

    /// Apply a timer firing.
    pub fn on_tick(&mut self, tick: SequencerTick) -> TickOutcome {
        if tick.generation != self.generation || self.state == SequencerState::Idle {
            debug!("Dropping stale tick {:?}", tick);
            return TickOutcome::Ignored;
        }
        let Some(step) = self.program.steps().get(tick.step_index).copied() else {
            return TickOutcome::Ignored;
        };
        let Some(run) = self.run.as_mut() else {
            return TickOutcome::Ignored;
        };
        run.current_step_index = tick.step_index + 1;

        match step.action {
            StepAction::MoveTo(pulse) => {
                debug!("{} step {}: servo -> {}us", run.kind, tick.step_index, pulse);
                self.actuator.move_to(pulse);
                TickOutcome::Moved(pulse)
            }
            StepAction::EvaluateCompletion if run.paused => {
                info!("{} cleaning interrupted, waiting to resume", run.kind);
                run.resumable = true;
                TickOutcome::AwaitingResume
            }
            StepAction::EvaluateCompletion => {
                let kind = run.kind;
                info!("{} cleaning complete", kind);
                self.timers = None;
                self.run = None;
                self.state = SequencerState::Idle;
                TickOutcome::Completed {
                    kind,
                    clear_pending_waste: kind == CleaningKind::Auto,
                }
            }
        }
    }

    /// Replace the scheduled-action set with a fresh one anchored at now.
    fn schedule(&mut self) {
        self.cancel_timers();
        self.generation += 1;

        let generation = self.generation;
        let base = Instant::now();
        let offsets: Vec<Duration> = self.program.steps().iter().map(|s| s.offset).collect();
        let ticks = self.ticks.clone();

        self.timers = Some(tokio::spawn(async move {
            for (step_index, offset) in offsets.into_iter().enumerate() {
                tokio::time::sleep_until(base + offset).await;
                if ticks.send(SequencerTick { generation, step_index }).is_err() {
                    return;
                }
            }
        }));
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.timers.take() {
            handle.abort();
        }
        // Invalidate anything the old set already queued.
        self.generation += 1;
    }
}

impl Drop for CleaningSequencer {
    fn drop(&mut self) {
        if let Some(handle) = self.timers.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RecordingActuator;

    struct Harness {
        seq: CleaningSequencer,
        ticks: mpsc::UnboundedReceiver<SequencerTick>,
        actuator: RecordingActuator,
    }

    impl Harness {
        fn new(grace_ms: u64) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let actuator = RecordingActuator::new();
            let seq = CleaningSequencer::new(
                CleaningProgram::default(),
                Duration::from_millis(grace_ms),
                Arc::new(actuator.clone()),
                tx,
            );
            Self {
                seq,
                ticks: rx,
                actuator,
            }
        }

        /// Deliver ticks until `until` (paused clock) and collect outcomes.
        async fn pump_until(&mut self, until: Instant) -> Vec<TickOutcome> {
            let mut outcomes = Vec::new();
            loop {
                tokio::select! {
                    tick = self.ticks.recv() => match tick {
                        Some(tick) => outcomes.push(self.seq.on_tick(tick)),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(until) => break,
                }
            }
            outcomes
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_fires_at_fixed_offsets() {
        let mut h = Harness::new(4_000);
        let t0 = Instant::now();
        h.seq.start(CleaningKind::Auto).unwrap();
        assert_eq!(h.seq.state(), SequencerState::Running);

        let outcomes = h.pump_until(t0 + ms(12_000)).await;
        assert_eq!(
            h.actuator.offsets_ms(t0),
            vec![(0, 500), (2_000, 2_500), (4_000, 1_500)]
        );
        assert_eq!(
            outcomes.last(),
            Some(&TickOutcome::Completed {
                kind: CleaningKind::Auto,
                clear_pending_waste: true
            })
        );
        assert_eq!(h.seq.state(), SequencerState::Idle);
        assert!(h.seq.run().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_completion_keeps_waste_flag() {
        let mut h = Harness::new(4_000);
        let t0 = Instant::now();
        h.seq.start(CleaningKind::Manual).unwrap();
        let outcomes = h.pump_until(t0 + ms(10_500)).await;
        assert!(outcomes.contains(&TickOutcome::Completed {
            kind: CleaningKind::Manual,
            clear_pending_waste: false
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_unless_idle() {
        let mut h = Harness::new(4_000);
        h.seq.start(CleaningKind::Auto).unwrap();
        assert_eq!(h.seq.start(CleaningKind::Manual), Err(CleaningError::AlreadyRunning));

        h.pump_until(Instant::now() + ms(5_000)).await;
        assert_eq!(h.seq.pause(), PauseOutcome::Paused);
        assert_eq!(h.seq.start(CleaningKind::Manual), Err(CleaningError::AlreadyRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancels_remaining_steps() {
        let mut h = Harness::new(4_000);
        let t0 = Instant::now();
        h.seq.start(CleaningKind::Auto).unwrap();

        h.pump_until(t0 + ms(5_000)).await;
        assert_eq!(h.seq.pause(), PauseOutcome::Paused);
        assert_eq!(h.seq.state(), SequencerState::Paused);
        assert!(h.seq.is_resumable());

        let outcomes = h.pump_until(t0 + ms(20_000)).await;
        assert!(outcomes.is_empty(), "ticks after pause: {:?}", outcomes);
        assert_eq!(
            h.actuator.offsets_ms(t0),
            vec![(0, 500), (2_000, 2_500), (4_000, 1_500), (5_000, 1_500)]
        );
        assert_eq!(h.seq.state(), SequencerState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_within_grace_window_is_noop() {
        let mut h = Harness::new(4_000);
        let t0 = Instant::now();
        h.seq.start(CleaningKind::Auto).unwrap();

        h.pump_until(t0 + ms(3_000)).await;
        assert!(matches!(
            h.seq.pause(),
            PauseOutcome::WithinGraceWindow { elapsed } if elapsed == ms(3_000)
        ));
        assert_eq!(h.seq.state(), SequencerState::Running);
        // Only the program's own commands so far.
        assert_eq!(h.actuator.pulses(), vec![500, 2_500]);

        h.pump_until(t0 + ms(11_000)).await;
        assert_eq!(h.seq.state(), SequencerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_grace_window_allows_immediate_pause() {
        let mut h = Harness::new(0);
        h.seq.start(CleaningKind::Manual).unwrap();
        assert_eq!(h.seq.pause(), PauseOutcome::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_idempotent() {
        let mut h = Harness::new(4_000);
        assert_eq!(h.seq.pause(), PauseOutcome::NotRunning);

        let t0 = Instant::now();
        h.seq.start(CleaningKind::Auto).unwrap();
        h.pump_until(t0 + ms(4_500)).await;
        assert_eq!(h.seq.pause(), PauseOutcome::Paused);
        let moves = h.actuator.moves().len();
        assert_eq!(h.seq.pause(), PauseOutcome::NotRunning);
        assert_eq!(h.actuator.moves().len(), moves);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_replays_program_from_zero() {
        let mut h = Harness::new(4_000);
        let t0 = Instant::now();
        h.seq.start(CleaningKind::Manual).unwrap();
        h.pump_until(t0 + ms(5_000)).await;
        h.seq.pause();
        h.pump_until(t0 + ms(7_000)).await;
        h.actuator.clear();

        let t1 = Instant::now();
        h.seq.resume().unwrap();
        assert_eq!(h.seq.state(), SequencerState::Running);
        assert_eq!(h.seq.run().unwrap().kind, CleaningKind::Manual);
        assert!(!h.seq.is_resumable());

        let outcomes = h.pump_until(t1 + ms(12_000)).await;
        assert_eq!(
            h.actuator.offsets_ms(t1),
            vec![(0, 500), (2_000, 2_500), (4_000, 1_500)]
        );
        assert!(outcomes.contains(&TickOutcome::Completed {
            kind: CleaningKind::Manual,
            clear_pending_waste: false
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_requires_paused() {
        let mut h = Harness::new(4_000);
        assert_eq!(
            h.seq.resume(),
            Err(CleaningError::InvalidTransition {
                from: SequencerState::Idle,
                to: SequencerState::Running
            })
        );
        h.seq.start(CleaningKind::Auto).unwrap();
        assert!(h.seq.resume().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_is_dropped() {
        let mut h = Harness::new(0);
        h.seq.start(CleaningKind::Auto).unwrap();
        // First tick (offset 0) is queued but not yet delivered.
        tokio::task::yield_now().await;
        let stale = h.ticks.recv().await.unwrap();
        h.seq.pause();
        h.seq.resume().unwrap();
        assert_eq!(h.seq.on_tick(stale), TickOutcome::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_while_paused_marks_resumable() {
        let mut h = Harness::new(0);
        h.seq.start(CleaningKind::Auto).unwrap();
        let generation = h.seq.generation;
        // Simulate a completion tick racing a pause inside the same set.
        h.seq.run.as_mut().unwrap().paused = true;
        h.seq.run.as_mut().unwrap().resumable = false;
        let outcome = h.seq.on_tick(SequencerTick {
            generation,
            step_index: 3,
        });
        assert_eq!(outcome, TickOutcome::AwaitingResume);
        assert!(h.seq.run().unwrap().resumable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_and_shutdown_park_servo() {
        let mut h = Harness::new(0);
        h.seq.start(CleaningKind::Auto).unwrap();
        h.seq.pause();
        h.actuator.clear();

        h.seq.abandon();
        assert_eq!(h.seq.state(), SequencerState::Idle);
        assert_eq!(h.actuator.pulses(), vec![1_500]);

        h.seq.start(CleaningKind::Manual).unwrap();
        h.seq.shutdown();
        assert_eq!(h.seq.state(), SequencerState::Idle);
        let outcomes = h.pump_until(Instant::now() + ms(15_000)).await;
        assert!(outcomes.iter().all(|o| *o == TickOutcome::Ignored));
        assert_eq!(h.actuator.pulses().last(), Some(&1_500));
    }

    #[test]
    fn test_program_from_config() {
        let program = CleaningProgram::from_config(&CleaningConfig {
            clean_offset_ms: 1_000,
            ..CleaningConfig::default()
        });
        let offsets: Vec<u64> = program
            .steps()
            .iter()
            .map(|s| s.offset.as_millis() as u64)
            .collect();
        assert_eq!(offsets, vec![0, 1_000, 4_000, 10_000]);
        assert_eq!(program.steps()[3].action, StepAction::EvaluateCompletion);
        assert_eq!(program.rest(), 1_500);
    }
}
