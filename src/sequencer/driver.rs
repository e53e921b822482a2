//! Playback lifecycle driver.
//!
//! Owns the state machine and its single tick deadline, serializing user
//! commands and timer expiry on one task. Transitions go out as events for
//! presentation layers.

use super::machine::{Machine, PlaybackObserver, TimerDirective};
use crate::model::{PlaybackEvent, PlaybackState, TimingConfig};
use crate::scenario::Scenario;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Commands emitted by UI layers to control playback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlaybackCommand {
    Start,
    Pause,
    Resume,
    TogglePause,
    Restart,
    SetSpeed(f64),
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverOptions {
    /// Start playing as soon as the driver runs.
    pub autoplay: bool,
    /// Stop the driver once the result phase is reached.
    pub exit_on_complete: bool,
}

/// Forwards machine callbacks to presentation layers as events.
pub(crate) struct EventForwarder {
    tx: UnboundedSender<PlaybackEvent>,
}

impl EventForwarder {
    pub(crate) fn new(tx: UnboundedSender<PlaybackEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, ev: PlaybackEvent) {
        // Receiver gone means the UI already quit; nothing left to tell.
        let _ = self.tx.send(ev);
    }
}

impl PlaybackObserver for EventForwarder {
    fn on_phase_change(&mut self, state: &PlaybackState) {
        tracing::debug!(phase = state.phase.label(), "phase changed");
        self.send(PlaybackEvent::PhaseChanged { state: *state });
    }

    fn on_context_advance(&mut self, state: &PlaybackState) {
        self.send(PlaybackEvent::ContextAdvanced { state: *state });
    }

    fn on_step_advance(&mut self, state: &PlaybackState) {
        tracing::debug!(step = state.step_index, "step advanced");
        self.send(PlaybackEvent::StepAdvanced { state: *state });
    }

    fn on_complete(&mut self, state: &PlaybackState) {
        self.send(PlaybackEvent::Completed { state: *state });
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Apply a directive to the one deadline the driver owns.
fn apply_directive(deadline: &mut Option<Instant>, directive: TimerDirective) {
    match directive {
        TimerDirective::Schedule(after) => {
            let now = Instant::now();
            // An interval past the clock's range means "practically never".
            let at = now
                .checked_add(after)
                .unwrap_or_else(|| now + FAR_FUTURE);
            *deadline = Some(at);
        }
        TimerDirective::Cancel => *deadline = None,
        TimerDirective::Keep => {}
    }
}

/// Run playback of `scenario` until quit (or completion, if requested).
/// Returns the final state.
pub(crate) async fn run_driver(
    scenario: &Scenario,
    timing: &TimingConfig,
    options: DriverOptions,
    event_tx: UnboundedSender<PlaybackEvent>,
    mut cmd_rx: UnboundedReceiver<PlaybackCommand>,
) -> Result<PlaybackState> {
    let mut machine = Machine::new(scenario, timing)?;
    let mut observer = EventForwarder::new(event_tx);
    let mut deadline: Option<Instant> = None;

    tracing::info!(
        scenario = %scenario.key,
        context = scenario.context.len(),
        steps = scenario.steps.len(),
        speed = timing.speed,
        "playback ready"
    );

    observer.send(PlaybackEvent::StateChanged {
        state: machine.state(),
    });
    if options.autoplay {
        let d = machine.start(&mut observer);
        apply_directive(&mut deadline, d);
        observer.send(PlaybackEvent::StateChanged {
            state: machine.state(),
        });
    }

    loop {
        debug_assert_eq!(deadline.is_some(), machine.has_pending_tick());
        if options.exit_on_complete && machine.is_complete() {
            break;
        }

        let next_tick = deadline;
        tokio::select! {
            biased;
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                let directive = match cmd {
                    PlaybackCommand::Start => machine.start(&mut observer),
                    PlaybackCommand::Pause => machine.pause(),
                    PlaybackCommand::Resume => machine.resume(&mut observer),
                    PlaybackCommand::TogglePause => machine.toggle(&mut observer),
                    PlaybackCommand::Restart => machine.restart(&mut observer),
                    PlaybackCommand::SetSpeed(speed) => match machine.set_speed(speed) {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!("rejected speed change: {e}");
                            observer.send(PlaybackEvent::Info { message: e.to_string() });
                            TimerDirective::Keep
                        }
                    },
                    PlaybackCommand::Quit => break,
                };
                apply_directive(&mut deadline, directive);
                observer.send(PlaybackEvent::StateChanged { state: machine.state() });
            }
            // Without a deadline this branch never resolves, so a paused run cannot tick.
            _ = async move {
                match next_tick {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending().await,
                }
            } => {
                deadline = None;
                let directive = machine.tick(&mut observer);
                apply_directive(&mut deadline, directive);
            }
        }
    }

    let state = machine.state();
    tracing::info!(phase = state.phase.label(), "playback stopped");
    Ok(state)
}
