//! Clock-free playback state machine.
//!
//! The machine never touches a timer itself. Every operation returns a
//! [`TimerDirective`] telling the owner what to do with its single pending
//! tick, and [`Machine::arm`] is the only place a new tick gets scheduled.

use super::SequencerError;
use crate::model::{Phase, PlaybackState, TimingConfig};
use crate::scenario::Scenario;
use std::time::Duration;

/// Callbacks fired synchronously as transitions happen.
pub trait PlaybackObserver {
    fn on_phase_change(&mut self, _state: &PlaybackState) {}
    fn on_context_advance(&mut self, _state: &PlaybackState) {}
    fn on_step_advance(&mut self, _state: &PlaybackState) {}
    fn on_complete(&mut self, _state: &PlaybackState) {}
}

impl PlaybackObserver for () {}

/// What the owner must do with its one tick timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDirective {
    /// Replace any pending tick with one firing after this interval.
    Schedule(Duration),
    /// Drop the pending tick.
    Cancel,
    /// Leave the pending tick as it is.
    Keep,
}

/// Slowest accepted speed multiplier.
pub const MIN_SPEED: f64 = 0.01;
/// Fastest accepted speed multiplier.
pub const MAX_SPEED: f64 = 1000.0;

pub(crate) fn validate_speed(speed: f64) -> Result<f64, SequencerError> {
    if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(SequencerError::InvalidSpeed(speed))
    }
}

pub struct Machine {
    context_durations: Vec<Duration>,
    step_count: usize,
    step_duration: Duration,
    trailing_delay: Duration,
    state: PlaybackState,
    armed: bool,
    completed: bool,
}

impl Machine {
    pub fn new(scenario: &Scenario, timing: &TimingConfig) -> Result<Self, SequencerError> {
        Self::from_parts(scenario.context_durations(), scenario.steps.len(), timing)
    }

    pub fn from_parts(
        context_durations: Vec<Duration>,
        step_count: usize,
        timing: &TimingConfig,
    ) -> Result<Self, SequencerError> {
        let speed = validate_speed(timing.speed)?;
        Ok(Self {
            context_durations,
            step_count,
            step_duration: timing.step_duration,
            trailing_delay: timing.trailing_delay,
            state: PlaybackState::initial(speed),
            armed: false,
            completed: false,
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn has_pending_tick(&self) -> bool {
        self.armed
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Begin playback. Already playing or finished runs are left alone.
    pub fn start(&mut self, obs: &mut dyn PlaybackObserver) -> TimerDirective {
        if !self.state.is_at_start() {
            tracing::debug!(state = ?self.state, "start on a run in progress, resuming");
        }
        self.resume(obs)
    }

    pub fn resume(&mut self, obs: &mut dyn PlaybackObserver) -> TimerDirective {
        if self.state.is_playing || self.state.phase == Phase::Result {
            return TimerDirective::Keep;
        }
        self.state.is_playing = true;
        self.settle(obs);
        self.arm()
    }

    pub fn pause(&mut self) -> TimerDirective {
        if !self.state.is_playing {
            return TimerDirective::Keep;
        }
        self.state.is_playing = false;
        self.armed = false;
        TimerDirective::Cancel
    }

    pub fn toggle(&mut self, obs: &mut dyn PlaybackObserver) -> TimerDirective {
        if self.state.is_playing {
            self.pause()
        } else {
            self.resume(obs)
        }
    }

    /// Back to the first context card, paused. Speed is kept.
    pub fn restart(&mut self, obs: &mut dyn PlaybackObserver) -> TimerDirective {
        let previous = self.state.phase;
        self.state = PlaybackState::initial(self.state.speed);
        self.armed = false;
        self.completed = false;
        if previous != Phase::Context {
            obs.on_phase_change(&self.state);
        }
        TimerDirective::Cancel
    }

    /// Affects intervals scheduled from now on; a pending tick keeps its deadline.
    pub fn set_speed(&mut self, speed: f64) -> Result<TimerDirective, SequencerError> {
        self.state.speed = validate_speed(speed)?;
        Ok(TimerDirective::Keep)
    }

    /// Handle the pending tick firing.
    pub fn tick(&mut self, obs: &mut dyn PlaybackObserver) -> TimerDirective {
        if !self.armed || !self.state.is_playing {
            tracing::trace!("ignoring stale tick");
            return TimerDirective::Keep;
        }
        self.armed = false;

        match self.state.phase {
            Phase::Context => {
                self.state.context_index += 1;
                if self.state.context_index < self.context_durations.len() {
                    obs.on_context_advance(&self.state);
                } else {
                    self.enter_analysis(obs);
                }
            }
            Phase::Analysis => {
                if self.state.step_index < self.step_count {
                    self.state.step_index += 1;
                    obs.on_step_advance(&self.state);
                } else {
                    self.finish(obs);
                }
            }
            Phase::Result => {}
        }
        self.arm()
    }

    /// Apply the zero-length guards so playback never waits on an empty list.
    fn settle(&mut self, obs: &mut dyn PlaybackObserver) {
        if self.step_count == 0 {
            self.finish(obs);
            return;
        }
        if self.state.phase == Phase::Context
            && self.state.context_index >= self.context_durations.len()
        {
            self.enter_analysis(obs);
        }
    }

    fn enter_analysis(&mut self, obs: &mut dyn PlaybackObserver) {
        self.state.context_index = self.context_durations.len();
        self.state.phase = Phase::Analysis;
        self.state.step_index = 0;
        obs.on_phase_change(&self.state);
    }

    fn finish(&mut self, obs: &mut dyn PlaybackObserver) {
        self.state.phase = Phase::Result;
        self.state.is_playing = false;
        self.armed = false;
        if !self.completed {
            self.completed = true;
            obs.on_phase_change(&self.state);
            obs.on_complete(&self.state);
        }
    }

    /// Interval until the next tick at the current position, before speed scaling.
    fn base_interval(&self) -> Option<Duration> {
        match self.state.phase {
            Phase::Context => self.context_durations.get(self.state.context_index).copied(),
            Phase::Analysis if self.state.step_index < self.step_count => Some(self.step_duration),
            Phase::Analysis => Some(self.trailing_delay),
            Phase::Result => None,
        }
    }

    /// Schedule the next tick for the current position, if playback should continue.
    fn arm(&mut self) -> TimerDirective {
        if !self.state.is_playing {
            self.armed = false;
            return TimerDirective::Cancel;
        }
        match self.base_interval() {
            Some(base) => {
                self.armed = true;
                // Saturate rather than overflow on very long intervals.
                let interval = Duration::try_from_secs_f64(base.as_secs_f64() / self.state.speed)
                    .unwrap_or(Duration::MAX);
                TimerDirective::Schedule(interval)
            }
            None => {
                self.armed = false;
                TimerDirective::Cancel
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        phases: Vec<Phase>,
        contexts: Vec<usize>,
        steps: Vec<usize>,
        completions: usize,
    }

    impl PlaybackObserver for Recorder {
        fn on_phase_change(&mut self, state: &PlaybackState) {
            self.phases.push(state.phase);
        }
        fn on_context_advance(&mut self, state: &PlaybackState) {
            self.contexts.push(state.context_index);
        }
        fn on_step_advance(&mut self, state: &PlaybackState) {
            self.steps.push(state.step_index);
        }
        fn on_complete(&mut self, _state: &PlaybackState) {
            self.completions += 1;
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn machine(contexts: &[u64], steps: usize, speed: f64) -> Machine {
        let timing = TimingConfig {
            speed,
            ..TimingConfig::default()
        };
        Machine::from_parts(contexts.iter().map(|s| secs(*s)).collect(), steps, &timing).unwrap()
    }

    /// Drive the machine like a timer would, returning the virtual time spent
    /// and every state observed while playing.
    fn run_to_end(m: &mut Machine, obs: &mut Recorder) -> (Duration, Vec<PlaybackState>) {
        let mut elapsed = Duration::ZERO;
        let mut seen = vec![m.state()];
        let mut directive = m.start(obs);
        seen.push(m.state());
        while let TimerDirective::Schedule(d) = directive {
            elapsed += d;
            directive = m.tick(obs);
            seen.push(m.state());
            assert!(seen.len() < 1000, "playback never finished");
        }
        (elapsed, seen)
    }

    #[test]
    fn visits_every_position_once_in_order() {
        let mut m = machine(&[4, 3, 3], 4, 1.0);
        let mut rec = Recorder::default();
        let (_, seen) = run_to_end(&mut m, &mut rec);

        let mut contexts: Vec<usize> = seen
            .iter()
            .filter(|s| s.phase == Phase::Context)
            .map(|s| s.context_index)
            .collect();
        contexts.dedup();
        assert_eq!(contexts, vec![0, 1, 2]);

        let mut steps: Vec<usize> = seen
            .iter()
            .filter(|s| s.phase == Phase::Analysis && s.step_index < 4)
            .map(|s| s.step_index)
            .collect();
        steps.dedup();
        assert_eq!(steps, vec![0, 1, 2, 3]);

        assert_eq!(rec.contexts, vec![1, 2]);
        assert_eq!(rec.steps, vec![1, 2, 3, 4]);
        assert_eq!(rec.phases, vec![Phase::Analysis, Phase::Result]);
        assert_eq!(m.state().phase, Phase::Result);
    }

    #[test]
    fn four_steps_complete_once_after_expected_time() {
        let mut m = machine(&[], 4, 1.0);
        let mut rec = Recorder::default();
        let (elapsed, _) = run_to_end(&mut m, &mut rec);
        // 4 step intervals + trailing delay
        assert_eq!(elapsed, secs(4 * 4 + 2));
        assert_eq!(rec.completions, 1);
        assert_eq!(m.state().phase, Phase::Result);
        assert!(!m.state().is_playing);

        // Late ticks do nothing.
        assert_eq!(m.tick(&mut rec), TimerDirective::Keep);
        assert_eq!(rec.completions, 1);
    }

    #[test]
    fn step_index_never_exceeds_step_count() {
        let mut m = machine(&[1], 3, 1.0);
        let mut rec = Recorder::default();
        let (_, seen) = run_to_end(&mut m, &mut rec);
        assert!(seen.iter().all(|s| s.step_index <= 3 && s.context_index <= 1));
        assert!(seen
            .windows(2)
            .all(|w| w[1].step_index >= w[0].step_index || w[1].phase != Phase::Analysis));
    }

    #[test]
    fn double_speed_halves_total_time() {
        let mut rec = Recorder::default();
        let (normal, _) = run_to_end(&mut machine(&[4, 3], 2, 1.0), &mut rec);
        let (fast, _) = run_to_end(&mut machine(&[4, 3], 2, 2.0), &mut rec);
        assert_eq!(normal, secs(4 + 3 + 4 * 2 + 2));
        assert_eq!(fast * 2, normal);
    }

    #[test]
    fn empty_steps_finish_without_scheduling() {
        let mut m = machine(&[4, 3], 0, 1.0);
        let mut rec = Recorder::default();
        let d = m.start(&mut rec);
        assert_eq!(d, TimerDirective::Cancel);
        assert!(!m.has_pending_tick());
        assert_eq!(m.state().phase, Phase::Result);
        assert_eq!(rec.completions, 1);
    }

    #[test]
    fn empty_context_goes_straight_to_analysis() {
        let mut m = machine(&[], 2, 1.0);
        let mut rec = Recorder::default();
        assert_eq!(m.start(&mut rec), TimerDirective::Schedule(secs(4)));
        assert_eq!(m.state().phase, Phase::Analysis);
        assert_eq!(m.state().step_index, 0);
        assert_eq!(rec.phases, vec![Phase::Analysis]);
    }

    #[test]
    fn start_is_idempotent_while_playing() {
        let mut m = machine(&[4], 1, 1.0);
        let mut rec = Recorder::default();
        assert_eq!(m.start(&mut rec), TimerDirective::Schedule(secs(4)));
        assert_eq!(m.start(&mut rec), TimerDirective::Keep);
        assert!(m.has_pending_tick());
    }

    #[test]
    fn pause_cancels_and_stale_ticks_are_ignored() {
        let mut m = machine(&[4, 3], 2, 1.0);
        let mut rec = Recorder::default();
        m.start(&mut rec);
        m.tick(&mut rec);
        let before = m.state();

        assert_eq!(m.pause(), TimerDirective::Cancel);
        assert!(!m.has_pending_tick());
        for _ in 0..10 {
            assert_eq!(m.tick(&mut rec), TimerDirective::Keep);
        }
        let after = m.state();
        assert_eq!(after.context_index, before.context_index);
        assert_eq!(after.step_index, before.step_index);
        assert!(!after.is_playing);

        // Resume reschedules a full interval for the current card.
        assert_eq!(m.resume(&mut rec), TimerDirective::Schedule(secs(3)));
    }

    #[test]
    fn restart_resets_from_any_state() {
        let mut rec = Recorder::default();

        let mut m = machine(&[1, 1], 2, 1.0);
        m.start(&mut rec);
        m.tick(&mut rec);
        m.tick(&mut rec);
        assert_eq!(m.state().phase, Phase::Analysis);
        assert_eq!(m.restart(&mut rec), TimerDirective::Cancel);
        assert_eq!(m.state(), PlaybackState::initial(1.0));
        assert!(!m.has_pending_tick());

        let mut done = machine(&[1], 1, 1.0);
        run_to_end(&mut done, &mut rec);
        done.restart(&mut rec);
        assert_eq!(done.state(), PlaybackState::initial(1.0));

        // A restarted run signals completion again.
        let before = rec.completions;
        run_to_end(&mut done, &mut rec);
        assert_eq!(rec.completions, before + 1);
    }

    #[test]
    fn speed_change_keeps_pending_tick() {
        let mut m = machine(&[4, 4], 1, 1.0);
        let mut rec = Recorder::default();
        assert_eq!(m.start(&mut rec), TimerDirective::Schedule(secs(4)));
        assert_eq!(m.set_speed(4.0).unwrap(), TimerDirective::Keep);
        assert!(m.has_pending_tick());
        assert_eq!(m.tick(&mut rec), TimerDirective::Schedule(secs(1)));
    }

    #[test]
    fn rejects_bad_speed() {
        let mut m = machine(&[1], 1, 1.0);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(m.set_speed(bad).is_err());
        }
        assert_eq!(m.state().speed, 1.0);

        let timing = TimingConfig {
            speed: 0.0,
            ..TimingConfig::default()
        };
        assert!(Machine::from_parts(vec![], 1, &timing).is_err());
    }

    #[test]
    fn rejects_speed_outside_supported_range() {
        assert_eq!(
            validate_speed(1e-300),
            Err(SequencerError::InvalidSpeed(1e-300))
        );
        assert!(validate_speed(MAX_SPEED * 2.0).is_err());
        assert_eq!(validate_speed(MIN_SPEED), Ok(MIN_SPEED));
        assert_eq!(validate_speed(MAX_SPEED), Ok(MAX_SPEED));

        let timing = TimingConfig {
            speed: 1e-300,
            ..TimingConfig::default()
        };
        assert!(Machine::from_parts(vec![secs(4)], 1, &timing).is_err());
    }

    #[test]
    fn huge_intervals_saturate_instead_of_panicking() {
        let timing = TimingConfig {
            step_duration: Duration::MAX,
            trailing_delay: Duration::MAX,
            speed: MIN_SPEED,
        };
        let mut m = Machine::from_parts(vec![Duration::MAX], 1, &timing).unwrap();
        assert_eq!(m.start(&mut ()), TimerDirective::Schedule(Duration::MAX));
        assert_eq!(m.tick(&mut ()), TimerDirective::Schedule(Duration::MAX));
        assert_eq!(m.state().phase, Phase::Analysis);
    }

    #[test]
    fn resume_during_trailing_delay_waits_full_delay() {
        let mut m = machine(&[], 1, 1.0);
        let mut rec = Recorder::default();
        m.start(&mut rec);
        assert_eq!(m.tick(&mut rec), TimerDirective::Schedule(secs(2)));
        m.pause();
        assert_eq!(m.resume(&mut rec), TimerDirective::Schedule(secs(2)));
        assert_eq!(m.tick(&mut rec), TimerDirective::Cancel);
        assert_eq!(rec.completions, 1);
    }
}
