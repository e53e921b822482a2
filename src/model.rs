use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for a playback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between analysis steps at speed 1.
    #[serde(with = "humantime_serde")]
    pub step_duration: Duration,
    /// Pause after the last step before the result is shown.
    #[serde(with = "humantime_serde")]
    pub trailing_delay: Duration,
    /// Divisor applied to every interval.
    pub speed: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            step_duration: Duration::from_secs(4),
            trailing_delay: Duration::from_secs(2),
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Context,
    Analysis,
    Result,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Context => "Context",
            Phase::Analysis => "Analysis",
            Phase::Result => "Result",
        }
    }
}

/// Snapshot of the sequencer position handed to renderers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub phase: Phase,
    pub context_index: usize,
    pub step_index: usize,
    pub is_playing: bool,
    pub speed: f64,
}

impl PlaybackState {
    pub fn initial(speed: f64) -> Self {
        Self {
            phase: Phase::Context,
            context_index: 0,
            step_index: 0,
            is_playing: false,
            speed,
        }
    }

    /// True at the very beginning of a run, before anything has advanced.
    pub fn is_at_start(&self) -> bool {
        self.phase == Phase::Context && self.context_index == 0 && self.step_index == 0
    }
}

/// Events emitted by the playback driver and consumed by UI/CLI layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    PhaseChanged { state: PlaybackState },
    ContextAdvanced { state: PlaybackState },
    StepAdvanced { state: PlaybackState },
    Completed { state: PlaybackState },
    /// Play/pause/restart/speed changes requested by the user.
    StateChanged { state: PlaybackState },
    Info { message: String },
}

impl PlaybackEvent {
    pub fn state(&self) -> Option<&PlaybackState> {
        match self {
            PlaybackEvent::PhaseChanged { state }
            | PlaybackEvent::ContextAdvanced { state }
            | PlaybackEvent::StepAdvanced { state }
            | PlaybackEvent::Completed { state }
            | PlaybackEvent::StateChanged { state } => Some(state),
            PlaybackEvent::Info { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let ev = PlaybackEvent::StepAdvanced {
            state: PlaybackState {
                phase: Phase::Analysis,
                step_index: 2,
                ..PlaybackState::initial(1.0)
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "step_advanced");
        assert_eq!(v["state"]["phase"], "analysis");
        assert_eq!(v["state"]["step_index"], 2);
    }

    #[test]
    fn timing_config_round_trips_humantime() {
        let cfg: TimingConfig = serde_json::from_str(
            r#"{"step_duration": "4s", "trailing_delay": "500ms", "speed": 2.0}"#,
        )
        .unwrap();
        assert_eq!(cfg.step_duration, Duration::from_secs(4));
        assert_eq!(cfg.trailing_delay, Duration::from_millis(500));
        assert_eq!(cfg.speed, 2.0);
    }

    #[test]
    fn initial_state_is_at_start() {
        let s = PlaybackState::initial(1.5);
        assert!(s.is_at_start());
        assert!(!s.is_playing);
        assert_eq!(s.speed, 1.5);
    }
}
