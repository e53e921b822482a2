use crate::model::{Phase, PlaybackEvent, PlaybackState};
use crate::scenario::{ContextPhase, Scenario, Step};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 16.0;

pub struct UiState {
    pub scenario: Scenario,
    pub playback: PlaybackState,
    pub info: String,
    pub show_help: bool,
    pub completions: usize,
}

impl UiState {
    pub fn new(scenario: Scenario, speed: f64) -> Self {
        Self {
            scenario,
            playback: PlaybackState::initial(speed),
            info: String::new(),
            show_help: false,
            completions: 0,
        }
    }

    pub fn apply_event(&mut self, ev: PlaybackEvent) {
        if let Some(state) = ev.state() {
            self.playback = *state;
        }
        match ev {
            PlaybackEvent::PhaseChanged { state } => {
                self.info = format!("Phase: {}", state.phase.label());
            }
            PlaybackEvent::StepAdvanced { state } => {
                if let Some(step) = self.scenario.steps.get(state.step_index) {
                    self.info = format!("Step {}: {}", step.ordinal, step.title);
                } else {
                    self.info = "All steps analysed".into();
                }
            }
            PlaybackEvent::Completed { .. } => {
                self.completions += 1;
                self.info = "Analysis complete".into();
            }
            PlaybackEvent::Info { message } => self.info = message,
            PlaybackEvent::ContextAdvanced { .. } | PlaybackEvent::StateChanged { .. } => {}
        }
    }

    pub fn current_context(&self) -> Option<&ContextPhase> {
        match self.playback.phase {
            Phase::Context => self.scenario.context.get(self.playback.context_index),
            _ => None,
        }
    }

    /// Steps already shown to the viewer; the last one is the step under analysis.
    pub fn revealed_steps(&self) -> &[Step] {
        let steps = &self.scenario.steps;
        match self.playback.phase {
            Phase::Context => &[],
            Phase::Analysis => &steps[..(self.playback.step_index + 1).min(steps.len())],
            Phase::Result => steps.as_slice(),
        }
    }

    /// Fraction of the whole run that has played, 0.0..=1.0.
    pub fn progress(&self) -> f64 {
        let total = self.scenario.context.len() + self.scenario.steps.len();
        if self.playback.phase == Phase::Result || total == 0 {
            return 1.0;
        }
        let done = self.playback.context_index + self.playback.step_index;
        (done as f64 / total as f64).min(1.0)
    }

    pub fn status_label(&self) -> &'static str {
        match (self.playback.phase, self.playback.is_playing) {
            (Phase::Result, _) => "Done",
            (_, true) => "Playing",
            (_, false) if self.playback.is_at_start() => "Ready",
            (_, false) => "Paused",
        }
    }
}

/// Double or halve the speed, clamped to the supported range.
pub fn step_speed(speed: f64, faster: bool) -> f64 {
    let next = if faster { speed * 2.0 } else { speed / 2.0 };
    next.clamp(MIN_SPEED, MAX_SPEED)
}

pub fn status_color(step: &Step) -> Color {
    match step.status {
        crate::scenario::StepStatus::Success => Color::Green,
        crate::scenario::StepStatus::Failure => Color::Red,
        crate::scenario::StepStatus::Skipped => Color::Yellow,
    }
}

pub fn kv_line(label: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label}: "), Style::default().fg(Color::Gray)),
        Span::raw(value.to_string()),
    ])
}
