//! Text narration for CLI output.
//!
//! Turns playback events into human-readable lines and formats scenario
//! metadata (impact metrics, result summary) for text mode and the TUI.

use crate::model::{Phase, PlaybackEvent, PlaybackState};
use crate::scenario::{Scenario, Step};

/// Group an integer with thousands separators: 127000 -> "127,000".
pub(crate) fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// "revenue_loss" -> "Revenue loss"
pub(crate) fn humanize_key(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_money_key(key: &str) -> bool {
    key.ends_with("_loss") || key.ends_with("_lost") || key.ends_with("_value")
}

fn format_impact_value(key: &str, value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Bool(true) => "yes".into(),
        serde_json::Value::Bool(false) => "no".into(),
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(v) if is_money_key(key) => format!("${}", group_thousands(v)),
            Some(v) => group_thousands(v),
            None => n.to_string(),
        },
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Impact metrics as (label, value) pairs in fixture order.
pub(crate) fn format_impact(scenario: &Scenario) -> Vec<(String, String)> {
    scenario
        .impact
        .iter()
        .map(|(k, v)| (humanize_key(k), format_impact_value(k, v)))
        .collect()
}

/// Detail lines for one revealed step.
pub(crate) fn step_lines(step: &Step) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Step {}: {} [{}]",
            step.ordinal,
            step.title,
            step.status.label()
        ),
        format!("  {}", step.description),
        format!("  Tool: {}  Input: {}", step.tool, step.input),
        format!("  Decision: {}", step.decision),
        format!("  Output: {}", step.output),
        format!(
            "  Took {} at {} confidence. {}",
            step.duration, step.confidence, step.reasoning
        ),
    ];
    if step.status.is_fault() {
        if let Some(should) = step.what_should_have_happened.as_deref() {
            lines.push(format!("  Should have: {should}"));
        }
        if let Some(impact) = step.business_impact.as_deref() {
            lines.push(format!("  Impact: {impact}"));
        }
    }
    lines
}

/// Closing summary shown once playback reaches the result phase.
pub(crate) fn result_lines(scenario: &Scenario) -> Vec<String> {
    let mut lines = vec![format!("== {} analysis complete ==", scenario.company)];
    if let Some(step) = scenario.first_fault() {
        lines.push(format!("Failure point: step {} ({})", step.ordinal, step.title));
    }
    lines.push(format!("Root cause: {}", scenario.root_cause));
    lines.push(format!("Fix: {}", scenario.fix));
    lines.push(format!(
        "Prevention confidence: {}",
        scenario.prevention_confidence
    ));
    for (label, value) in format_impact(scenario) {
        lines.push(format!("{label}: {value}"));
    }
    lines
}

fn context_lines(scenario: &Scenario, state: &PlaybackState) -> Vec<String> {
    match scenario.context.get(state.context_index) {
        Some(card) => vec![format!("-- {} --", card.title), card.content.clone()],
        None => Vec::new(),
    }
}

/// Lines to print for a playback event; empty when the event shows nothing new.
pub(crate) fn describe_event(scenario: &Scenario, ev: &PlaybackEvent) -> Vec<String> {
    match ev {
        PlaybackEvent::PhaseChanged { state } => match state.phase {
            Phase::Context => vec![format!("== {} ==", Phase::Context.label())],
            Phase::Analysis => {
                let mut lines = vec![format!(
                    "== {}: {} steps ==",
                    Phase::Analysis.label(),
                    scenario.steps.len()
                )];
                if let Some(step) = scenario.steps.get(state.step_index) {
                    lines.extend(step_lines(step));
                }
                lines
            }
            // The result summary is printed on completion.
            Phase::Result => Vec::new(),
        },
        PlaybackEvent::ContextAdvanced { state } => context_lines(scenario, state),
        PlaybackEvent::StepAdvanced { state } => match scenario.steps.get(state.step_index) {
            Some(step) => step_lines(step),
            None => Vec::new(),
        },
        PlaybackEvent::Completed { .. } => result_lines(scenario),
        PlaybackEvent::StateChanged { state } => {
            // The first card has no advance event of its own.
            if state.is_playing && state.is_at_start() {
                let mut lines = vec![format!(
                    "{} {}: {}",
                    scenario.logo, scenario.company, scenario.title
                )];
                lines.extend(context_lines(scenario, state));
                lines
            } else {
                Vec::new()
            }
        }
        PlaybackEvent::Info { message } => vec![message.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioSet;

    fn atlassian() -> Scenario {
        ScenarioSet::builtin()
            .unwrap()
            .get(Some("atlassian"))
            .unwrap()
            .clone()
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(847), "847");
        assert_eq!(group_thousands(15000), "15,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn humanizes_keys() {
        assert_eq!(humanize_key("revenue_loss"), "Revenue loss");
        assert_eq!(humanize_key(""), "");
    }

    #[test]
    fn formats_impact_money_counts_and_flags() {
        let s = atlassian();
        let impact = format_impact(&s);
        assert_eq!(impact[0], ("Revenue loss".to_string(), "$127,000".to_string()));
        assert_eq!(impact[2], ("Customers affected".to_string(), "15,000".to_string()));

        let github = ScenarioSet::builtin().unwrap().get(Some("github")).unwrap().clone();
        let impact = format_impact(&github);
        assert_eq!(impact[0], ("Security incident".to_string(), "yes".to_string()));
    }

    #[test]
    fn fault_steps_show_what_should_have_happened() {
        let s = atlassian();
        let lines = step_lines(&s.steps[2]);
        assert!(lines[0].contains("[FAILURE]"));
        assert!(lines
            .iter()
            .any(|l| l == "  Should have: IF database_schema_change THEN run_integration_tests = TRUE"));

        let ok = step_lines(&s.steps[0]);
        assert!(ok.iter().all(|l| !l.contains("Should have")));
    }

    #[test]
    fn describes_context_steps_and_completion() {
        let s = atlassian();
        let mut state = PlaybackState::initial(1.0);
        state.is_playing = true;

        let opening = describe_event(&s, &PlaybackEvent::StateChanged { state });
        assert!(opening[0].contains("Atlassian"));
        assert_eq!(opening[1], "-- Setting The Scene --");

        state.context_index = 1;
        let card = describe_event(&s, &PlaybackEvent::ContextAdvanced { state });
        assert_eq!(card[0], "-- The Problem --");

        state.phase = Phase::Analysis;
        state.context_index = 5;
        state.step_index = 4;
        assert!(describe_event(&s, &PlaybackEvent::StepAdvanced { state }).is_empty());

        let done = describe_event(&s, &PlaybackEvent::Completed { state });
        assert!(done.iter().any(|l| l.starts_with("Root cause: Missing conditional logic")));
        assert!(done.iter().any(|l| l == "Failure point: step 3 (Integration Test Decision)"));
    }
}
