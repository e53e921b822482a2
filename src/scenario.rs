//! Scenario fixtures: the scripted agent-failure stories the player narrates.
//!
//! Scenarios are loaded once at startup, validated, and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Built-in story set shipped with the binary.
const BUILTIN_SCENARIOS: &str = include_str!("../assets/scenarios.json");

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario JSON")]
    Parse(#[from] serde_json::Error),
    #[error("scenario set is empty")]
    Empty,
    #[error("scenario #{index} has a blank key")]
    BlankKey { index: usize },
    #[error("duplicate scenario key `{0}`")]
    DuplicateKey(String),
    #[error("scenario `{key}`: step at position {position} has ordinal {ordinal}")]
    StepOrdinal {
        key: String,
        position: usize,
        ordinal: u32,
    },
    #[error("scenario `{key}`: context phase {index} has a zero duration")]
    ZeroDuration { key: String, index: usize },
    #[error("unknown scenario `{key}` (available: {available})")]
    UnknownKey { key: String, available: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
}

impl StepStatus {
    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::Failure => "FAILURE",
            StepStatus::Skipped => "SKIPPED",
        }
    }

    /// Failures and skipped checks are both points where the agent went wrong.
    pub fn is_fault(self) -> bool {
        !matches!(self, StepStatus::Success)
    }
}

/// One simulated decision point of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the flow.
    pub ordinal: u32,
    pub title: String,
    pub description: String,
    pub tool: String,
    pub input: String,
    pub decision: String,
    pub output: String,
    pub status: StepStatus,
    /// Wall time the agent reported for the step, as free text ("245ms").
    pub duration: String,
    pub confidence: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_should_have_happened: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_impact: Option<String>,
}

/// A narrative card shown before the step-by-step analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPhase {
    pub title: String,
    pub content: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// On-disk shape of a scenario. `context` may be omitted, in which case the
/// standard narration is derived from the other fields.
#[derive(Deserialize)]
struct ScenarioRecord {
    key: String,
    company: String,
    #[serde(default)]
    logo: String,
    title: String,
    problem: String,
    why_existing_tools_failed: String,
    our_solution: String,
    business_context: String,
    #[serde(default)]
    impact: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    context: Option<Vec<ContextPhase>>,
    #[serde(default)]
    steps: Vec<Step>,
    root_cause: String,
    fix: String,
    prevention_confidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScenarioRecord")]
pub struct Scenario {
    pub key: String,
    pub company: String,
    pub logo: String,
    pub title: String,
    pub problem: String,
    pub why_existing_tools_failed: String,
    pub our_solution: String,
    pub business_context: String,
    /// Metric name to scalar, in fixture order.
    pub impact: serde_json::Map<String, serde_json::Value>,
    pub context: Vec<ContextPhase>,
    pub steps: Vec<Step>,
    pub root_cause: String,
    pub fix: String,
    pub prevention_confidence: String,
}

impl From<ScenarioRecord> for Scenario {
    fn from(r: ScenarioRecord) -> Self {
        let context = r.context.unwrap_or_else(|| {
            standard_context(
                &r.company,
                &r.business_context,
                &r.problem,
                &r.why_existing_tools_failed,
                &r.our_solution,
            )
        });
        Self {
            key: r.key,
            company: r.company,
            logo: r.logo,
            title: r.title,
            problem: r.problem,
            why_existing_tools_failed: r.why_existing_tools_failed,
            our_solution: r.our_solution,
            business_context: r.business_context,
            impact: r.impact,
            context,
            steps: r.steps,
            root_cause: r.root_cause,
            fix: r.fix,
            prevention_confidence: r.prevention_confidence,
        }
    }
}

impl Scenario {
    /// Durations of the context cards, in playback order.
    pub fn context_durations(&self) -> Vec<Duration> {
        self.context.iter().map(|c| c.duration).collect()
    }

    /// First step where the agent went wrong, if any.
    pub fn first_fault(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status.is_fault())
    }
}

/// The five-card narration used when a scenario does not script its own.
pub fn standard_context(
    company: &str,
    business_context: &str,
    problem: &str,
    why_existing_tools_failed: &str,
    our_solution: &str,
) -> Vec<ContextPhase> {
    let card = |title: &str, content: String, secs: u64| ContextPhase {
        title: title.to_string(),
        content,
        duration: Duration::from_secs(secs),
    };
    vec![
        card(
            "Setting The Scene",
            format!("At {company}, their AI agent handles critical operations. {business_context}"),
            4,
        ),
        card("The Problem", format!("Here's what went wrong: {problem}"), 3),
        card(
            "Why Existing Tools Failed",
            why_existing_tools_failed.to_string(),
            3,
        ),
        card("Our Solution", our_solution.to_string(), 3),
        card(
            "Let's Debug Step-by-Step",
            "Watch as we trace through the agent's decision-making process to find the exact failure point..."
                .to_string(),
            3,
        ),
    ]
}

/// Ordered, validated collection of scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
}

impl ScenarioSet {
    pub fn builtin() -> Result<Self, ScenarioError> {
        Self::from_json(BUILTIN_SCENARIOS)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScenarioError> {
        let scenarios: Vec<Scenario> = serde_json::from_str(raw)?;
        let set = Self { scenarios };
        set.validate()?;
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        if self.scenarios.is_empty() {
            return Err(ScenarioError::Empty);
        }
        let mut seen = HashSet::new();
        for (index, s) in self.scenarios.iter().enumerate() {
            if s.key.trim().is_empty() {
                return Err(ScenarioError::BlankKey { index });
            }
            if !seen.insert(s.key.as_str()) {
                return Err(ScenarioError::DuplicateKey(s.key.clone()));
            }
            for (i, step) in s.steps.iter().enumerate() {
                let position = i + 1;
                if step.ordinal as usize != position {
                    return Err(ScenarioError::StepOrdinal {
                        key: s.key.clone(),
                        position,
                        ordinal: step.ordinal,
                    });
                }
            }
            if let Some(index) = s.context.iter().position(|c| c.duration.is_zero()) {
                return Err(ScenarioError::ZeroDuration {
                    key: s.key.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    /// Look up a scenario by key; `None` selects the first one.
    pub fn get(&self, key: Option<&str>) -> Result<&Scenario, ScenarioError> {
        let found = match key {
            None => self.scenarios.first(),
            Some(k) => self.scenarios.iter().find(|s| s.key.eq_ignore_ascii_case(k)),
        };
        found.ok_or_else(|| ScenarioError::UnknownKey {
            key: key.unwrap_or_default().to_string(),
            available: self.keys().join(", "),
        })
    }

    pub fn keys(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }
}

/// Per-user override location, `<config dir>/agent-replay/scenarios.json`.
pub fn default_scenarios_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("agent-replay").join("scenarios.json"))
}

/// Load scenarios from an explicit file, the per-user override, or the built-in set.
pub fn load_scenarios(explicit: Option<&Path>) -> Result<ScenarioSet, ScenarioError> {
    if let Some(path) = explicit {
        tracing::debug!(path = %path.display(), "loading scenarios from file");
        return ScenarioSet::load(path);
    }
    if let Some(path) = default_scenarios_path().filter(|p| p.exists()) {
        tracing::info!(path = %path.display(), "using user scenario overrides");
        return ScenarioSet::load(&path);
    }
    ScenarioSet::builtin()
}
