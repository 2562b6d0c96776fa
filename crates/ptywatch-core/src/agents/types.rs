use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent type tag used when nothing more specific is known
pub const GENERIC_AGENT: &str = "generic";

/// State a classifier can assign to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Idle at a prompt, safe to send new input
    Ready,
    /// Still producing output or working silently
    Busy,
    /// Blocked on an explicit human answer (y/N, approve, ...)
    NeedsConfirmation,
    /// Last command or the agent itself failed
    Error,
}

impl AgentState {
    /// All classifier states in match priority order (most urgent first)
    pub const PRIORITY: [AgentState; 4] = [
        AgentState::Error,
        AgentState::NeedsConfirmation,
        AgentState::Busy,
        AgentState::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Ready => "READY",
            AgentState::Busy => "BUSY",
            AgentState::NeedsConfirmation => "NEEDS_CONFIRMATION",
            AgentState::Error => "ERROR",
        }
    }

    /// Lenient parse used for model output
    ///
    /// Accepts any case, `-`/space separators and a few common synonyms.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "READY" | "IDLE" | "IDLE_AT_PROMPT" => Some(AgentState::Ready),
            "BUSY" | "WORKING" | "PROCESSING" | "RUNNING" => Some(AgentState::Busy),
            "NEEDS_CONFIRMATION" | "CONFIRMATION" | "CONFIRM" | "WAITING"
            | "WAITING_FOR_CONFIRMATION" | "BLOCKED_ON_INPUT" => {
                Some(AgentState::NeedsConfirmation)
            }
            "ERROR" | "FAILED" => Some(AgentState::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a tracked session
///
/// Extends [`AgentState`] with the pre-classification `Untracked` state and
/// the terminal `Removed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Untracked,
    Ready,
    Busy,
    NeedsConfirmation,
    Error,
    Removed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Untracked => "UNTRACKED",
            SessionState::Ready => "READY",
            SessionState::Busy => "BUSY",
            SessionState::NeedsConfirmation => "NEEDS_CONFIRMATION",
            SessionState::Error => "ERROR",
            SessionState::Removed => "REMOVED",
        }
    }
}

impl From<AgentState> for SessionState {
    fn from(state: AgentState) -> Self {
        match state {
            AgentState::Ready => SessionState::Ready,
            AgentState::Busy => SessionState::Busy,
            AgentState::NeedsConfirmation => SessionState::NeedsConfirmation,
            AgentState::Error => SessionState::Error,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNTRACKED" => Ok(SessionState::Untracked),
            "READY" => Ok(SessionState::Ready),
            "BUSY" => Ok(SessionState::Busy),
            "NEEDS_CONFIRMATION" => Ok(SessionState::NeedsConfirmation),
            "ERROR" => Ok(SessionState::Error),
            "REMOVED" => Ok(SessionState::Removed),
            other => Err(format!("unknown session state: {}", other)),
        }
    }
}

/// One monitored terminal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier (tmux pane id such as `%14`)
    pub id: String,
    /// Selects the classifier pack
    pub agent_type: String,
    /// Working directory of the session
    pub cwd: String,
    /// When the watcher first observed the session
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            cwd: cwd.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of classifying one stabilized snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub state: AgentState,
    /// Human-readable one-liner
    pub summary: String,
    /// What a human should do, if anything
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Summary used when the remote classifier gave up
pub const CLASSIFIER_UNAVAILABLE: &str = "classifier unavailable";

impl Verdict {
    pub fn new(state: AgentState, summary: impl Into<String>) -> Self {
        Self {
            state,
            summary: summary.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Verdict produced when classification could not be completed
    pub fn unavailable() -> Self {
        Self::new(AgentState::Error, CLASSIFIER_UNAVAILABLE)
    }

    /// Verdict applied without classification when visible output keeps changing
    pub fn output_changing() -> Self {
        Self::new(AgentState::Busy, "Output changing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert_eq!(
            AgentState::PRIORITY,
            [
                AgentState::Error,
                AgentState::NeedsConfirmation,
                AgentState::Busy,
                AgentState::Ready
            ]
        );
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(AgentState::parse_lenient("ready"), Some(AgentState::Ready));
        assert_eq!(AgentState::parse_lenient("IDLE"), Some(AgentState::Ready));
        assert_eq!(
            AgentState::parse_lenient("needs-confirmation"),
            Some(AgentState::NeedsConfirmation)
        );
        assert_eq!(AgentState::parse_lenient(" error "), Some(AgentState::Error));
        assert_eq!(AgentState::parse_lenient("sleepy"), None);
    }

    #[test]
    fn test_session_state_round_trips_through_str() {
        for state in [
            SessionState::Untracked,
            SessionState::Ready,
            SessionState::Busy,
            SessionState::NeedsConfirmation,
            SessionState::Error,
            SessionState::Removed,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>(), Ok(state));
        }
        assert!("NOPE".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_verdict_serializes_screaming_case() {
        let verdict = Verdict::new(AgentState::NeedsConfirmation, "Waiting");
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["state"], "NEEDS_CONFIRMATION");
        assert_eq!(json["actions"], serde_json::json!([]));
    }

    #[test]
    fn test_unavailable_verdict() {
        let verdict = Verdict::unavailable();
        assert_eq!(verdict.state, AgentState::Error);
        assert_eq!(verdict.summary, "classifier unavailable");
    }
}
