use super::common::{line_at, tail_lines, truncate};
use super::pack::ClassifierPack;
use super::Classifier;
use crate::agents::{AgentState, Verdict};

/// Maximum length of the matched line quoted in a summary
const MAX_QUOTE_LEN: usize = 200;

/// Summary when no pattern matched
pub const NO_MATCH_SUMMARY: &str = "No known prompt detected; assuming the agent is still working";

/// Deterministic classifier driven by a pack's regexes
///
/// States are tried in [`AgentState::PRIORITY`] order and the first matching
/// pattern wins. Pure function of (snapshot, pack).
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_sync(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        let text = match pack.tail_lines {
            Some(n) => tail_lines(snapshot, n),
            None => snapshot,
        };

        for state in AgentState::PRIORITY {
            for pattern in pack.patterns(state) {
                if let Some(m) = pattern.find(text) {
                    let line = truncate(line_at(text, m.start()), MAX_QUOTE_LEN);
                    return verdict_for(state, &line);
                }
            }
        }

        Verdict::new(AgentState::Busy, NO_MATCH_SUMMARY)
    }
}

fn verdict_for(state: AgentState, line: &str) -> Verdict {
    let headline = match state {
        AgentState::Error => "Error output detected",
        AgentState::NeedsConfirmation => "Waiting for confirmation",
        AgentState::Busy => "Agent is working",
        AgentState::Ready => "Ready for input",
    };
    let summary = if line.is_empty() {
        headline.to_string()
    } else {
        format!("{}: {}", headline, line)
    };

    let verdict = Verdict::new(state, summary);
    match state {
        AgentState::Error => verdict.with_action("Inspect the session output to unblock the agent"),
        AgentState::NeedsConfirmation => {
            verdict.with_action("Answer the confirmation prompt in the session")
        }
        AgentState::Busy | AgentState::Ready => verdict,
    }
}

impl Classifier for PatternClassifier {
    async fn classify(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        self.classify_sync(snapshot, pack)
    }
}
