use regex::Regex;

use crate::agents::GENERIC_AGENT;
use crate::config::AgentPattern;

/// tmux `list-panes` format understood by [`PaneInfo::parse`]
///
/// Tab separated; the title and cwd come last so spaces in them are harmless.
pub const PANE_FORMAT: &str = "#{pane_id}\t#{session_attached}\t#{session_name}:#{window_index}.#{pane_index}\t#{pane_current_command}\t#{pane_width}\t#{pane_height}\t#{@ptywatch_agent}\t#{pane_title}\t#{pane_current_path}";

/// Information about a tmux pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Global pane id (e.g. `%14`), used as the session id
    pub pane_id: String,
    /// Whether any client is attached to the pane's tmux session
    pub attached: bool,
    /// Full target identifier (session:window.pane)
    pub target: String,
    /// Current command running in the pane
    pub command: String,
    pub width: u16,
    pub height: u16,
    /// Value of the `@ptywatch_agent` pane option, if set
    pub agent_tag: Option<String>,
    /// Pane title
    pub title: String,
    /// Current working directory
    pub cwd: String,
}

impl PaneInfo {
    /// Parse a pane info line from tmux list-panes output (see [`PANE_FORMAT`])
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.splitn(9, '\t').collect();
        if parts.len() < 9 {
            return None;
        }

        let pane_id = parts[0].trim();
        if !pane_id.starts_with('%') {
            return None;
        }
        let agent_tag = parts[6].trim();

        Some(Self {
            pane_id: pane_id.to_string(),
            attached: parts[1].trim() != "0",
            target: parts[2].to_string(),
            command: parts[3].to_string(),
            width: parts[4].parse().unwrap_or(80),
            height: parts[5].parse().unwrap_or(24),
            agent_tag: (!agent_tag.is_empty()).then(|| agent_tag.to_string()),
            title: parts[7].to_string(),
            cwd: parts[8].trim_end_matches(['\r', '\n']).to_string(),
        })
    }
}

/// Decides the agent type tag of a pane
pub struct AgentTypeResolver {
    patterns: Vec<(Regex, String)>,
}

impl AgentTypeResolver {
    /// Compile the configured patterns; invalid ones are skipped with a warning
    pub fn new(patterns: &[AgentPattern]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(&p.pattern) {
                Ok(re) => Some((re, p.agent_type.clone())),
                Err(e) => {
                    tracing::warn!(pattern = %p.pattern, error = %e, "Skipping invalid agent pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Resolution order: pane option, configured patterns, command heuristics, generic
    pub fn resolve(&self, pane: &PaneInfo) -> String {
        if let Some(tag) = &pane.agent_tag {
            return tag.clone();
        }

        for (re, agent_type) in &self.patterns {
            if re.is_match(&pane.command) || re.is_match(&pane.title) {
                return agent_type.clone();
            }
        }

        agent_type_from_command(&pane.command)
            .unwrap_or(GENERIC_AGENT)
            .to_string()
    }
}

/// Map a pane's current command to a built-in agent type
fn agent_type_from_command(command: &str) -> Option<&'static str> {
    let cmd = command.trim().to_lowercase();
    let cmd = cmd.rsplit('/').next().unwrap_or(&cmd);
    match cmd {
        "claude" => Some("claude"),
        "codex" => Some("codex"),
        "gemini" => Some("gemini"),
        "opencode" => Some("opencode"),
        "aider" => Some("aider"),
        "bash" | "zsh" | "fish" | "sh" | "dash" | "ksh" | "tcsh" | "nu" | "-bash" | "-zsh" => {
            Some("shell")
        }
        _ => None,
    }
}
