use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::{Command, Output};

use super::pane::{AgentTypeResolver, PaneInfo, PANE_FORMAT};
use super::render::render_plain;
use super::{DiscoveredSession, SessionSource};
use crate::config::Settings;
use crate::error::CaptureError;

/// Regex pattern for validating tmux pane ids (e.g. `%14`)
static PANE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%\d+$").expect("Invalid PANE_ID_PATTERN regex"));

/// Validate pane id format to prevent command injection
fn validate_pane_id(pane_id: &str) -> Result<(), CaptureError> {
    if !PANE_ID_PATTERN.is_match(pane_id) {
        return Err(CaptureError::Failed {
            session_id: pane_id.to_string(),
            message: "invalid tmux pane id".to_string(),
        });
    }
    Ok(())
}

/// True when tmux stderr says the server or the target no longer exists
fn is_gone_message(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("can't find pane")
        || stderr.contains("can't find window")
        || stderr.contains("can't find session")
        || is_no_server_message(&stderr)
}

fn is_no_server_message(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no server running")
        || stderr.contains("error connecting to")
        || stderr.contains("no sessions")
}

/// Client for reading tmux panes
pub struct TmuxClient {
    attached_only: bool,
    resolver: AgentTypeResolver,
}

impl TmuxClient {
    /// Creates a client from the watcher settings
    pub fn new(settings: &Settings) -> Self {
        Self {
            attached_only: settings.attached_only,
            resolver: AgentTypeResolver::new(&settings.agent_patterns),
        }
    }

    /// Check if tmux is available and running
    pub fn is_available(&self) -> bool {
        Command::new("tmux")
            .arg("list-sessions")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Lists all panes across all tmux sessions
    pub fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = Command::new("tmux")
            .args(["list-panes", "-a", "-F", PANE_FORMAT])
            .output()
            .context("Failed to execute tmux list-panes")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_server_message(&stderr) {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-panes failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(PaneInfo::parse).collect())
    }

    /// Captures the visible content of a pane, escape sequences included
    pub fn capture_pane_raw(&self, pane_id: &str) -> Result<String, CaptureError> {
        validate_pane_id(pane_id)?;

        let output = Command::new("tmux")
            .args(["capture-pane", "-p", "-e", "-t", pane_id])
            .output()
            .map_err(|e| CaptureError::Failed {
                session_id: pane_id.to_string(),
                message: format!("failed to execute tmux capture-pane: {}", e),
            })?;

        check_capture(pane_id, output)
    }
}

fn check_capture(pane_id: &str, output: Output) -> Result<String, CaptureError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_gone_message(&stderr) {
        Err(CaptureError::SessionGone(pane_id.to_string()))
    } else {
        Err(CaptureError::Failed {
            session_id: pane_id.to_string(),
            message: stderr.trim().to_string(),
        })
    }
}

impl SessionSource for TmuxClient {
    fn list_active_sessions(&self) -> Result<Vec<DiscoveredSession>> {
        let sessions = self
            .list_panes()?
            .into_iter()
            .filter(|pane| !self.attached_only || pane.attached)
            .map(|pane| DiscoveredSession {
                agent_type: self.resolver.resolve(&pane),
                id: pane.pane_id,
                cwd: pane.cwd,
            })
            .collect();
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<String, CaptureError> {
        let raw = self.capture_pane_raw(session_id)?;
        Ok(render_plain(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pane_id() {
        assert!(validate_pane_id("%0").is_ok());
        assert!(validate_pane_id("%123").is_ok());
        assert!(validate_pane_id("main:0.1").is_err());
        assert!(validate_pane_id("%1; rm -rf /").is_err());
        assert!(validate_pane_id("").is_err());
    }

    #[test]
    fn test_gone_messages() {
        assert!(is_gone_message("can't find pane: %99"));
        assert!(is_gone_message("no server running on /tmp/tmux-1000/default"));
        assert!(is_gone_message("error connecting to /tmp/tmux-1000/default (No such file or directory)"));
        assert!(!is_gone_message("unknown option -- z"));
    }

    #[test]
    fn test_no_server_is_not_pane_gone() {
        assert!(is_no_server_message("no server running on /tmp/tmux-0/default"));
        assert!(!is_no_server_message("can't find pane: %3"));
    }
}
