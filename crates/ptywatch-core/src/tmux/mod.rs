mod client;
mod pane;
pub mod render;

pub use client::TmuxClient;
pub use pane::{AgentTypeResolver, PaneInfo, PANE_FORMAT};

use crate::error::CaptureError;

/// A terminal session reported by the multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSession {
    pub id: String,
    pub agent_type: String,
    pub cwd: String,
}

/// Where sessions and their visible buffers come from
///
/// Implemented by [`TmuxClient`]; tests substitute scripted sources. Both
/// calls are blocking and are driven from `spawn_blocking` by the watcher.
pub trait SessionSource: Send + Sync + 'static {
    /// Enumerate the sessions that currently exist
    fn list_active_sessions(&self) -> anyhow::Result<Vec<DiscoveredSession>>;

    /// Plain text of the session's visible buffer, or `SessionGone`
    fn capture(&self, session_id: &str) -> Result<String, CaptureError>;
}
