//! Core library for ptywatch.
//!
//! Watches a fleet of terminal sessions (tmux panes) hosting command-line
//! agents and decides, per session, whether it is ready for input, busy,
//! waiting on a human confirmation, or in error. The pipeline per session is:
//!
//! snapshot source -> stability tracker -> classifier -> state machine ->
//! status store -> notification sinks.

pub mod agents;
pub mod audit;
pub mod config;
pub mod detectors;
pub mod error;
pub mod events;
pub mod monitor;
pub mod state;
pub mod tmux;

pub use agents::{AgentState, Session, SessionState, Verdict};
pub use config::Settings;
pub use detectors::{ClassifierDispatcher, ClassifierPack, PackRegistry};
pub use events::{EventBus, NotificationSink, Notifier, TransitionEvent};
pub use monitor::{Scheduler, SessionMachine, StabilityTracker};
pub use state::{StatusHistoryEntry, StatusRecord, StatusStore};
pub use tmux::{SessionSource, TmuxClient};
