use chrono::{DateTime, Utc};

use crate::agents::{Session, SessionState, Verdict};
use crate::events::TransitionEvent;
use crate::state::{StatusHistoryEntry, StatusRecord};

/// Summary recorded when a session disappears
pub const REMOVED_SUMMARY: &str = "Session no longer exists";

/// What applying a verdict did to the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The session is REMOVED; nothing was applied
    Discarded,
    /// Same state and summary; only bookkeeping fields changed
    Unchanged,
    /// State or summary changed; `event` is set only when the state changed
    Changed {
        history: StatusHistoryEntry,
        event: Option<TransitionEvent>,
    },
}

/// Authoritative state of one session
///
/// Owned by the session's monitoring task, which is the only writer of the
/// underlying [`StatusRecord`].
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    record: StatusRecord,
}

impl SessionMachine {
    pub fn new(session: Session, record: StatusRecord) -> Self {
        Self { session, record }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn record(&self) -> &StatusRecord {
        &self.record
    }

    pub fn state(&self) -> SessionState {
        self.record.state
    }

    pub fn is_removed(&self) -> bool {
        self.record.state == SessionState::Removed
    }

    /// Poll bookkeeping: snapshot hash, stability counter and poll time
    pub fn note_poll(&mut self, hash: &str, stable_count: u32, now: DateTime<Utc>) {
        if self.is_removed() {
            return;
        }
        self.record.last_snapshot_hash = Some(hash.to_string());
        self.record.stable_count = stable_count;
        self.record.last_polled_at = Some(now);
    }

    /// Fold a verdict into the record
    ///
    /// Every transition is allowed except out of REMOVED.
    pub fn apply(&mut self, verdict: &Verdict, now: DateTime<Utc>) -> Outcome {
        if self.is_removed() {
            return Outcome::Discarded;
        }
        self.record.actions = verdict.actions.clone();
        self.transition(verdict.state.into(), &verdict.summary, now)
    }

    /// Move to the terminal REMOVED state
    pub fn remove(&mut self, now: DateTime<Utc>) -> Outcome {
        if self.is_removed() {
            return Outcome::Discarded;
        }
        self.record.actions.clear();
        self.transition(SessionState::Removed, REMOVED_SUMMARY, now)
    }

    fn transition(&mut self, new_state: SessionState, summary: &str, now: DateTime<Utc>) -> Outcome {
        let old_state = self.record.state;
        if old_state == new_state && self.record.summary == summary {
            return Outcome::Unchanged;
        }

        self.record.state = new_state;
        self.record.summary = summary.to_string();
        self.record.last_change_at = now;

        let history = StatusHistoryEntry {
            session_id: self.session.id.clone(),
            ts: now,
            state: new_state,
            summary: summary.to_string(),
        };
        let event = (old_state != new_state).then(|| TransitionEvent {
            session_id: self.session.id.clone(),
            agent_type: self.session.agent_type.clone(),
            old_state,
            new_state,
            summary: summary.to_string(),
            actions: self.record.actions.clone(),
            ts: now,
        });

        tracing::debug!(
            session_id = %self.session.id,
            from = %old_state,
            to = %new_state,
            summary,
            "Session state updated"
        );
        Outcome::Changed { history, event }
    }
}
