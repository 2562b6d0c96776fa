use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::machine::{Outcome, SessionMachine};
use super::stability::{Snapshot, StabilityTracker};
use crate::agents::{Session, Verdict};
use crate::config::Settings;
use crate::detectors::{Classifier, PackRegistry};
use crate::error::CaptureError;
use crate::events::Notifier;
use crate::state::{StatusHistoryEntry, StatusRecord, StatusStore};
use crate::tmux::SessionSource;

/// Lifecycle signal sent by the scheduler to a session monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    Run,
    /// The session disappeared: record REMOVED and stop
    Remove,
    /// The watcher is exiting: stop without touching the record
    Shutdown,
}

/// Everything the monitors share
pub struct MonitorContext<S, C> {
    pub source: Arc<S>,
    pub classifier: Arc<C>,
    pub packs: Arc<PackRegistry>,
    pub store: Arc<StatusStore>,
    pub notifier: Notifier,
    pub poll_interval: Duration,
    pub stability_threshold: u32,
    pub write_attempts: u32,
    pub write_backoff: Duration,
}

impl<S, C> MonitorContext<S, C> {
    pub fn new(
        settings: &Settings,
        source: Arc<S>,
        classifier: Arc<C>,
        packs: Arc<PackRegistry>,
        store: Arc<StatusStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            source,
            classifier,
            packs,
            store,
            notifier,
            poll_interval: settings.poll_interval(),
            stability_threshold: settings.stability_threshold,
            write_attempts: settings.store.write_attempts.max(1),
            write_backoff: Duration::from_millis(settings.store.write_backoff_ms),
        }
    }
}

/// How a single poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    /// The session is gone and REMOVED has been recorded
    Gone,
    /// A stop signal arrived while classifying; the verdict was dropped
    Interrupted,
}

/// Monitoring task of one session
///
/// Polls are strictly sequential: a new capture only starts after the
/// previous poll, classification included, has finished.
pub struct SessionMonitor<S, C> {
    ctx: Arc<MonitorContext<S, C>>,
    machine: SessionMachine,
    tracker: StabilityTracker,
    /// History entries not yet persisted
    pending_history: Vec<StatusHistoryEntry>,
}

impl<S, C> SessionMonitor<S, C>
where
    S: SessionSource,
    C: Classifier + 'static,
{
    pub fn new(ctx: Arc<MonitorContext<S, C>>, session: Session, record: StatusRecord) -> Self {
        let tracker = StabilityTracker::new(ctx.stability_threshold);
        Self {
            ctx,
            machine: SessionMachine::new(session, record),
            tracker,
            pending_history: Vec::new(),
        }
    }

    pub fn record(&self) -> &StatusRecord {
        self.machine.record()
    }

    pub fn pending_history(&self) -> &[StatusHistoryEntry] {
        &self.pending_history
    }

    /// Poll at the configured cadence until removed or shut down
    pub async fn run(mut self, mut signal: watch::Receiver<MonitorSignal>) {
        let mut ticker = tokio::time::interval(self.ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let session_id = self.machine.session().id.clone();
        tracing::debug!(session_id = %session_id, "Session monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll_once(&mut signal).await == PollOutcome::Gone {
                        break;
                    }
                }
                changed = signal.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let current = *signal.borrow();
            match current {
                MonitorSignal::Run => {}
                MonitorSignal::Remove => {
                    self.finish_removed().await;
                    break;
                }
                MonitorSignal::Shutdown => break,
            }
        }

        tracing::debug!(session_id = %session_id, "Session monitor stopped");
    }

    /// Capture, track stability, classify when settled, persist
    pub async fn poll_once(&mut self, signal: &mut watch::Receiver<MonitorSignal>) -> PollOutcome {
        let session_id = self.machine.session().id.clone();

        let source = Arc::clone(&self.ctx.source);
        let id = session_id.clone();
        let captured = match tokio::task::spawn_blocking(move || source.capture(&id)).await {
            Ok(captured) => captured,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Capture task failed");
                return PollOutcome::Continue;
            }
        };

        let text = match captured {
            Ok(text) => text,
            Err(CaptureError::SessionGone(_)) => {
                tracing::info!(session_id = %session_id, "Session gone");
                self.finish_removed().await;
                return PollOutcome::Gone;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Capture failed, skipping poll");
                return PollOutcome::Continue;
            }
        };

        let now = Utc::now();
        let snapshot = Snapshot::new(text);
        let pack = self.ctx.packs.get(&self.machine.session().agent_type);
        self.tracker
            .set_threshold(pack.stability_threshold(self.ctx.stability_threshold));
        let observation = self.tracker.observe(&snapshot);
        self.machine
            .note_poll(&snapshot.hash, self.tracker.count(), now);

        let outcome = if observation.changed && observation.had_previous {
            self.machine.apply(&Verdict::output_changing(), now)
        } else if observation.stable {
            tracing::debug!(session_id = %session_id, pack = %pack.name, "Output settled, classifying");
            let verdict = tokio::select! {
                verdict = self.ctx.classifier.classify(&snapshot.text, &pack) => Some(verdict),
                _ = stop_requested(signal) => None,
            };
            match verdict {
                Some(verdict) => self.machine.apply(&verdict, Utc::now()),
                None => {
                    tracing::debug!(session_id = %session_id, "Discarding in-flight classification");
                    return PollOutcome::Interrupted;
                }
            }
        } else {
            Outcome::Unchanged
        };

        self.commit(outcome).await;
        PollOutcome::Continue
    }

    /// Record REMOVED for a session that disappeared
    async fn finish_removed(&mut self) {
        let outcome = self.machine.remove(Utc::now());
        self.commit(outcome).await;
    }

    /// Queue history, notify sinks and persist the record
    async fn commit(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Discarded => return,
            Outcome::Unchanged => {}
            Outcome::Changed { history, event } => {
                self.pending_history.push(history);
                if let Some(event) = event {
                    self.ctx.notifier.notify(&event);
                }
            }
        }
        self.persist().await;
    }

    /// Write the record and pending history, retrying with backoff
    ///
    /// On persistent failure the history stays queued for the next poll.
    async fn persist(&mut self) {
        let attempts = self.ctx.write_attempts.max(1);
        let mut backoff = self.ctx.write_backoff;

        for attempt in 1..=attempts {
            let store = Arc::clone(&self.ctx.store);
            let record = self.machine.record().clone();
            let history = self.pending_history.clone();
            let result =
                tokio::task::spawn_blocking(move || store.save(&record, &history)).await;

            match result {
                Ok(Ok(())) => {
                    self.pending_history.clear();
                    return;
                }
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %self.machine.session().id, attempt, error = %e, "Status store write failed");
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.machine.session().id, attempt, error = %e, "Status store task failed");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        tracing::error!(
            session_id = %self.machine.session().id,
            pending = self.pending_history.len(),
            "Giving up on status write until next poll"
        );
    }
}

/// Resolves once the scheduler asks the monitor to stop
async fn stop_requested(signal: &mut watch::Receiver<MonitorSignal>) {
    loop {
        if *signal.borrow_and_update() != MonitorSignal::Run {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
