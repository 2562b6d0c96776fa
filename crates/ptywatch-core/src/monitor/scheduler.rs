use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::session::{MonitorContext, MonitorSignal, SessionMonitor};
use crate::agents::Session;
use crate::config::Settings;
use crate::detectors::Classifier;
use crate::state::StatusRecord;
use crate::tmux::{DiscoveredSession, SessionSource};

/// How long shutdown waits for monitors to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct MonitorHandle {
    signal: watch::Sender<MonitorSignal>,
    task: JoinHandle<()>,
    /// Consecutive discovery passes the session was not listed
    missing_passes: u32,
    removing: bool,
}

/// Result of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub active: usize,
}

/// Discovers sessions and runs one monitoring task per live session
pub struct Scheduler<S, C> {
    ctx: Arc<MonitorContext<S, C>>,
    removal_grace_passes: u32,
    discovery_interval: Duration,
    monitors: HashMap<String, MonitorHandle>,
}

impl<S, C> Scheduler<S, C>
where
    S: SessionSource,
    C: Classifier + 'static,
{
    pub fn new(settings: &Settings, ctx: MonitorContext<S, C>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            removal_grace_passes: settings.removal_grace_passes.max(1),
            discovery_interval: settings.discovery_interval(),
            monitors: HashMap::new(),
        }
    }

    /// Ids of sessions with a monitoring task
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn list_sessions(&self) -> Result<Vec<DiscoveredSession>> {
        let source = Arc::clone(&self.ctx.source);
        tokio::task::spawn_blocking(move || source.list_active_sessions())
            .await
            .context("Session listing task failed")?
    }

    /// Mark persisted records whose session no longer exists as REMOVED
    ///
    /// Skipped when sessions cannot be listed, so a transient failure never
    /// wipes the store.
    pub async fn startup_cleanup(&self) -> Result<Vec<String>> {
        let live: HashSet<String> = self
            .list_sessions()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let store = Arc::clone(&self.ctx.store);
        let orphans = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let now = Utc::now();
            let mut orphans = Vec::new();
            for id in store.tracked_ids()? {
                if !live.contains(&id) {
                    store.remove_orphan(&id, now)?;
                    orphans.push(id);
                }
            }
            Ok(orphans)
        })
        .await
        .context("Startup cleanup task failed")??;

        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "Removed orphaned status records");
        }
        Ok(orphans)
    }

    /// One discovery pass: start new monitors, retire vanished sessions, GC
    pub async fn discover_once(&mut self) -> Result<DiscoveryReport> {
        self.reap_finished();

        let live = self.list_sessions().await?;
        let live_ids: HashSet<&str> = live.iter().map(|s| s.id.as_str()).collect();
        let mut report = DiscoveryReport::default();

        for (id, handle) in self.monitors.iter_mut() {
            if live_ids.contains(id.as_str()) {
                handle.missing_passes = 0;
                continue;
            }
            handle.missing_passes += 1;
            if handle.missing_passes >= self.removal_grace_passes && !handle.removing {
                tracing::info!(session_id = %id, "Session disappeared");
                handle.removing = true;
                let _ = handle.signal.send(MonitorSignal::Remove);
                report.removed.push(id.clone());
            }
        }

        for discovered in live {
            if !self.monitors.contains_key(&discovered.id) {
                report.added.push(discovered.id.clone());
                self.spawn_monitor(discovered).await;
            }
        }

        let store = Arc::clone(&self.ctx.store);
        match tokio::task::spawn_blocking(move || store.purge_removed()).await {
            Ok(Ok(purged)) if purged > 0 => tracing::debug!(purged, "Purged removed status records"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to purge removed status records"),
            Err(e) => tracing::warn!(error = %e, "Purge task failed"),
        }

        report.added.sort();
        report.removed.sort();
        report.active = self.monitors.len();
        Ok(report)
    }

    async fn spawn_monitor(&mut self, discovered: DiscoveredSession) {
        let session = Session::new(discovered.id, discovered.agent_type, discovered.cwd);
        let store = Arc::clone(&self.ctx.store);
        let registering = session.clone();
        let registered =
            tokio::task::spawn_blocking(move || store.register_session(&registering)).await;
        let record = match registered {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session.id, error = %e, "Failed to register session, continuing in memory");
                StatusRecord::untracked(&session, session.created_at)
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Registration task failed, continuing in memory");
                StatusRecord::untracked(&session, session.created_at)
            }
        };

        tracing::info!(session_id = %session.id, agent_type = %session.agent_type, cwd = %session.cwd, "Tracking session");
        let (tx, rx) = watch::channel(MonitorSignal::Run);
        let id = session.id.clone();
        let monitor = SessionMonitor::new(Arc::clone(&self.ctx), session, record);
        let task = tokio::spawn(monitor.run(rx));

        self.monitors.insert(
            id,
            MonitorHandle {
                signal: tx,
                task,
                missing_passes: 0,
                removing: false,
            },
        );
    }

    /// Forget monitors whose task has ended
    fn reap_finished(&mut self) {
        self.monitors.retain(|id, handle| {
            let finished = handle.task.is_finished();
            if finished {
                tracing::debug!(session_id = %id, "Monitor finished");
            }
            !finished
        });
    }

    /// Run discovery until `shutdown` resolves, then stop every monitor
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        if let Err(e) = self.startup_cleanup().await {
            tracing::warn!(error = %e, "Startup cleanup skipped");
        }

        let mut ticker = tokio::time::interval(self.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.discover_once().await {
                        Ok(report) => {
                            if !report.added.is_empty() || !report.removed.is_empty() {
                                tracing::info!(
                                    added = report.added.len(),
                                    removed = report.removed.len(),
                                    active = report.active,
                                    "Discovery pass"
                                );
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Session discovery failed"),
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await;
    }

    /// Stop all monitors without marking their sessions REMOVED
    pub async fn shutdown(self) {
        tracing::info!(sessions = self.monitors.len(), "Stopping session monitors");
        for handle in self.monitors.values() {
            let _ = handle.signal.send(MonitorSignal::Shutdown);
        }
        for (id, handle) in self.monitors {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(session_id = %id, error = %e, "Monitor task panicked"),
                Err(_) => tracing::warn!(session_id = %id, "Monitor did not stop in time"),
            }
        }
    }
}
