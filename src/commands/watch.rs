use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use ptywatch_core::audit::AuditLogger;
use ptywatch_core::monitor::MonitorContext;
use ptywatch_core::{
    ClassifierDispatcher, EventBus, NotificationSink, Notifier, PackRegistry, Scheduler, Settings,
    StatusStore, TmuxClient,
};

/// Run the watcher until Ctrl-C
pub async fn run(settings: Settings) -> Result<()> {
    let source = Arc::new(TmuxClient::new(&settings));
    if !source.is_available() {
        bail!("tmux is not available; ptywatch watches tmux panes");
    }

    let (packs, errors) = PackRegistry::load(settings.classifier.packs_dir.as_deref());
    if !errors.is_empty() {
        tracing::warn!(errors = errors.len(), "Some classifier packs failed to load");
    }
    let packs = Arc::new(packs);

    let store = StatusStore::open(&settings.store.path).with_context(|| {
        format!("Failed to open status store: {:?}", settings.store.path)
    })?;
    let store = Arc::new(store);

    let classifier = Arc::new(ClassifierDispatcher::from_settings(&settings.classifier));

    let bus = Arc::new(EventBus::new());
    let mut notifier = Notifier::new().with_sink(Arc::clone(&bus) as Arc<dyn NotificationSink>);
    if let Some(audit) = AuditLogger::from_settings(&settings.audit) {
        tracing::info!(path = %audit.path().display(), "Audit log enabled");
        notifier = notifier.with_sink(Arc::new(audit));
    }
    spawn_transition_logger(&bus);
    spawn_pack_reloader(Arc::clone(&packs));

    tracing::info!(
        classifier = %classifier.describe(),
        store = %settings.store.path.display(),
        poll_interval_ms = settings.poll_interval_ms,
        stability_threshold = settings.stability_threshold,
        "Watching sessions"
    );

    let ctx = MonitorContext::new(&settings, source, classifier, packs, store, notifier);
    Scheduler::new(&settings, ctx).run(shutdown_signal()).await;

    tracing::info!("Watcher stopped");
    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Log every state change at info level
fn spawn_transition_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    session_id = %event.session_id,
                    agent_type = %event.agent_type,
                    from = %event.old_state,
                    to = %event.new_state,
                    summary = %event.summary,
                    "State changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Transition logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Reload classifier packs on SIGHUP
#[cfg(unix)]
fn spawn_pack_reloader(packs: Arc<PackRegistry>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Pack reload on SIGHUP unavailable");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading classifier packs");
            let packs = Arc::clone(&packs);
            match tokio::task::spawn_blocking(move || packs.reload()).await {
                Ok(errors) if !errors.is_empty() => {
                    tracing::warn!(errors = errors.len(), "Some classifier packs failed to reload");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Pack reload task failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_pack_reloader(_packs: Arc<PackRegistry>) {}
