//! End-to-end watcher scenarios driven by a scripted session source.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ptywatch_core::agents::{AgentState, Session, SessionState, Verdict};
use ptywatch_core::detectors::{Classifier, ClassifierPack, PackRegistry, PatternClassifier};
use ptywatch_core::error::CaptureError;
use ptywatch_core::events::{NotificationSink, Notifier, TransitionEvent};
use ptywatch_core::monitor::{
    MonitorContext, MonitorSignal, PollOutcome, Scheduler, SessionMonitor,
};
use ptywatch_core::state::StatusStore;
use ptywatch_core::tmux::{DiscoveredSession, SessionSource};
use ptywatch_core::Settings;
use tokio::sync::watch;

struct Scripted {
    agent_type: String,
    frames: VecDeque<String>,
    last: String,
    alive: bool,
}

/// Sessions whose captures replay a fixed list of frames, then repeat the last
#[derive(Default)]
struct ScriptedSource {
    sessions: Mutex<HashMap<String, Scripted>>,
    listing_fails: AtomicBool,
}

impl ScriptedSource {
    fn add(&self, id: &str, agent_type: &str, frames: &[&str]) {
        self.sessions.lock().insert(
            id.to_string(),
            Scripted {
                agent_type: agent_type.to_string(),
                frames: frames.iter().map(|f| f.to_string()).collect(),
                last: String::new(),
                alive: true,
            },
        );
    }

    fn kill(&self, id: &str) {
        if let Some(s) = self.sessions.lock().get_mut(id) {
            s.alive = false;
        }
    }
}

impl SessionSource for ScriptedSource {
    fn list_active_sessions(&self) -> anyhow::Result<Vec<DiscoveredSession>> {
        if self.listing_fails.load(Ordering::SeqCst) {
            anyhow::bail!("tmux list-panes failed: server busy");
        }
        let mut sessions: Vec<DiscoveredSession> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(id, s)| DiscoveredSession {
                id: id.clone(),
                agent_type: s.agent_type.clone(),
                cwd: "/work".to_string(),
            })
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<String, CaptureError> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(s) if s.alive => {
                if let Some(frame) = s.frames.pop_front() {
                    s.last = frame;
                }
                Ok(s.last.clone())
            }
            _ => Err(CaptureError::SessionGone(session_id.to_string())),
        }
    }
}

/// Pattern classifier that counts calls
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Classifier for Counting {
    async fn classify(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PatternClassifier::new().classify_sync(snapshot, pack)
    }
}

/// Never answers for the `slow` pack; pattern matching for everything else
#[derive(Default)]
struct Hanging {
    started: AtomicBool,
}

impl Classifier for Hanging {
    async fn classify(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        if pack.name == "slow" {
            self.started.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        PatternClassifier::new().classify_sync(snapshot, pack)
    }
}

#[derive(Default)]
struct Recording(Mutex<Vec<TransitionEvent>>);

impl NotificationSink for Recording {
    fn notify(&self, event: &TransitionEvent) {
        self.0.lock().push(event.clone());
    }
}

fn packs(dir: &Path) -> Arc<PackRegistry> {
    std::fs::write(
        dir.join("prompt.yaml"),
        "ready_patterns: ['\\$\\s*\\z']\nbusy_patterns: []\nerror_patterns: []\nneeds_confirmation_patterns: []\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("confirm.yaml"),
        "needs_confirmation_patterns: ['Allow network access\\? \\(y/N\\)']\n",
    )
    .unwrap();
    std::fs::write(dir.join("slow.yaml"), "ready_patterns: ['\\$\\s*\\z']\n").unwrap();

    let (registry, errors) = PackRegistry::load(Some(dir));
    assert!(errors.is_empty(), "{:?}", errors);
    Arc::new(registry)
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.poll_interval_ms = 10;
    settings.discovery_interval_ms = 10;
    settings.stability_threshold = 3;
    settings.removal_grace_passes = 2;
    settings.store.write_backoff_ms = 1;
    settings
}

struct Harness<C> {
    source: Arc<ScriptedSource>,
    classifier: Arc<C>,
    store: Arc<StatusStore>,
    sink: Arc<Recording>,
    ctx: Option<MonitorContext<ScriptedSource, C>>,
    _dir: tempfile::TempDir,
}

fn harness<C: Classifier + Default + 'static>(settings: &Settings) -> Harness<C> {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource::default());
    let classifier = Arc::new(C::default());
    let store = Arc::new(StatusStore::open(&dir.path().join("status.db")).unwrap());
    let sink = Arc::new(Recording::default());
    let ctx = MonitorContext::new(
        settings,
        Arc::clone(&source),
        Arc::clone(&classifier),
        packs(dir.path()),
        Arc::clone(&store),
        Notifier::new().with_sink(sink.clone() as Arc<dyn NotificationSink>),
    );
    Harness {
        source,
        classifier,
        store,
        sink,
        ctx: Some(ctx),
        _dir: dir,
    }
}

impl<C: Classifier + 'static> Harness<C> {
    fn monitor(&mut self, id: &str, agent_type: &str) -> SessionMonitor<ScriptedSource, C> {
        let session = Session::new(id, agent_type, "/work");
        let record = self.store.register_session(&session).unwrap();
        let ctx = Arc::new(self.ctx.take().expect("context already used"));
        SessionMonitor::new(ctx, session, record)
    }

    fn scheduler(&mut self, settings: &Settings) -> Scheduler<ScriptedSource, C> {
        Scheduler::new(settings, self.ctx.take().expect("context already used"))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_shell_prompt_becomes_ready() {
    let mut h = harness::<Counting>(&settings());
    h.source.add("%1", "prompt", &["user@host:~$ "]);
    let mut monitor = h.monitor("%1", "prompt");
    let (_tx, mut rx) = watch::channel(MonitorSignal::Run);

    // first sight plus three unchanged polls
    for _ in 0..4 {
        assert_eq!(monitor.poll_once(&mut rx).await, PollOutcome::Continue);
    }

    let record = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ready);
    assert_eq!(record.stable_count, 3);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_changing_output_stays_busy_without_classification() {
    let mut h = harness::<Counting>(&settings());
    h.source
        .add("%1", "prompt", &["45% complete", "46% complete", "47% complete"]);
    let mut monitor = h.monitor("%1", "prompt");
    let (_tx, mut rx) = watch::channel(MonitorSignal::Run);

    for _ in 0..3 {
        monitor.poll_once(&mut rx).await;
    }

    let record = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(record.state, SessionState::Busy);
    assert_eq!(record.stable_count, 0);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_confirmation_prompt_emits_one_history_entry_and_notification() {
    let mut h = harness::<Counting>(&settings());
    h.source.add("%1", "confirm", &["Allow network access? (y/N)"]);
    let mut monitor = h.monitor("%1", "confirm");
    let (_tx, mut rx) = watch::channel(MonitorSignal::Run);

    for _ in 0..8 {
        monitor.poll_once(&mut rx).await;
    }

    let record = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(record.state, SessionState::NeedsConfirmation);
    assert_eq!(
        record.actions,
        vec!["Answer the confirmation prompt in the session".to_string()]
    );

    let history = h.store.tail_history("%1", 50).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, SessionState::NeedsConfirmation);

    let events = h.sink.0.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_state, SessionState::Untracked);
    assert_eq!(events[0].new_state, SessionState::NeedsConfirmation);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_agent_type_uses_generic_pack() {
    let mut h = harness::<Counting>(&settings());
    h.source.add("%1", "mystery-agent", &["> "]);
    let mut monitor = h.monitor("%1", "mystery-agent");
    let (_tx, mut rx) = watch::channel(MonitorSignal::Run);

    for _ in 0..4 {
        monitor.poll_once(&mut rx).await;
    }

    let record = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ready);
}

#[tokio::test]
async fn test_session_disappearing_mid_classification_discards_verdict() {
    let mut s = settings();
    s.stability_threshold = 1;
    let mut h = harness::<Hanging>(&s);
    h.source.add("%1", "slow", &["user@host:~$"]);
    let mut scheduler = h.scheduler(&s);

    let report = scheduler.discover_once().await.unwrap();
    assert_eq!(report.added, vec!["%1".to_string()]);

    let classifier = Arc::clone(&h.classifier);
    wait_until(|| classifier.started.load(Ordering::SeqCst)).await;

    h.source.kill("%1");
    let first = scheduler.discover_once().await.unwrap();
    assert!(first.removed.is_empty(), "removal needs two missing passes");
    let second = scheduler.discover_once().await.unwrap();
    assert_eq!(second.removed, vec!["%1".to_string()]);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !scheduler.active_sessions().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            scheduler.discover_once().await.unwrap();
        }
    })
    .await
    .expect("monitor did not stop");

    assert!(h.store.get_status("%1").unwrap().is_none());
    let history = h.store.tail_history("%1", 50).unwrap();
    assert!(history
        .iter()
        .all(|e| e.state == SessionState::Removed || e.state == SessionState::Busy));
    assert_eq!(history.last().unwrap().state, SessionState::Removed);
}

#[tokio::test]
async fn test_slow_classification_does_not_delay_other_sessions() {
    let mut s = settings();
    s.stability_threshold = 1;
    let mut h = harness::<Hanging>(&s);
    h.source.add("%1", "slow", &["user@host:~$"]);
    h.source.add("%2", "prompt", &["user@host:~$"]);
    let mut scheduler = h.scheduler(&s);
    scheduler.discover_once().await.unwrap();

    let store = Arc::clone(&h.store);
    wait_until(|| {
        store
            .get_status("%2")
            .ok()
            .flatten()
            .is_some_and(|r| r.state == SessionState::Ready)
    })
    .await;

    let classifier = Arc::clone(&h.classifier);
    wait_until(|| classifier.started.load(Ordering::SeqCst)).await;
    let slow = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(slow.state, SessionState::Untracked);

    scheduler.shutdown().await;
    // shutdown does not mark sessions removed
    assert_eq!(
        h.store.get_status("%2").unwrap().unwrap().state,
        SessionState::Ready
    );
}

#[tokio::test]
async fn test_listing_failure_is_not_absence() {
    let s = settings();
    let mut h = harness::<Counting>(&s);
    h.source.add("%1", "prompt", &["user@host:~$"]);
    let mut scheduler = h.scheduler(&s);
    scheduler.discover_once().await.unwrap();

    h.source.listing_fails.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        assert!(scheduler.discover_once().await.is_err());
    }
    h.source.listing_fails.store(false, Ordering::SeqCst);
    let report = scheduler.discover_once().await.unwrap();

    assert!(report.removed.is_empty());
    assert_eq!(scheduler.active_sessions(), vec!["%1".to_string()]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_startup_cleanup_removes_orphans() {
    let s = settings();
    let mut h = harness::<Counting>(&s);
    h.store
        .register_session(&Session::new("%9", "prompt", "/old"))
        .unwrap();
    h.store
        .register_session(&Session::new("%1", "prompt", "/work"))
        .unwrap();
    h.source.add("%1", "prompt", &["user@host:~$"]);
    let scheduler = h.scheduler(&s);

    let orphans = scheduler.startup_cleanup().await.unwrap();
    assert_eq!(orphans, vec!["%9".to_string()]);
    assert!(h.store.get_status("%9").unwrap().is_none());
    assert!(h.store.get_status("%1").unwrap().is_some());
    let history = h.store.tail_history("%9", 5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, SessionState::Removed);
}

#[tokio::test]
async fn test_classifier_unavailable_is_visible_error() {
    #[derive(Default)]
    struct Down;

    impl Classifier for Down {
        async fn classify(&self, _snapshot: &str, _pack: &ClassifierPack) -> Verdict {
            Verdict::unavailable()
        }
    }

    let mut h = harness::<Down>(&settings());
    h.source.add("%1", "prompt", &["user@host:~$"]);
    let mut monitor = h.monitor("%1", "prompt");
    let (_tx, mut rx) = watch::channel(MonitorSignal::Run);
    for _ in 0..4 {
        monitor.poll_once(&mut rx).await;
    }

    let record = h.store.get_status("%1").unwrap().unwrap();
    assert_eq!(record.state, SessionState::Error);
    assert_eq!(record.summary, "classifier unavailable");
    assert_eq!(
        Verdict::unavailable().state,
        AgentState::Error,
        "unavailable verdict is an error"
    );
}
