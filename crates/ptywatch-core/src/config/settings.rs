use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings (from config file, environment and CLI)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-session poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Session discovery interval in milliseconds
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_ms: u64,

    /// Consecutive unchanged polls before a snapshot is classified
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: u32,

    /// Consecutive discovery passes a session may be missing before removal
    #[serde(default = "default_removal_grace_passes")]
    pub removal_grace_passes: u32,

    /// Only watch panes from attached tmux sessions
    #[serde(default)]
    pub attached_only: bool,

    /// Custom agent type patterns
    #[serde(default)]
    pub agent_patterns: Vec<AgentPattern>,

    /// Classifier settings
    #[serde(default)]
    pub classifier: ClassifierSettings,

    /// Status store settings
    #[serde(default)]
    pub store: StoreSettings,

    /// Transition audit log settings
    #[serde(default)]
    pub audit: AuditSettings,
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_discovery_interval() -> u64 {
    5000
}

fn default_stability_threshold() -> u32 {
    3
}

fn default_removal_grace_passes() -> u32 {
    2
}

/// Custom agent type pattern
///
/// Matched against the pane's current command and title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPattern {
    /// Pattern to match (regex)
    pub pattern: String,
    /// Agent type (classifier pack name)
    pub agent_type: String,
}

/// How verdicts are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Remote when an API key is available, pattern matching otherwise
    #[default]
    Auto,
    /// Always the remote language model
    Remote,
    /// Always the deterministic pattern matcher
    Pattern,
}

impl std::str::FromStr for ClassifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ClassifierMode::Auto),
            "remote" | "llm" => Ok(ClassifierMode::Remote),
            "pattern" | "regex" => Ok(ClassifierMode::Pattern),
            _ => Err(format!(
                "Invalid classifier mode: '{}'. Use 'auto', 'remote' or 'pattern'.",
                s
            )),
        }
    }
}

/// Classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default)]
    pub mode: ClassifierMode,

    /// Chat completions endpoint (OpenRouter compatible)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier sent to the endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (prefer `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for each request in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per classification before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt, doubled for each further attempt
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Directory with `<agent_type>.yaml` pack files
    #[serde(default)]
    pub packs_dir: Option<PathBuf>,

    /// Tail of the snapshot sent to the model
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: usize,
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "openrouter/auto".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8000
}

fn default_max_snapshot_bytes() -> usize {
    6000
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            packs_dir: None,
            max_snapshot_bytes: default_max_snapshot_bytes(),
        }
    }
}

impl ClassifierSettings {
    /// Resolve the API key from settings or the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Status store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Attempts per store write before the poll gives up
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Backoff between write attempts in milliseconds (doubled each retry)
    #[serde(default = "default_write_backoff")]
    pub write_backoff_ms: u64,
}

/// Base directory for ptywatch data files
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir)
        .join("ptywatch")
}

fn default_store_path() -> PathBuf {
    data_dir().join("status.db")
}

fn default_write_attempts() -> u32 {
    3
}

fn default_write_backoff() -> u64 {
    100
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            write_attempts: default_write_attempts(),
            write_backoff_ms: default_write_backoff(),
        }
    }
}

/// Transition audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Enable audit logging
    #[serde(default)]
    pub enabled: bool,

    /// NDJSON file path
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,

    /// Maximum log file size in bytes before rotation
    #[serde(default = "default_audit_max_size")]
    pub max_size_bytes: u64,
}

fn default_audit_path() -> PathBuf {
    data_dir().join("transitions.ndjson")
}

/// Default audit max size (10MB)
fn default_audit_max_size() -> u64 {
    10_485_760
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_audit_path(),
            max_size_bytes: default_audit_max_size(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            discovery_interval_ms: default_discovery_interval(),
            stability_threshold: default_stability_threshold(),
            removal_grace_passes: default_removal_grace_passes(),
            attached_only: false,
            agent_patterns: Vec::new(),
            classifier: ClassifierSettings::default(),
            store: StoreSettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Explicit path first
        if let Some(p) = path {
            return Self::load_file(p);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("ptywatch/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/ptywatch/config.toml")),
            dirs::home_dir().map(|p| p.join(".ptywatch.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply `PTYWATCH_*` environment overrides
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "Ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(v) = parsed("PTYWATCH_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Some(v) = parsed("PTYWATCH_DISCOVERY_INTERVAL_MS") {
            self.discovery_interval_ms = v;
        }
        if let Some(v) = parsed("PTYWATCH_STABILITY_THRESHOLD") {
            self.stability_threshold = v;
        }
        if let Ok(path) = std::env::var("PTYWATCH_STATUS_DB") {
            if !path.trim().is_empty() {
                self.store.path = PathBuf::from(path);
            }
        }
        if let Some(mode) = parsed("PTYWATCH_CLASSIFIER_MODE") {
            self.classifier.mode = mode;
        }
        if let Ok(model) =
            std::env::var("PTYWATCH_MODEL").or_else(|_| std::env::var("OPENROUTER_MODEL"))
        {
            if !model.trim().is_empty() {
                self.classifier.model = model;
            }
        }
        if let Ok(dir) = std::env::var("PTYWATCH_PACKS_DIR") {
            if !dir.trim().is_empty() {
                self.classifier.packs_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Validate and normalize settings values
    ///
    /// Intervals, thresholds and attempt counts are clamped to at least 1.
    pub fn validate(&mut self) {
        const MIN_INTERVAL_MS: u64 = 1;

        self.poll_interval_ms = self.poll_interval_ms.max(MIN_INTERVAL_MS);
        self.discovery_interval_ms = self.discovery_interval_ms.max(MIN_INTERVAL_MS);
        self.stability_threshold = self.stability_threshold.max(1);
        self.removal_grace_passes = self.removal_grace_passes.max(1);
        self.classifier.timeout_secs = self.classifier.timeout_secs.max(1);
        self.classifier.max_attempts = self.classifier.max_attempts.max(1);
        self.classifier.max_backoff_ms = self
            .classifier
            .max_backoff_ms
            .max(self.classifier.initial_backoff_ms);
        self.store.write_attempts = self.store.write_attempts.max(1);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }
}
