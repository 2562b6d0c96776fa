use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agents::{AgentState, GENERIC_AGENT};
use crate::error::PackError;

/// Packs compiled into the binary, overridable from the packs directory
const BUILTIN_PACKS: &[(&str, &str)] = &[
    (GENERIC_AGENT, include_str!("../../packs/generic.yaml")),
    ("shell", include_str!("../../packs/shell.yaml")),
    ("claude", include_str!("../../packs/claude.yaml")),
    ("codex", include_str!("../../packs/codex.yaml")),
];

/// File extensions recognised in the packs directory
const PACK_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Illustrative snapshot with its expected verdict, used as a few-shot example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackExample {
    pub snapshot: String,
    pub state: AgentState,
    #[serde(default)]
    pub summary: String,
}

/// On-disk pack layout
#[derive(Debug, Deserialize)]
struct PackFile {
    #[serde(default)]
    stability_polls: Option<u32>,
    #[serde(default)]
    tail_lines: Option<usize>,
    #[serde(default, alias = "idle_patterns")]
    ready_patterns: Vec<String>,
    #[serde(default)]
    busy_patterns: Vec<String>,
    #[serde(default)]
    needs_confirmation_patterns: Vec<String>,
    #[serde(default)]
    error_patterns: Vec<String>,
    #[serde(default)]
    examples: Vec<PackExample>,
}

/// Where a pack was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackSource {
    Builtin,
    File(PathBuf),
}

/// Rule set for one agent type
///
/// Immutable once compiled; shared between sessions as `Arc<ClassifierPack>`.
#[derive(Debug, Clone)]
pub struct ClassifierPack {
    pub name: String,
    pub source: PackSource,
    /// Overrides the global stability threshold when set
    pub stability_polls: Option<u32>,
    /// Only the last N lines of a snapshot are matched when set
    pub tail_lines: Option<usize>,
    pub examples: Vec<PackExample>,
    ready: Vec<Regex>,
    busy: Vec<Regex>,
    needs_confirmation: Vec<Regex>,
    error: Vec<Regex>,
}

impl ClassifierPack {
    /// Parse and compile a pack from YAML (or JSON) text
    pub fn parse(name: &str, text: &str, source: PackSource) -> Result<Self, PackError> {
        let file: PackFile = serde_yaml::from_str(text).map_err(|e| PackError::Parse {
            name: name.to_string(),
            source: e,
        })?;

        Ok(Self {
            name: name.to_string(),
            source,
            stability_polls: file.stability_polls.filter(|n| *n > 0),
            tail_lines: file.tail_lines.filter(|n| *n > 0),
            examples: file.examples,
            ready: compile(name, &file.ready_patterns)?,
            busy: compile(name, &file.busy_patterns)?,
            needs_confirmation: compile(name, &file.needs_confirmation_patterns)?,
            error: compile(name, &file.error_patterns)?,
        })
    }

    /// Load a pack file; the pack name is the file stem
    pub fn load(path: &Path) -> Result<Self, PackError> {
        let text = std::fs::read_to_string(path).map_err(|e| PackError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::parse(&name, &text, PackSource::File(path.to_path_buf()))
    }

    /// Pack with no rules; everything classifies as BUSY
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: PackSource::Builtin,
            stability_polls: None,
            tail_lines: None,
            examples: Vec::new(),
            ready: Vec::new(),
            busy: Vec::new(),
            needs_confirmation: Vec::new(),
            error: Vec::new(),
        }
    }

    /// Compiled patterns for one state
    pub fn patterns(&self, state: AgentState) -> &[Regex] {
        match state {
            AgentState::Ready => &self.ready,
            AgentState::Busy => &self.busy,
            AgentState::NeedsConfirmation => &self.needs_confirmation,
            AgentState::Error => &self.error,
        }
    }

    pub fn pattern_count(&self) -> usize {
        AgentState::PRIORITY
            .iter()
            .map(|s| self.patterns(*s).len())
            .sum()
    }

    /// Stability threshold for sessions using this pack
    pub fn stability_threshold(&self, default: u32) -> u32 {
        self.stability_polls.unwrap_or(default).max(1)
    }
}

/// Patterns are case-insensitive and `^`/`$` match at line boundaries
fn compile(name: &str, patterns: &[String]) -> Result<Vec<Regex>, PackError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|e| PackError::Pattern {
                    name: name.to_string(),
                    pattern: p.clone(),
                    source: e,
                })
        })
        .collect()
}

fn builtin_packs() -> HashMap<String, Arc<ClassifierPack>> {
    let mut packs = HashMap::new();
    for (name, text) in BUILTIN_PACKS {
        match ClassifierPack::parse(name, text, PackSource::Builtin) {
            Ok(pack) => {
                packs.insert(name.to_string(), Arc::new(pack));
            }
            Err(e) => tracing::error!(pack = %name, error = %e, "Built-in pack failed to compile"),
        }
    }
    packs
        .entry(GENERIC_AGENT.to_string())
        .or_insert_with(|| Arc::new(ClassifierPack::empty(GENERIC_AGENT)));
    packs
}

/// Pack files in a directory, sorted by path
fn pack_files(dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    let entries = std::fs::read_dir(dir).map_err(|e| PackError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| PACK_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// All classifier packs known to the watcher, keyed by agent type
pub struct PackRegistry {
    dir: Option<PathBuf>,
    packs: RwLock<HashMap<String, Arc<ClassifierPack>>>,
    /// Agent types already reported as unknown
    unknown_reported: Mutex<HashSet<String>>,
}

impl PackRegistry {
    /// Built-in packs only
    pub fn builtin() -> Self {
        Self {
            dir: None,
            packs: RwLock::new(builtin_packs()),
            unknown_reported: Mutex::new(HashSet::new()),
        }
    }

    /// Built-in packs overridden by the files in `dir`
    ///
    /// Returns the registry together with the files that failed to load.
    pub fn load(dir: Option<&Path>) -> (Self, Vec<PackError>) {
        let registry = Self {
            dir: dir.map(Path::to_path_buf),
            ..Self::builtin()
        };
        let errors = registry.reload();
        (registry, errors)
    }

    /// Re-read the packs directory
    ///
    /// A pack that fails to load keeps its previous version. Packs whose file
    /// disappeared fall back to the built-in of the same name, if any.
    pub fn reload(&self) -> Vec<PackError> {
        let mut next = builtin_packs();
        let mut errors = Vec::new();

        if let Some(dir) = &self.dir {
            match pack_files(dir) {
                Ok(files) => {
                    let current = self.packs.read();
                    for path in files {
                        match ClassifierPack::load(&path) {
                            Ok(pack) => {
                                next.insert(pack.name.clone(), Arc::new(pack));
                            }
                            Err(e) => {
                                tracing::error!(path = %path.display(), error = %e, "Failed to load classifier pack");
                                let name = path
                                    .file_stem()
                                    .map(|s| s.to_string_lossy().to_string())
                                    .unwrap_or_default();
                                if let Some(previous) = current.get(&name) {
                                    next.insert(name, Arc::clone(previous));
                                }
                                errors.push(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read packs directory");
                    errors.push(e);
                    return errors;
                }
            }
        }

        tracing::info!(packs = next.len(), errors = errors.len(), "Classifier packs loaded");
        *self.packs.write() = next;
        errors
    }

    /// Pack for an agent type, falling back to the generic pack
    pub fn get(&self, agent_type: &str) -> Arc<ClassifierPack> {
        let packs = self.packs.read();
        if let Some(pack) = packs.get(agent_type) {
            return Arc::clone(pack);
        }

        if self.unknown_reported.lock().insert(agent_type.to_string()) {
            tracing::warn!(agent_type, "No classifier pack for agent type, using generic");
        }
        packs
            .get(GENERIC_AGENT)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(ClassifierPack::empty(GENERIC_AGENT)))
    }

    /// All packs sorted by name
    pub fn list(&self) -> Vec<Arc<ClassifierPack>> {
        let mut packs: Vec<_> = self.packs.read().values().cloned().collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name));
        packs
    }
}
