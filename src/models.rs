// Core data structures shared across the supervision and conversion subsystems

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Lifecycle state of a managed process.
///
/// Transitions are driven exclusively by the supervisor loop:
/// `Stopped -> Starting -> Running -> Degraded -> Restarting -> Running`,
/// with `Crashed` as a terminal state once the restart window is exhausted
/// and `Stopping -> Stopped` during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Restarting,
    Stopping,
    Crashed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }

    /// Terminal states are never left automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Crashed)
    }

    /// Whether the transition `self -> next` is allowed by the lifecycle FSM.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        match (self, next) {
            (Stopped, Starting) => true,
            (Starting, Running) | (Starting, Degraded) | (Starting, Stopping) => true,
            (Running, Degraded) | (Running, Stopping) => true,
            (Degraded, Restarting) | (Degraded, Crashed) | (Degraded, Stopping) => true,
            (Restarting, Starting) | (Restarting, Running) | (Restarting, Degraded) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static definition of a service the process manager can launch.
///
/// Supplied by configuration; the core never hard-codes commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDef {
    /// Stable identifier ("proxy", "web", "converter", ...).
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub workdir: PathBuf,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Critical services are auto-restarted; optional ones are left stopped.
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Bookkeeping for one supervised OS process.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub def: ServiceDef,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl ManagedProcess {
    pub fn new(def: ServiceDef) -> Self {
        Self {
            def,
            pid: None,
            state: ProcessState::Stopped,
            restart_count: 0,
            last_restart_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Allowed HTTP methods for a rendered page, default `{GET}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedMethods(BTreeSet<String>);

impl Default for AllowedMethods {
    fn default() -> Self {
        Self(BTreeSet::from(["GET".to_string()]))
    }
}

impl AllowedMethods {
    pub fn from_list(methods: &[String]) -> Self {
        let set: BTreeSet<String> = methods
            .iter()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        if set.is_empty() {
            Self::default()
        } else {
            Self(set)
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.0.contains(&method.to_ascii_uppercase())
    }

    /// Comma-joined storage form, e.g. `"GET,POST"`.
    pub fn to_storage(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn from_storage(s: &str) -> Self {
        let methods: Vec<String> = s.split(',').map(str::to_string).collect();
        Self::from_list(&methods)
    }
}

/// One renderable unit stored in the content database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Unique key in `<scope>:/<path>` form, derived from the directory path.
    pub content_key: String,
    pub rendered_html: String,
    pub title: String,
    pub allowed_methods: AllowedMethods,
    /// SHA-256 of the source file, used to skip unchanged reprocessing.
    pub source_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Classification of a conversion task by source file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Page,
    Media,
}

/// A transient unit of conversion work produced by the watcher.
///
/// Consumed exactly once by a worker, never persisted. The dedup key
/// enforces at-most-one-in-flight per source path. Workers look at the
/// filesystem, not the triggering event: a missing source means the
/// stored output goes, whatever kind of event got us here.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub source_path: PathBuf,
    pub kind: TaskKind,
}

impl ConversionTask {
    pub fn new(source_path: PathBuf, kind: TaskKind) -> Self {
        Self { source_path, kind }
    }

    /// Key used for in-flight exclusion; defaults to the source path.
    pub fn dedup_key(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }
}
