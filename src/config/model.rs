// src/config/model.rs

//! Typed records for one configuration generation.
//!
//! The loader parses the raw TOML document into [`TaskSpec`]s, the chain
//! resolver turns those into final [`Task`]s, and the whole snapshot is
//! published as an immutable [`Generation`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::config::document::Document;
use crate::schedule::OccurrenceSet;

/// Free-form options attached to a task or a chain link.
///
/// Declared either as an ordered list of single-entry tables (order is
/// preserved and is what execution sees) or as one inline table (collapsed
/// form, unordered):
///
/// ```toml
/// options = [{ priority = 2 }, { notify = "ops" }]
/// # or
/// options = { priority = 2, notify = "ops" }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionBag {
    entries: Vec<(String, toml::Value)>,
}

impl OptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `options` value of a task or chain link.
    pub fn from_value(value: &toml::Value) -> Result<Self, String> {
        let mut entries = Vec::new();
        match value {
            toml::Value::Table(table) => {
                for (k, v) in table.iter() {
                    entries.push((k.clone(), v.clone()));
                }
            }
            toml::Value::Array(items) => {
                for item in items {
                    let table = item.as_table().ok_or_else(|| {
                        "options list entries must be tables ({ name = value })".to_string()
                    })?;
                    for (k, v) in table.iter() {
                        entries.push((k.clone(), v.clone()));
                    }
                }
            }
            _ => return Err("options must be a table or a list of tables".to_string()),
        }
        Ok(Self { entries })
    }

    /// Append one pair; declaration order is preserved.
    pub fn push(&mut self, name: impl Into<String>, value: toml::Value) {
        self.entries.push((name.into(), value));
    }

    /// Last declared value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&toml::Value> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Declared pairs, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &toml::Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// What a worker runs for a task: exactly one of a plugin class or a
/// shell command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTarget {
    Class(String),
    Command(String),
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecTarget::Class(class) => write!(f, "class {class}"),
            ExecTarget::Command(cmd) => write!(f, "cmd {cmd}"),
        }
    }
}

/// One declared follow-up in a task's `chain` list.
///
/// Fields present on the link replace the successor's own declaration;
/// absent fields inherit it. An explicitly empty list therefore overrides
/// with "nothing".
#[derive(Debug, Clone)]
pub struct ChainLink {
    /// Name of the successor task.
    pub task: String,
    /// Option override for the derived instance.
    pub options: Option<OptionBag>,
    /// Nested chain override for the derived instance.
    pub chain: Option<Vec<ChainLink>>,
}

/// Parse product for one `[task.<name>]` entry, before chain resolution.
///
/// The loader builds these; the chain resolver turns the full spec map
/// into the final [`Task`] values once every name is known.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub queue: String,
    pub target: ExecTarget,
    pub enabled: bool,
    pub options: OptionBag,
    pub schedule: Option<OccurrenceSet>,
    pub links: Vec<ChainLink>,
    pub onerror: Option<String>,
}

/// One task in a published configuration generation.
///
/// Tasks are built fresh on every load and never mutated afterwards, with
/// one exception: the run-state marker, which tracks whether an instance
/// is currently executing and feeds the query surface.
#[derive(Debug)]
pub struct Task {
    pub name: String,
    pub queue: String,
    pub target: ExecTarget,
    pub enabled: bool,
    pub options: OptionBag,
    /// Absent for chain-only tasks and for derived chain instances.
    pub schedule: Option<OccurrenceSet>,
    /// Resolved follow-ups, enqueued when an instance of this task
    /// completes successfully.
    pub chain: Vec<Arc<Task>>,
    pub onerror: Option<String>,
    running: AtomicBool,
}

impl Task {
    /// A bare enabled task with no options, schedule or chain. The loader
    /// builds real catalogs through specs and chain resolution; this is
    /// for tooling and tests that feed the queue layer directly.
    pub fn new(name: impl Into<String>, queue: impl Into<String>, target: ExecTarget) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            target,
            enabled: true,
            options: OptionBag::new(),
            schedule: None,
            chain: Vec::new(),
            onerror: None,
            running: AtomicBool::new(false),
        }
    }

    /// Build a task from its spec. Derived chain instances pass their
    /// effective options and no schedule.
    pub(crate) fn assemble(
        spec: &TaskSpec,
        options: OptionBag,
        schedule: Option<OccurrenceSet>,
        chain: Vec<Arc<Task>>,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            queue: spec.queue.clone(),
            target: spec.target.clone(),
            enabled: spec.enabled,
            options,
            schedule,
            chain,
            onerror: spec.onerror.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Whether an instance of this task is currently executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }

    /// Scheduled tasks fire on their own; chain-only tasks fire solely via
    /// a predecessor's completion.
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }
}

/// `[queue.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueDef {
    /// Queue name, injected from the section key.
    #[serde(skip)]
    pub name: String,

    /// Maximum number of simultaneously running jobs. `0` means the queue
    /// holds pending jobs but never dispatches them.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Policy name routed when a job on this queue fails.
    #[serde(default)]
    pub onerror: Option<String>,

    /// Policy name routed when the queue accumulates repeated failures.
    #[serde(default)]
    pub onfatal: Option<String>,
}

fn default_concurrency() -> usize {
    1
}

/// `[database]` section: connection parameters for the job-history store
/// collaborator. The core only diffs these across reloads.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DbParams {
    #[serde(default)]
    pub dsn: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass: String,

    /// Driver options, compared as an unordered bag for change detection.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

/// One immutable, validated configuration snapshot.
///
/// Published atomically by the loader; readers always observe a whole
/// generation, never a mix of two.
#[derive(Debug)]
pub struct Generation {
    /// Monotonic load counter, starting at 1.
    pub seq: u64,
    /// Directory for persisted runtime state.
    pub state_root: PathBuf,
    /// Store connection parameters.
    pub db: DbParams,
    tasks: BTreeMap<String, Arc<Task>>,
    queues: BTreeMap<String, QueueDef>,
    plugins: BTreeMap<String, toml::Value>,
    doc: Document,
}

impl Generation {
    pub(crate) fn new(
        seq: u64,
        state_root: PathBuf,
        db: DbParams,
        tasks: BTreeMap<String, Arc<Task>>,
        queues: BTreeMap<String, QueueDef>,
        plugins: BTreeMap<String, toml::Value>,
        doc: Document,
    ) -> Self {
        Self {
            seq,
            state_root,
            db,
            tasks,
            queues,
            plugins,
            doc,
        }
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDef> {
        self.queues.get(name)
    }

    pub fn plugin(&self, name: &str) -> Option<&toml::Value> {
        self.plugins.get(name)
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueDef> {
        self.queues.values()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Path-style lookup into the raw configuration tree, e.g.
    /// `"task/nightly/schedule/cron/0"`.
    pub fn lookup(&self, path: &str) -> Option<&toml::Value> {
        self.doc.lookup(path)
    }
}

/// Result of one load attempt.
///
/// `ok` means the daemon can operate: either this load published, or a
/// previously published generation is still live. `ok` is false only when
/// nothing has ever loaded successfully.
#[derive(Debug, Clone, Default)]
pub struct LoadStatus {
    /// Operable after this attempt.
    pub ok: bool,
    /// The raw document parsed.
    pub parsed: bool,
    /// At least one validation failure was recorded.
    pub failed: bool,
    /// A new generation was published by this attempt.
    pub updated: bool,
    /// Database parameters differ from the previous generation's.
    pub store_modified: bool,
    errors: Vec<String>,
}

impl LoadStatus {
    pub(crate) fn record_failure(&mut self, message: impl Into<String>) {
        self.failed = true;
        self.errors.push(message.into());
    }

    /// Accumulated validation failures, in discovery order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Aggregate human-readable failure message, when any was recorded.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}
