// src/config/loader.rs

//! Configuration loading: parse -> validate -> schedule-compute ->
//! chain-resolve -> diff -> atomic publish.
//!
//! Validation failures accumulate into the [`LoadStatus`] rather than
//! aborting at the first problem, so one load attempt surfaces everything
//! wrong with the document. A failed attempt never touches the active
//! generation; the daemon keeps serving the last good one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::chain;
use crate::config::document::{self, Document};
use crate::config::model::{
    ChainLink, DbParams, ExecTarget, Generation, LoadStatus, OptionBag, QueueDef, TaskSpec,
};
use crate::config::monitor::SourceMonitor;
use crate::schedule::OccurrenceSet;

/// Shared read side of the active configuration.
///
/// Publication swaps the inner `Arc` under a write lock, so readers
/// always observe a whole generation. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Option<Arc<Generation>>>>,
}

impl ConfigHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active generation, if any load has ever succeeded.
    pub fn current(&self) -> Option<Arc<Generation>> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Whether any generation has ever been published.
    pub fn loaded(&self) -> bool {
        self.inner.read().expect("config lock poisoned").is_some()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.current().map(|g| g.task_names()).unwrap_or_default()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.current().map(|g| g.queue_names()).unwrap_or_default()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.current().map(|g| g.has_plugin(name)).unwrap_or(false)
    }

    /// Path-style lookup into the active configuration tree.
    pub fn lookup(&self, path: &str) -> Option<toml::Value> {
        self.current().and_then(|g| g.lookup(path).cloned())
    }

    fn publish(&self, generation: Arc<Generation>) {
        *self.inner.write().expect("config lock poisoned") = Some(generation);
    }
}

/// Drives load attempts and owns the publication side of [`ConfigHandle`].
#[derive(Debug)]
pub struct ConfigLoader {
    path: PathBuf,
    handle: ConfigHandle,
    next_seq: u64,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: ConfigHandle::new(),
            next_seq: 1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The shared read handle; clone freely.
    pub fn handle(&self) -> ConfigHandle {
        self.handle.clone()
    }

    /// Read the config file and run a full load attempt.
    pub fn load(&mut self) -> LoadStatus {
        match fs::read_to_string(&self.path) {
            Ok(text) => self.load_str(&text),
            Err(e) => {
                let mut status = LoadStatus::default();
                status.record_failure(format!(
                    "reading config file {}: {e}",
                    self.path.display()
                ));
                status.ok = self.handle.loaded();
                status
            }
        }
    }

    /// One reload poll: consult the monitor and reload only when the
    /// source changed. An unchanged source reports a quiet success
    /// (`updated=false`, nothing parsed).
    pub fn poll(&mut self, monitor: &mut SourceMonitor) -> LoadStatus {
        match monitor.scan() {
            Ok(true) => {
                info!(path = %self.path.display(), "configuration source changed; reloading");
                self.load()
            }
            Ok(false) => {
                let mut status = LoadStatus::default();
                status.ok = self.handle.loaded();
                status
            }
            Err(e) => {
                let mut status = LoadStatus::default();
                status.record_failure(format!("scanning config source: {e}"));
                status.ok = self.handle.loaded();
                status
            }
        }
    }

    /// Run a full load attempt over already-read document text.
    pub fn load_str(&mut self, text: &str) -> LoadStatus {
        let mut status = LoadStatus::default();

        let doc = match Document::parse(text) {
            Ok(doc) => doc,
            Err(e) => {
                // Parser errors abort the attempt; there is nothing to
                // validate.
                status.record_failure(e.to_string());
                status.ok = self.handle.loaded();
                return status;
            }
        };
        status.parsed = true;

        let previous = self.handle.current();
        let generation = self.build_generation(doc, previous.as_deref(), &mut status);

        match generation {
            Some(generation) if !status.failed => {
                let generation = Arc::new(generation);
                info!(
                    seq = generation.seq,
                    tasks = generation.task_names().len(),
                    queues = generation.queue_names().len(),
                    store_modified = status.store_modified,
                    "configuration generation published"
                );
                self.handle.publish(generation);
                self.next_seq += 1;
                status.updated = true;
                status.ok = true;
            }
            _ => {
                status.ok = self.handle.loaded();
                warn!(
                    errors = status.errors().len(),
                    previous_generation = status.ok,
                    "configuration rejected"
                );
            }
        }

        status
    }

    fn build_generation(
        &self,
        doc: Document,
        previous: Option<&Generation>,
        status: &mut LoadStatus,
    ) -> Option<Generation> {
        let state_root = self.resolve_state_root(&doc, status);
        let db = parse_db(&doc, status);
        let queues = parse_queues(&doc, status);
        let plugins = parse_plugins(&doc);
        let specs = parse_tasks(&doc, status);

        // Diff connection parameters for the caller's store collaborator.
        if let Some(previous) = previous {
            status.store_modified = previous.db != db;
        }

        let tasks = match chain::resolve_all(&specs) {
            Ok(tasks) => tasks,
            Err(errors) => {
                for e in errors {
                    status.record_failure(e);
                }
                BTreeMap::new()
            }
        };

        if status.failed {
            return None;
        }

        Some(Generation::new(
            self.next_seq,
            state_root?,
            db,
            tasks,
            queues,
            plugins,
            doc,
        ))
    }

    /// `state.root` must name a usable directory; create it with
    /// owner-only permissions when absent.
    fn resolve_state_root(&self, doc: &Document, status: &mut LoadStatus) -> Option<PathBuf> {
        let Some(value) = doc.lookup("state/root") else {
            status.record_failure("state.root is not configured");
            return None;
        };
        let Some(raw) = value.as_str() else {
            status.record_failure("state.root must be a string path");
            return None;
        };

        let path = PathBuf::from(raw);
        if !path.exists() {
            if let Err(e) = create_state_dir(&path) {
                status.record_failure(format!("creating state root {}: {e}", path.display()));
                return None;
            }
            info!(path = %path.display(), "created state root directory");
        }
        Some(path)
    }
}

#[cfg(unix)]
fn create_state_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_state_dir(path: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new().recursive(true).create(path)
}

fn parse_db(doc: &Document, status: &mut LoadStatus) -> DbParams {
    match doc.lookup("database") {
        Some(value) => match value.clone().try_into::<DbParams>() {
            Ok(db) => db,
            Err(e) => {
                status.record_failure(format!("[database]: {e}"));
                DbParams::default()
            }
        },
        None => DbParams::default(),
    }
}

fn parse_queues(doc: &Document, status: &mut LoadStatus) -> BTreeMap<String, QueueDef> {
    let mut queues = BTreeMap::new();
    let Some(value) = doc.lookup("queue") else {
        return queues;
    };
    let Some(table) = value.as_table() else {
        status.record_failure("[queue] must be a table of queue sections");
        return queues;
    };

    for (name, entry) in table {
        match entry.clone().try_into::<QueueDef>() {
            Ok(mut def) => {
                def.name = name.clone();
                queues.insert(name.clone(), def);
            }
            Err(e) => status.record_failure(format!("[queue.{name}]: {e}")),
        }
    }
    queues
}

/// Plugin declarations are opaque to the core; they are carried for the
/// query surface and for execution collaborators.
fn parse_plugins(doc: &Document) -> BTreeMap<String, toml::Value> {
    match doc.lookup("plugin").and_then(|v| v.as_table()) {
        Some(table) => table.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => BTreeMap::new(),
    }
}

fn parse_tasks(doc: &Document, status: &mut LoadStatus) -> BTreeMap<String, TaskSpec> {
    let mut specs = BTreeMap::new();
    let Some(value) = doc.lookup("task") else {
        return specs;
    };
    let Some(table) = value.as_table() else {
        status.record_failure("[task] must be a table of task sections");
        return specs;
    };

    for (name, entry) in table {
        let Some(entry) = entry.as_table() else {
            status.record_failure(format!("[task.{name}] must be a table"));
            continue;
        };
        if let Some(spec) = parse_task(name, entry, status) {
            specs.insert(name.clone(), spec);
        }
    }
    specs
}

fn parse_task(name: &str, entry: &toml::Table, status: &mut LoadStatus) -> Option<TaskSpec> {
    // queue may be declared more than once; the first value wins.
    let queue = entry
        .get("queue")
        .and_then(document::collapse_multi)
        .and_then(document::scalar_str)
        .unwrap_or_default();
    if queue.is_empty() {
        status.record_failure(format!("task '{name}' not assigned to a queue"));
    }

    let class = entry.get("class").and_then(|v| v.as_str());
    let cmd = entry.get("cmd").and_then(|v| v.as_str());
    let target = match (class, cmd) {
        (Some(class), None) => Some(ExecTarget::Class(class.to_string())),
        (None, Some(cmd)) => Some(ExecTarget::Command(cmd.to_string())),
        (Some(_), Some(_)) => {
            status.record_failure(format!(
                "task '{name}': class and cmd are mutually exclusive"
            ));
            None
        }
        (None, None) => {
            status.record_failure(format!("task '{name}' lacks a class or command line"));
            None
        }
    };

    let enabled = document::enabled_from_value(entry.get("enabled"));

    let options = match entry.get("options") {
        Some(value) => match OptionBag::from_value(value) {
            Ok(bag) => bag,
            Err(e) => {
                status.record_failure(format!("task '{name}': {e}"));
                OptionBag::new()
            }
        },
        None => OptionBag::new(),
    };

    let schedule = match entry.get("schedule") {
        Some(value) => parse_schedule(name, value, status),
        None => None,
    };

    let links = match entry.get("chain") {
        Some(value) => match parse_links(value) {
            Ok(links) => links,
            Err(e) => {
                status.record_failure(format!("task '{name}': {e}"));
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let onerror = entry
        .get("onerror")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if queue.is_empty() {
        return None;
    }
    let target = target?;

    Some(TaskSpec {
        name: name.to_string(),
        queue,
        target,
        enabled,
        options,
        schedule,
        links,
        onerror,
    })
}

/// `schedule.cron` holds one expression or a list; the occurrence set is
/// their union.
fn parse_schedule(
    task: &str,
    value: &toml::Value,
    status: &mut LoadStatus,
) -> Option<OccurrenceSet> {
    let Some(table) = value.as_table() else {
        status.record_failure(format!("task '{task}': schedule must be a table"));
        return None;
    };
    // An empty [task.<name>.schedule] is just an unscheduled task.
    let Some(cron) = table.get("cron") else {
        return None;
    };

    let exprs = match document::string_list(cron) {
        Ok(exprs) => exprs,
        Err(e) => {
            status.record_failure(format!("task '{task}': schedule.cron: {e}"));
            return None;
        }
    };

    match OccurrenceSet::compute(&exprs) {
        Ok(set) => set,
        Err(e) => {
            status.record_failure(format!("task '{task}': {e}"));
            None
        }
    }
}

/// `chain` is a list of links: `{ task = "name", options = ..., chain = [...] }`.
fn parse_links(value: &toml::Value) -> Result<Vec<ChainLink>, String> {
    let Some(items) = value.as_array() else {
        return Err("chain must be a list of links".to_string());
    };

    let mut links = Vec::with_capacity(items.len());
    for item in items {
        let Some(table) = item.as_table() else {
            return Err("chain entries must be tables with a `task` field".to_string());
        };
        let Some(task) = table.get("task").and_then(|v| v.as_str()) else {
            return Err("chain entries must name a `task`".to_string());
        };

        let options = match table.get("options") {
            Some(v) => Some(OptionBag::from_value(v)?),
            None => None,
        };

        let nested = match table.get("chain") {
            Some(v) => Some(parse_links(v)?),
            None => None,
        };

        links.push(ChainLink {
            task: task.to_string(),
            options,
            chain: nested,
        });
    }
    Ok(links)
}
