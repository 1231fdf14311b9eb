#![allow(dead_code)]

use std::sync::Arc;

use taskmill::config::{ChainLink, ExecTarget, QueueDef, Task, TaskSpec};
use taskmill::schedule::OccurrenceSet;

/// Builder for `Task` values fed straight into the queue layer, skipping
/// the loader.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn cmd(name: &str, queue: &str, cmdline: &str) -> Self {
        Self {
            task: Task::new(name, queue, ExecTarget::Command(cmdline.to_string())),
        }
    }

    pub fn class(name: &str, queue: &str, class: &str) -> Self {
        Self {
            task: Task::new(name, queue, ExecTarget::Class(class.to_string())),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.task.enabled = false;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.task
            .options
            .push("priority", toml::Value::Integer(priority));
        self
    }

    pub fn option(mut self, name: &str, value: toml::Value) -> Self {
        self.task.options.push(name, value);
        self
    }

    pub fn chains(mut self, successor: Arc<Task>) -> Self {
        self.task.chain.push(successor);
        self
    }

    pub fn onerror(mut self, policy: &str) -> Self {
        self.task.onerror = Some(policy.to_string());
        self
    }

    pub fn build(self) -> Arc<Task> {
        Arc::new(self.task)
    }
}

/// Builder for `TaskSpec` maps handed to the chain resolver.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn cmd(name: &str, queue: &str, cmdline: &str) -> Self {
        Self {
            spec: TaskSpec {
                name: name.to_string(),
                queue: queue.to_string(),
                target: ExecTarget::Command(cmdline.to_string()),
                enabled: true,
                options: Default::default(),
                schedule: None,
                links: Vec::new(),
                onerror: None,
            },
        }
    }

    pub fn option(mut self, name: &str, value: toml::Value) -> Self {
        self.spec.options.push(name, value);
        self
    }

    pub fn cron(mut self, exprs: &[&str]) -> Self {
        let exprs: Vec<String> = exprs.iter().map(|s| s.to_string()).collect();
        self.spec.schedule = OccurrenceSet::compute(&exprs).expect("valid cron expressions");
        self
    }

    /// Append a plain link to `task`, inheriting that task's own chain.
    pub fn link(mut self, task: &str) -> Self {
        self.spec.links.push(ChainLink {
            task: task.to_string(),
            options: None,
            chain: None,
        });
        self
    }

    pub fn link_full(mut self, link: ChainLink) -> Self {
        self.spec.links.push(link);
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Builder for `QueueDef`, for driving queue loops without the loader.
pub struct QueueDefBuilder {
    def: QueueDef,
}

impl QueueDefBuilder {
    pub fn new(name: &str, concurrency: usize) -> Self {
        Self {
            def: QueueDef {
                name: name.to_string(),
                concurrency,
                onerror: None,
                onfatal: None,
            },
        }
    }

    pub fn onerror(mut self, policy: &str) -> Self {
        self.def.onerror = Some(policy.to_string());
        self
    }

    pub fn onfatal(mut self, policy: &str) -> Self {
        self.def.onfatal = Some(policy.to_string());
        self
    }

    pub fn build(self) -> QueueDef {
        self.def
    }
}

/// Builder for configuration documents fed to the loader as TOML text.
///
/// Emits a `[state]` section up front when a root is set; everything else
/// is appended in call order so tests control section layout.
pub struct ConfigDocBuilder {
    state_root: Option<String>,
    sections: Vec<String>,
}

impl ConfigDocBuilder {
    pub fn new() -> Self {
        Self {
            state_root: None,
            sections: Vec::new(),
        }
    }

    pub fn state_root(mut self, path: &str) -> Self {
        self.state_root = Some(path.to_string());
        self
    }

    pub fn queue(mut self, name: &str, concurrency: usize) -> Self {
        self.sections
            .push(format!("[queue.{name}]\nconcurrency = {concurrency}\n"));
        self
    }

    pub fn task_cmd(mut self, name: &str, queue: &str, cmdline: &str) -> Self {
        self.sections.push(format!(
            "[task.{name}]\nqueue = \"{queue}\"\ncmd = \"{cmdline}\"\n"
        ));
        self
    }

    /// Append verbatim TOML. Useful for schedules, chains and options that
    /// the shorthand methods do not cover.
    pub fn raw(mut self, toml: &str) -> Self {
        self.sections.push(format!("{}\n", toml.trim()));
        self
    }

    pub fn build(self) -> String {
        let mut out = String::new();
        if let Some(root) = &self.state_root {
            out.push_str(&format!("[state]\nroot = '{root}'\n\n"));
        }
        for section in &self.sections {
            out.push_str(section);
            out.push('\n');
        }
        out
    }
}

impl Default for ConfigDocBuilder {
    fn default() -> Self {
        Self::new()
    }
}
