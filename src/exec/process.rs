// src/exec/process.rs

//! The production worker: runs command targets as shell child processes.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::model::ExecTarget;
use crate::errors::Result;
use crate::queue::{CompletionHandle, JobOutcome};

use super::backend::{WorkUnit, WorkerBackend};

/// Runs `cmd` targets under the platform shell and reports their exit
/// status. `class` targets have no plugin host wired in this build and
/// complete as failures rather than silently succeeding.
#[derive(Debug, Default)]
pub struct ProcessWorker;

impl ProcessWorker {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerBackend for ProcessWorker {
    fn launch(
        &self,
        unit: WorkUnit,
        done: CompletionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let target = unit.task.target.clone();
            match target {
                ExecTarget::Command(cmdline) => {
                    tokio::spawn(async move {
                        let job_id = unit.job_id;
                        let outcome = match run_command(&unit, &cmdline).await {
                            Ok(outcome) => outcome,
                            Err(e) => JobOutcome::Failed {
                                error: format!("{e:#}"),
                                fatal: false,
                            },
                        };
                        done.finish(job_id, outcome);
                    });
                }
                ExecTarget::Class(class) => {
                    warn!(
                        task = %unit.task.name,
                        job_id = unit.job_id,
                        class = %class,
                        "no plugin host available for class target"
                    );
                    done.finish(
                        unit.job_id,
                        JobOutcome::Failed {
                            error: format!("class '{class}' requires a plugin host"),
                            fatal: false,
                        },
                    );
                }
            }
            Ok(())
        })
    }
}

async fn run_command(unit: &WorkUnit, cmdline: &str) -> anyhow::Result<JobOutcome> {
    info!(
        task = %unit.task.name,
        job_id = unit.job_id,
        queue = %unit.queue,
        cmd = %cmdline,
        "starting job process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmdline);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmdline);
        c
    };

    // Effective options ride along as environment variables.
    for (name, value) in unit.options.iter() {
        cmd.env(option_env_name(name), option_env_value(value));
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", unit.task.name))?;

    // Always consume both streams so pipe buffers don't fill; log at debug.
    if let Some(stdout) = child.stdout.take() {
        let task_name = unit.task.name.clone();
        let job_id = unit.job_id;
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, job_id, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let task_name = unit.task.name.clone();
        let job_id = unit.job_id;
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, job_id, "stderr: {}", line);
            }
        });
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", unit.task.name))?;

    let code = status.code().unwrap_or(-1);
    info!(
        task = %unit.task.name,
        job_id = unit.job_id,
        exit_code = code,
        success = status.success(),
        "job process exited"
    );

    if status.success() {
        Ok(JobOutcome::Success)
    } else {
        Ok(JobOutcome::Failed {
            error: format!("process exited with status {code}"),
            fatal: false,
        })
    }
}

/// `TASKMILL_OPT_<NAME>`, with non-alphanumerics mapped to underscores.
fn option_env_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 13);
    out.push_str("TASKMILL_OPT_");
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out
}

/// Plain strings stay bare; structured values keep their TOML form.
fn option_env_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
