use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use taskmill::errors::Result;
use taskmill::exec::{WorkUnit, WorkerBackend};
use taskmill::queue::{CompletionHandle, JobOutcome};

/// A fake worker that:
/// - records every work unit it is launched with
/// - immediately reports success, or failure for task names registered
///   through `fail_task`.
#[derive(Default)]
pub struct FakeWorker {
    launched: Arc<Mutex<Vec<WorkUnit>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names launched so far, in dispatch order.
    pub fn launched_tasks(&self) -> Vec<String> {
        let guard = self.launched.lock().unwrap();
        guard.iter().map(|u| u.task.name.clone()).collect()
    }

    /// Full work units launched so far, in dispatch order.
    pub fn launched_units(&self) -> Vec<WorkUnit> {
        self.launched.lock().unwrap().clone()
    }

    /// Every future launch of `task` completes as a non-fatal failure.
    pub fn fail_task(&self, task: &str) {
        self.failing.lock().unwrap().insert(task.to_string());
    }
}

impl WorkerBackend for FakeWorker {
    fn launch(
        &self,
        unit: WorkUnit,
        done: CompletionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let launched = Arc::clone(&self.launched);
        let failing = Arc::clone(&self.failing);

        Box::pin(async move {
            let job_id = unit.job_id;
            let task = unit.task.name.clone();
            let fail = failing.lock().unwrap().contains(&task);
            {
                let mut guard = launched.lock().unwrap();
                guard.push(unit);
            }

            let outcome = if fail {
                JobOutcome::Failed {
                    error: format!("task '{task}' told to fail"),
                    fatal: false,
                }
            } else {
                JobOutcome::Success
            };
            done.finish(job_id, outcome);
            Ok(())
        })
    }
}

/// A worker whose launches always fail outright, for exercising the
/// never-started path.
#[derive(Default)]
pub struct RefusingWorker;

impl RefusingWorker {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerBackend for RefusingWorker {
    fn launch(
        &self,
        _unit: WorkUnit,
        _done: CompletionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(anyhow::anyhow!("worker refused the job").into()) })
    }
}

/// A worker that holds every launched job open until the test releases
/// it by task name. Lets tests pin down slot accounting and waiting-list
/// order without racing the dispatch loop.
#[derive(Default)]
pub struct HeldWorker {
    started: Arc<Mutex<Vec<WorkUnit>>>,
    gates: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl HeldWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names started so far, in dispatch order.
    pub fn started_tasks(&self) -> Vec<String> {
        let guard = self.started.lock().unwrap();
        guard.iter().map(|u| u.task.name.clone()).collect()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Let one held launch of `task` finish with success.
    pub fn release(&self, task: &str) {
        self.gate(task).notify_one();
    }

    /// Poll until `task` has been started. Panics if it never starts, so
    /// a wedged dispatch loop fails the test instead of hanging it.
    pub async fn wait_for_start(&self, task: &str) {
        for _ in 0..200 {
            if self.started_tasks().iter().any(|t| t == task) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task '{task}' was never started");
    }

    fn gate(&self, task: &str) -> Arc<Notify> {
        let mut guard = self.gates.lock().unwrap();
        Arc::clone(
            guard
                .entry(task.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }
}

impl WorkerBackend for HeldWorker {
    fn launch(
        &self,
        unit: WorkUnit,
        done: CompletionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let gate = self.gate(&unit.task.name);
        let started = Arc::clone(&self.started);

        Box::pin(async move {
            let job_id = unit.job_id;
            tokio::spawn(async move {
                {
                    let mut guard = started.lock().unwrap();
                    guard.push(unit);
                }
                gate.notified().await;
                done.finish(job_id, JobOutcome::Success);
            });
            Ok(())
        })
    }
}
