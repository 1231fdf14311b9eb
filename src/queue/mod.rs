// src/queue/mod.rs

//! Per-queue priority dispatch with bounded worker concurrency.
//!
//! Every named queue runs one dispatch loop owning its waiting list and
//! slot accounting; the [`QueueManager`] is the registry that routes
//! enqueues, cancellations and chain follow-ups to those loops over
//! message channels. Enqueue never blocks the caller.

pub mod dispatch;
pub mod job;

pub use dispatch::FATAL_AFTER;
pub use job::{
    DEFAULT_PRIORITY, JobId, MAX_PRIORITY, MIN_PRIORITY, PendingJob, clamp_priority,
    priority_from_options,
};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::model::{Generation, OptionBag, QueueDef, Task};
use crate::errors::{Result, TaskmillError};
use crate::exec::WorkerBackend;

/// How a worker reported a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed { error: String, fatal: bool },
}

/// Commands consumed by one queue's dispatch loop.
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue(PendingJob),
    /// Drop a job that is still waiting; running jobs are unaffected.
    CancelPending { job_id: JobId },
    /// A worker finished the job; frees its slot.
    JobEnded { job_id: JobId, outcome: JobOutcome },
    Shutdown,
}

/// Observable dispatch activity, for the caller to log or route to
/// policy handlers.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    JobDispatched {
        queue: String,
        job_id: JobId,
        task: String,
        priority: u8,
    },
    JobSucceeded {
        queue: String,
        job_id: JobId,
        task: String,
    },
    /// A failure, carrying the queue's `onerror` policy for routing.
    JobFailed {
        queue: String,
        job_id: JobId,
        task: String,
        error: String,
        policy: Option<String>,
    },
    /// Repeated failures escalated to the queue's `onfatal` policy.
    QueueFatal {
        queue: String,
        consecutive_failures: u32,
        policy: Option<String>,
    },
}

/// Worker-side handle for reporting that one job ended.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    queue: String,
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl CompletionHandle {
    pub fn finish(&self, job_id: JobId, outcome: JobOutcome) {
        // The loop disappearing mid-flight only happens at shutdown.
        if self
            .tx
            .send(QueueCommand::JobEnded { job_id, outcome })
            .is_err()
        {
            debug!(queue = %self.queue, job_id, "completion for a stopped queue dropped");
        }
    }
}

/// A chain successor ready to enqueue after a success. Routed through the
/// manager because it may target a different queue than its predecessor.
#[derive(Debug)]
pub(crate) struct ChainEnqueue {
    pub task: Arc<Task>,
}

struct QueueHandle {
    def: QueueDef,
    cmd_tx: mpsc::UnboundedSender<QueueCommand>,
    join: JoinHandle<()>,
}

type Registry = BTreeMap<String, QueueHandle>;

/// Registry of live dispatch loops, addressed by queue name.
pub struct QueueManager {
    registry: Arc<RwLock<Registry>>,
    backend: Arc<dyn WorkerBackend>,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
    chain_tx: mpsc::UnboundedSender<ChainEnqueue>,
    next_job_id: Arc<AtomicU64>,
    router: JoinHandle<()>,
}

impl QueueManager {
    /// Create an empty manager. Queues appear once a generation is
    /// applied; chain follow-ups route through a background task spawned
    /// here.
    pub fn new(
        backend: Arc<dyn WorkerBackend>,
        events_tx: mpsc::UnboundedSender<DispatchEvent>,
    ) -> Self {
        let registry: Arc<RwLock<Registry>> = Arc::new(RwLock::new(BTreeMap::new()));
        let next_job_id = Arc::new(AtomicU64::new(1));
        let (chain_tx, mut chain_rx) = mpsc::unbounded_channel::<ChainEnqueue>();

        let router = {
            let registry = Arc::clone(&registry);
            let next_job_id = Arc::clone(&next_job_id);
            tokio::spawn(async move {
                while let Some(ChainEnqueue { task }) = chain_rx.recv().await {
                    let options = task.options.clone();
                    match enqueue_via(&registry, &next_job_id, &task, options) {
                        Ok(job_id) => {
                            debug!(task = %task.name, job_id, "chain follow-up enqueued");
                        }
                        Err(e) => {
                            warn!(
                                task = %task.name,
                                error = %e,
                                "chain follow-up could not be enqueued"
                            );
                        }
                    }
                }
                debug!("chain router stopped");
            })
        };

        Self {
            registry,
            backend,
            events_tx,
            chain_tx,
            next_job_id,
            router,
        }
    }

    /// Enqueue `task` with an explicit effective option bundle. Never
    /// blocks; an unknown queue name fails.
    pub fn enqueue(&self, task: &Arc<Task>, options: OptionBag) -> Result<JobId> {
        enqueue_via(&self.registry, &self.next_job_id, task, options)
    }

    /// Enqueue `task` with its own declared options.
    pub fn enqueue_task(&self, task: &Arc<Task>) -> Result<JobId> {
        self.enqueue(task, task.options.clone())
    }

    /// Ask a queue to drop a still-pending job. Best-effort: the loop
    /// logs when the job already left the waiting list.
    pub fn cancel_pending(&self, queue: &str, job_id: JobId) -> Result<()> {
        let guard = self.registry.read().expect("queue registry lock poisoned");
        let Some(handle) = guard.get(queue) else {
            return Err(TaskmillError::QueueNotFound(queue.to_string()));
        };
        handle
            .cmd_tx
            .send(QueueCommand::CancelPending { job_id })
            .map_err(|_| TaskmillError::QueueNotFound(queue.to_string()))?;
        Ok(())
    }

    /// Whether a queue's dispatch loop is currently active.
    pub fn is_running(&self, queue: &str) -> bool {
        let guard = self.registry.read().expect("queue registry lock poisoned");
        guard
            .get(queue)
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let guard = self.registry.read().expect("queue registry lock poisoned");
        guard.keys().cloned().collect()
    }

    /// Bring the running queue set in line with a generation: start new
    /// queues, re-create changed ones, stop removed ones. Unchanged
    /// queues keep their waiting lists and slots.
    pub fn apply(&self, generation: &Generation) {
        let mut guard = self.registry.write().expect("queue registry lock poisoned");

        let stale: Vec<String> = guard
            .keys()
            .filter(|name| generation.queue(name).is_none())
            .cloned()
            .collect();
        for name in stale {
            if let Some(handle) = guard.remove(&name) {
                info!(queue = %name, "stopping removed queue");
                let _ = handle.cmd_tx.send(QueueCommand::Shutdown);
            }
        }

        for def in generation.queues() {
            match guard.get(&def.name) {
                Some(handle) if handle.def == *def => {}
                Some(_) => {
                    info!(queue = %def.name, "queue definition changed; re-creating");
                    if let Some(handle) = guard.remove(&def.name) {
                        let _ = handle.cmd_tx.send(QueueCommand::Shutdown);
                    }
                    guard.insert(def.name.clone(), self.spawn_queue(def.clone()));
                }
                None => {
                    info!(
                        queue = %def.name,
                        concurrency = def.concurrency,
                        "starting queue"
                    );
                    guard.insert(def.name.clone(), self.spawn_queue(def.clone()));
                }
            }
        }
    }

    fn spawn_queue(&self, def: QueueDef) -> QueueHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let completions = CompletionHandle {
            queue: def.name.clone(),
            tx: cmd_tx.clone(),
        };
        let dispatch = dispatch::DispatchLoop::new(
            def.clone(),
            Arc::clone(&self.backend),
            cmd_rx,
            completions,
            self.chain_tx.clone(),
            self.events_tx.clone(),
        );
        let join = tokio::spawn(dispatch.run());
        QueueHandle { def, cmd_tx, join }
    }

    /// Stop every queue loop and the chain router, waiting for the loops
    /// to wind down.
    pub async fn shutdown(&self) {
        let handles: Vec<QueueHandle> = {
            let mut guard = self.registry.write().expect("queue registry lock poisoned");
            std::mem::take(&mut *guard).into_values().collect()
        };

        for handle in &handles {
            let _ = handle.cmd_tx.send(QueueCommand::Shutdown);
        }
        for handle in handles {
            let _ = handle.join.await;
        }

        self.router.abort();
        info!("queue manager shut down");
    }
}

fn enqueue_via(
    registry: &RwLock<Registry>,
    next_job_id: &AtomicU64,
    task: &Arc<Task>,
    options: OptionBag,
) -> Result<JobId> {
    let guard = registry.read().expect("queue registry lock poisoned");
    let Some(handle) = guard.get(&task.queue) else {
        return Err(TaskmillError::QueueNotFound(task.queue.clone()));
    };

    let id = next_job_id.fetch_add(1, Ordering::Relaxed);
    let job = PendingJob::new(id, Arc::clone(task), options);
    handle
        .cmd_tx
        .send(QueueCommand::Enqueue(job))
        .map_err(|_| TaskmillError::QueueNotFound(task.queue.clone()))?;
    Ok(id)
}
