// src/queue/dispatch.rs

//! The per-queue dispatch loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::model::{QueueDef, Task};
use crate::exec::{WorkUnit, WorkerBackend};

use super::job::{JobId, PendingJob};
use super::{ChainEnqueue, CompletionHandle, DispatchEvent, JobOutcome, QueueCommand};

/// Consecutive failures on one queue before its `onfatal` policy routes.
pub const FATAL_AFTER: u32 = 3;

/// One queue's scheduling authority.
///
/// The loop is the single serialized decision point for its queue: the
/// waiting list, the running set and the slot accounting are touched
/// nowhere else, so a priority pick and its slot assignment are atomic
/// with respect to concurrent enqueues and completions. Queues never
/// contend with each other.
pub(crate) struct DispatchLoop {
    def: QueueDef,
    backend: Arc<dyn WorkerBackend>,
    cmd_rx: mpsc::UnboundedReceiver<QueueCommand>,
    completions: CompletionHandle,
    chain_tx: mpsc::UnboundedSender<ChainEnqueue>,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
    /// Waiting jobs keyed by (priority, arrival); `pop_first` is the
    /// dispatch order: lower priority value first, FIFO within a value.
    waiting: BTreeMap<(u8, u64), PendingJob>,
    running: HashMap<JobId, Arc<Task>>,
    next_arrival: u64,
    consecutive_failures: u32,
}

impl DispatchLoop {
    pub(crate) fn new(
        def: QueueDef,
        backend: Arc<dyn WorkerBackend>,
        cmd_rx: mpsc::UnboundedReceiver<QueueCommand>,
        completions: CompletionHandle,
        chain_tx: mpsc::UnboundedSender<ChainEnqueue>,
        events_tx: mpsc::UnboundedSender<DispatchEvent>,
    ) -> Self {
        Self {
            def,
            backend,
            cmd_rx,
            completions,
            chain_tx,
            events_tx,
            waiting: BTreeMap::new(),
            running: HashMap::new(),
            next_arrival: 0,
            consecutive_failures: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            queue = %self.def.name,
            concurrency = self.def.concurrency,
            "dispatch loop started"
        );

        while let Some(command) = self.cmd_rx.recv().await {
            match command {
                QueueCommand::Enqueue(job) => self.enqueue(job),
                QueueCommand::CancelPending { job_id } => self.cancel_pending(job_id),
                QueueCommand::JobEnded { job_id, outcome } => self.job_ended(job_id, outcome),
                QueueCommand::Shutdown => {
                    info!(
                        queue = %self.def.name,
                        pending = self.waiting.len(),
                        running = self.running.len(),
                        "dispatch loop shutting down"
                    );
                    break;
                }
            }

            self.dispatch_ready().await;
        }

        // Stopped via Shutdown or a closed channel; run markers must not
        // stay set on tasks we abandoned.
        for task in self.running.values() {
            task.set_running(false);
        }
        info!(queue = %self.def.name, "dispatch loop stopped");
    }

    fn enqueue(&mut self, job: PendingJob) {
        let key = (job.priority, self.next_arrival);
        self.next_arrival += 1;
        debug!(
            queue = %self.def.name,
            job_id = job.id,
            task = %job.task.name,
            priority = job.priority,
            "job enqueued"
        );
        self.waiting.insert(key, job);
    }

    fn cancel_pending(&mut self, job_id: JobId) {
        let key = self
            .waiting
            .iter()
            .find(|(_, job)| job.id == job_id)
            .map(|(k, _)| *k);
        match key.and_then(|k| self.waiting.remove(&k)) {
            Some(job) => {
                info!(
                    queue = %self.def.name,
                    job_id,
                    task = %job.task.name,
                    "pending job cancelled"
                );
            }
            None => {
                debug!(
                    queue = %self.def.name,
                    job_id,
                    "cancel requested for a job no longer pending"
                );
            }
        }
    }

    fn job_ended(&mut self, job_id: JobId, outcome: JobOutcome) {
        let Some(task) = self.running.remove(&job_id) else {
            warn!(queue = %self.def.name, job_id, "completion for unknown job");
            return;
        };
        task.set_running(false);

        match outcome {
            JobOutcome::Success => {
                self.consecutive_failures = 0;
                debug!(queue = %self.def.name, job_id, task = %task.name, "job succeeded");
                let _ = self.events_tx.send(DispatchEvent::JobSucceeded {
                    queue: self.def.name.clone(),
                    job_id,
                    task: task.name.clone(),
                });

                // Success fires the resolved follow-ups. They may target
                // other queues, so they go through the manager's router.
                for successor in &task.chain {
                    let _ = self.chain_tx.send(ChainEnqueue {
                        task: Arc::clone(successor),
                    });
                }
            }
            JobOutcome::Failed { error, fatal } => {
                self.consecutive_failures += 1;
                warn!(
                    queue = %self.def.name,
                    job_id,
                    task = %task.name,
                    error = %error,
                    "job failed"
                );
                let _ = self.events_tx.send(DispatchEvent::JobFailed {
                    queue: self.def.name.clone(),
                    job_id,
                    task: task.name.clone(),
                    error,
                    policy: self.def.onerror.clone(),
                });

                if fatal || self.consecutive_failures >= FATAL_AFTER {
                    let _ = self.events_tx.send(DispatchEvent::QueueFatal {
                        queue: self.def.name.clone(),
                        consecutive_failures: self.consecutive_failures,
                        policy: self.def.onfatal.clone(),
                    });
                    self.consecutive_failures = 0;
                }
            }
        }
    }

    /// Fill free slots from the waiting list, most urgent first.
    async fn dispatch_ready(&mut self) {
        while self.running.len() < self.def.concurrency {
            let Some((_, job)) = self.waiting.pop_first() else {
                break;
            };

            let PendingJob {
                id,
                task,
                options,
                priority,
            } = job;

            task.set_running(true);
            self.running.insert(id, Arc::clone(&task));

            info!(
                queue = %self.def.name,
                job_id = id,
                task = %task.name,
                priority,
                "dispatching job"
            );
            let _ = self.events_tx.send(DispatchEvent::JobDispatched {
                queue: self.def.name.clone(),
                job_id: id,
                task: task.name.clone(),
                priority,
            });

            let unit = WorkUnit {
                job_id: id,
                queue: self.def.name.clone(),
                task: Arc::clone(&task),
                options,
            };

            if let Err(e) = self.backend.launch(unit, self.completions.clone()).await {
                warn!(
                    queue = %self.def.name,
                    job_id = id,
                    task = %task.name,
                    error = %e,
                    "worker launch failed"
                );
                // Report it like any other failure so the slot frees and
                // the policies route.
                self.completions.finish(
                    id,
                    JobOutcome::Failed {
                        error: e.to_string(),
                        fatal: false,
                    },
                );
            }
        }
    }
}
