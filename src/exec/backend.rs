// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! Dispatch loops talk to a `WorkerBackend` instead of spawning processes
//! directly. This keeps the production process worker swappable for fakes
//! in tests: a fake can record the work units it receives and complete
//! them instantly, or hold them until the test releases them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::model::{OptionBag, Task};
use crate::errors::Result;
use crate::queue::{CompletionHandle, JobId};

/// Everything a worker needs to run one dispatched job.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub job_id: JobId,
    pub queue: String,
    pub task: Arc<Task>,
    /// Effective options, chain-link overrides already applied.
    pub options: OptionBag,
}

/// Trait abstracting how dispatched jobs are executed.
///
/// `launch` must not block on the job itself: implementations start the
/// work (usually on a spawned task) and report through `done` when it
/// ends. Returning an error means the job never started; the dispatcher
/// records that as an immediate failure.
pub trait WorkerBackend: Send + Sync {
    fn launch(
        &self,
        unit: WorkUnit,
        done: CompletionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
