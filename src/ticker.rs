// src/ticker.rs

//! Minute ticker: turns the active generation's occurrence sets into
//! enqueue calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::loader::ConfigHandle;
use crate::config::model::{Generation, Task};
use crate::queue::QueueManager;
use crate::schedule::minute_floor;

/// Scheduled, enabled tasks due at `minute` in this generation.
///
/// Chain-only tasks carry no occurrence set and never show up here.
pub fn due_tasks(generation: &Generation, minute: DateTime<Utc>) -> Vec<Arc<Task>> {
    generation
        .tasks()
        .filter(|task| task.enabled)
        .filter(|task| {
            task.schedule
                .as_ref()
                .map(|set| set.contains(minute))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Run the minute loop until aborted: sleep to each minute boundary, then
/// enqueue whatever the active generation says is due. Minutes missed
/// while the process stalled are still checked, in order.
pub fn spawn_ticker(handle: ConfigHandle, manager: Arc<QueueManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut target = next_minute(Utc::now());
        loop {
            let now = Utc::now();
            if target > now {
                let wait = (target - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                continue;
            }

            if let Some(generation) = handle.current() {
                for task in due_tasks(&generation, target) {
                    debug!(task = %task.name, minute = %target, "task due");
                    if let Err(e) = manager.enqueue_task(&task) {
                        warn!(task = %task.name, error = %e, "due task could not be enqueued");
                    }
                }
            }

            target += chrono::Duration::minutes(1);
        }
    })
}

fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    minute_floor(now) + chrono::Duration::minutes(1)
}
