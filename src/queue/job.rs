// src/queue/job.rs

//! Pending-job records and priority extraction.

use std::sync::Arc;

use tracing::debug;

use crate::config::model::{OptionBag, Task};

/// Identifies one enqueued job instance across the daemon.
pub type JobId = u64;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 9;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Clamp a raw priority into `[MIN_PRIORITY, MAX_PRIORITY]`.
pub fn clamp_priority(raw: i64) -> u8 {
    if raw < MIN_PRIORITY as i64 {
        MIN_PRIORITY
    } else if raw > MAX_PRIORITY as i64 {
        MAX_PRIORITY
    } else {
        raw as u8
    }
}

/// Effective priority of an option bundle.
///
/// Read once, at enqueue time, from the `priority` option: an integer, or
/// a string parsing as one. Anything else falls back to the default.
/// Lower values dispatch first.
pub fn priority_from_options(options: &OptionBag) -> u8 {
    let Some(value) = options.get("priority") else {
        return DEFAULT_PRIORITY;
    };

    let raw = match value {
        toml::Value::Integer(i) => Some(*i),
        toml::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match raw {
        Some(raw) => clamp_priority(raw),
        None => {
            debug!(?value, "unusable priority option; using default");
            DEFAULT_PRIORITY
        }
    }
}

/// An enqueued, not-yet-dispatched request.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: JobId,
    pub task: Arc<Task>,
    /// Effective option bundle, chain-link overrides already applied.
    pub options: OptionBag,
    /// Clamped priority extracted from the options at enqueue time.
    pub priority: u8,
}

impl PendingJob {
    pub fn new(id: JobId, task: Arc<Task>, options: OptionBag) -> Self {
        let priority = priority_from_options(&options);
        Self {
            id,
            task,
            options,
            priority,
        }
    }
}
