// src/exec/mod.rs

//! Worker execution layer.
//!
//! Dispatch hands jobs to a [`WorkerBackend`]; the production backend in
//! [`process`] runs command targets under the platform shell via
//! `tokio::process::Command` and reports outcomes back through the
//! queue's completion handle. Tests swap in fake backends.

pub mod backend;
pub mod process;

pub use backend::{WorkUnit, WorkerBackend};
pub use process::ProcessWorker;
