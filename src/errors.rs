// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskmillError {
    #[error("No such queue: {0}")]
    QueueNotFound(String),

    #[error("invalid cron expression '{expr}': {message}")]
    Schedule { expr: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TaskmillError>;
