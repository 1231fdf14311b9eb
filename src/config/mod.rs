// src/config/mod.rs

//! Configuration: generic document access, the typed catalog model,
//! load/publish orchestration and reload monitoring.

pub mod document;
pub mod loader;
pub mod model;
pub mod monitor;

pub use document::Document;
pub use loader::{ConfigHandle, ConfigLoader};
pub use model::{
    ChainLink, DbParams, ExecTarget, Generation, LoadStatus, OptionBag, QueueDef, Task, TaskSpec,
};
pub use monitor::SourceMonitor;
