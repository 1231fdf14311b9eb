// src/config/monitor.rs

//! Poll-based change detection for the configuration source.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

/// Watches one configuration file by content fingerprint.
///
/// `scan` is cheap enough to run on a short poll interval and reports
/// whether the file changed since the previous scan. A missing file has
/// its own fingerprint state, so the file appearing or disappearing both
/// count as change. The monitor is owned by the polling caller and is
/// never scanned concurrently.
#[derive(Debug)]
pub struct SourceMonitor {
    path: PathBuf,
    last: Option<String>,
}

impl SourceMonitor {
    /// Attach to `path`, fingerprinting its current content so that the
    /// first `scan` only reports change for edits made after attach.
    pub fn attach(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = match fingerprint(&path) {
            Ok(fp) => fp,
            Err(e) => {
                debug!(
                    path = %path.display(),
                    error = %e,
                    "could not fingerprint config source at attach"
                );
                None
            }
        };
        Self { path, last }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Report whether the source changed since the previous scan.
    pub fn scan(&mut self) -> Result<bool> {
        let current = fingerprint(&self.path)?;
        let changed = current != self.last;
        if changed {
            debug!(path = %self.path.display(), "config source fingerprint changed");
            self.last = current;
        }
        Ok(changed)
    }
}

/// Content hash of the file, or `None` when it does not exist.
fn fingerprint(path: &Path) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("opening config source {}", path.display()));
        }
    };

    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hasher.finalize().to_hex().to_string()))
}
