//! Error types for the mirroring engine.
//!
//! None of these are fatal to the process. Each one is recovered where it
//! happens: a mapping line is dropped, a single watch is not started, or a
//! single file ends up with a `Failed` outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the engine.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Unparseable or invalid configuration value (mapping line, regex, cron).
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// The watch backend could not attach to a source directory.
    #[error("Failed to start watching {path}: {reason}")]
    WatchStart { path: PathBuf, reason: String },

    /// An event path does not lie under the source directory it was reported for.
    #[error("{path} is not inside monitored directory {source_dir}")]
    PathResolution { path: PathBuf, source_dir: PathBuf },

    /// Directory creation or byte copy failed.
    #[error("Failed to copy {source_path} to {destination}: {reason}")]
    CopyIo {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },
}

impl MirrorError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        MirrorError::Configuration {
            reason: reason.into(),
        }
    }

    /// Short reason text used in failure notifications.
    pub fn reason(&self) -> String {
        match self {
            MirrorError::Configuration { reason }
            | MirrorError::WatchStart { reason, .. }
            | MirrorError::CopyIo { reason, .. } => reason.clone(),
            MirrorError::PathResolution { .. } => self.to_string(),
        }
    }

    /// Whether a watch-start failure was caused by the kernel inotify limits.
    pub fn is_inotify_limit(&self) -> bool {
        match self {
            MirrorError::WatchStart { reason, .. } => {
                let reason = reason.to_lowercase();
                reason.contains("watch limit")
                    || (reason.contains("inotify") && reason.contains("reached"))
                    || reason.contains("no space left on device")
            }
            _ => false,
        }
    }
}
