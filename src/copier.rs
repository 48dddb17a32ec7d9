//! Copy Executor - byte-for-byte file copy into the destination tree
//!
//! The copy is written to a hidden temporary name next to the destination
//! and renamed into place, so readers of the destination tree never see a
//! partially written file under its final name.

use crate::error::MirrorError;
use filetime::FileTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const TEMP_SUFFIX: &str = ".copywatch-tmp";

/// Copies a single file, creating missing destination directories
#[derive(Debug, Clone, Copy)]
pub struct Copier {
    preserve_timestamps: bool,
}

impl Copier {
    pub fn new(preserve_timestamps: bool) -> Self {
        Self {
            preserve_timestamps,
        }
    }

    /// Copy `source` to `destination`, returning the number of bytes written.
    pub async fn copy(&self, source: &Path, destination: &Path) -> Result<u64, MirrorError> {
        let io_err = |e: std::io::Error| MirrorError::CopyIo {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp = temp_path(destination);
        let result = self.copy_via(source, &temp, destination).await;
        if result.is_err() {
            // Best effort, the temp name is hidden from the pipeline either way
            let _ = fs::remove_file(&temp).await;
        }
        result.map_err(io_err)
    }

    async fn copy_via(&self, source: &Path, temp: &Path, destination: &Path) -> std::io::Result<u64> {
        let bytes = fs::copy(source, temp).await?;
        debug!("Wrote {} bytes to {}", bytes, temp.display());

        if self.preserve_timestamps {
            let metadata = fs::metadata(source).await?;
            let atime = FileTime::from_last_access_time(&metadata);
            let mtime = FileTime::from_last_modification_time(&metadata);
            let temp = temp.to_path_buf();
            tokio::task::spawn_blocking(move || filetime::set_file_times(&temp, atime, mtime))
                .await
                .map_err(std::io::Error::other)??;
        }

        fs::rename(temp, destination).await?;
        Ok(bytes)
    }
}

impl Default for Copier {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Hidden sibling of `destination` used while the copy is in progress
fn temp_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}{}", name, TEMP_SUFFIX))
}
