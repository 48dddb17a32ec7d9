//! Full-Sync Driver - walks every mapped source tree through the pipeline
//!
//! The walk runs on a blocking thread and streams paths over a bounded
//! channel, so only a small window of the listing is ever held in memory no
//! matter how large the tree is. Each file goes through the same pipeline as
//! a live watch event. A cancelled sync stops between files: the copy in
//! progress completes and the walk is abandoned.

use crate::pipeline::{CopyOutcome, CopyResult, Pipeline};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Paths buffered between the directory walk and the pipeline
const WALK_BUFFER: usize = 256;

/// Counts from one full sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub total_files: usize,
    pub copied: usize,
    pub skipped_existing: usize,
    pub skipped_filtered: usize,
    pub skipped_not_mapped: usize,
    pub failed: usize,
    /// Files that disappeared between the walk and processing
    pub vanished: usize,
    /// Stopped early by a reload or shutdown
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl SyncSummary {
    fn record(&mut self, outcome: Option<&CopyOutcome>) {
        self.total_files += 1;
        match outcome.map(|o| &o.result) {
            Some(CopyResult::Copied { .. }) => self.copied += 1,
            Some(CopyResult::SkippedExisting) => self.skipped_existing += 1,
            Some(CopyResult::SkippedFiltered(_)) => self.skipped_filtered += 1,
            Some(CopyResult::SkippedNotMapped) => self.skipped_not_mapped += 1,
            Some(CopyResult::Failed(_)) => self.failed += 1,
            None => self.vanished += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_filtered + self.skipped_not_mapped + self.vanished
    }
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Walk every valid mapping once and feed each file to the pipeline
pub async fn run_full_sync(pipeline: Arc<Pipeline>) -> SyncSummary {
    run_full_sync_until(pipeline, std::future::pending::<()>()).await
}

/// Like [`run_full_sync`], but stop before the next file once `cancelled`
/// resolves
pub async fn run_full_sync_until<C>(pipeline: Arc<Pipeline>, cancelled: C) -> SyncSummary
where
    C: Future<Output = ()>,
{
    let mut cancelled = std::pin::pin!(cancelled);
    let start_time = Instant::now();
    let sources: Vec<PathBuf> = pipeline
        .rules()
        .mapping
        .entries()
        .iter()
        .map(|entry| entry.source_dir.clone())
        .collect();

    info!("Starting full sync of {} monitored directories", sources.len());

    let mut summary = SyncSummary::default();
    for source_dir in sources {
        sync_directory(&pipeline, source_dir, cancelled.as_mut(), &mut summary).await;
        if summary.cancelled {
            break;
        }
    }
    summary.duration = start_time.elapsed();

    if summary.cancelled {
        info!(
            "Full sync cancelled after {:.2}s: {} files, {} copied",
            summary.duration.as_secs_f64(),
            summary.total_files,
            summary.copied
        );
        return summary;
    }

    info!(
        "Full sync completed in {:.2}s: {} files, {} copied, {} failed, {} skipped",
        summary.duration.as_secs_f64(),
        summary.total_files,
        summary.copied,
        summary.failed,
        summary.skipped()
    );

    summary
}

async fn sync_directory(
    pipeline: &Pipeline,
    source_dir: PathBuf,
    mut cancelled: Pin<&mut impl Future<Output = ()>>,
    summary: &mut SyncSummary,
) {
    debug!("Walking {}", source_dir.display());

    let (sender, mut receiver) = mpsc::channel::<PathBuf>(WALK_BUFFER);
    let root = source_dir.clone();
    let walker = tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&root).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if sender.blocking_send(entry.into_path()).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry under {}: {}", root.display(), e),
            }
        }
    });

    loop {
        let path = tokio::select! {
            biased;
            _ = cancelled.as_mut() => {
                summary.cancelled = true;
                break;
            }
            path = receiver.recv() => match path {
                Some(path) => path,
                None => break,
            },
        };
        let outcome = pipeline.process(&path, &source_dir).await;
        summary.record(outcome.as_ref());
    }
    // Closing the channel stops the walker at its next send
    drop(receiver);

    if let Err(e) = walker.await {
        warn!("Directory walk of {} aborted: {}", source_dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notifier::{ChannelNotifier, LogNotifier};
    use crate::pipeline::RuleSet;

    fn pipeline_for(config: &Config) -> Arc<Pipeline> {
        let (rules, errors) = RuleSet::from_config(config);
        assert!(errors.is_empty());
        Arc::new(Pipeline::new(rules, Arc::new(LogNotifier)))
    }

    #[tokio::test]
    async fn test_full_sync_copies_tree_and_counts() {
        let temp = tempfile::Builder::new().prefix("fullsync").tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::create_dir_all(src.join("a").join("b")).unwrap();
        std::fs::create_dir_all(src.join("@eaDir")).unwrap();
        std::fs::write(src.join("one.jpg"), b"1").unwrap();
        std::fs::write(src.join("a").join("two.jpg"), b"2").unwrap();
        std::fs::write(src.join("a").join("b").join("three.jpg"), b"3").unwrap();
        std::fs::write(src.join("a").join("notes.txt"), b"n").unwrap();
        std::fs::write(src.join("@eaDir").join("thumb.jpg"), b"t").unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("one.jpg"), b"already here").unwrap();

        let config = Config {
            monitor_dirs: format!("{}:{}", src.display(), dst.display()),
            file_formats: ".jpg".to_string(),
            ..Default::default()
        };
        let summary = run_full_sync(pipeline_for(&config)).await;

        assert_eq!(summary.total_files, 5);
        assert_eq!(summary.copied, 2);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.skipped_filtered, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(std::fs::read(dst.join("a").join("b").join("three.jpg")).unwrap(), b"3");
        assert_eq!(std::fs::read(dst.join("one.jpg")).unwrap(), b"already here");
        assert!(!dst.join("@eaDir").exists());
    }

    #[tokio::test]
    async fn test_full_sync_without_mappings_is_empty() {
        let summary = run_full_sync(pipeline_for(&Config::default())).await;
        assert_eq!(summary.total_files, 0);
        assert_eq!(summary.skipped(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_directory_is_tolerated() {
        let temp = tempfile::Builder::new().prefix("fullsync").tempdir().unwrap();
        let config = Config {
            monitor_dirs: format!(
                "{}:{}",
                temp.path().join("missing").display(),
                temp.path().join("dst").display()
            ),
            ..Default::default()
        };
        let summary = run_full_sync(pipeline_for(&config)).await;
        assert_eq!(summary.total_files, 0);
    }

    #[test]
    fn test_summary_serializes_duration_as_seconds() {
        let summary = SyncSummary {
            copied: 3,
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["copied"], 3);
        assert_eq!(json["duration"], 1.5);
    }

    #[tokio::test]
    async fn test_cancelled_sync_stops_between_files() {
        let temp = tempfile::Builder::new().prefix("fullsync").tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        for i in 0..500 {
            std::fs::write(src.join(format!("f{:03}.dat", i)), b"x").unwrap();
        }

        let config = Config {
            monitor_dirs: format!("{}:{}", src.display(), dst.display()),
            notify: true,
            ..Default::default()
        };
        let (rules, _) = RuleSet::from_config(&config);
        let (notifier, mut copies) = ChannelNotifier::new();
        let pipeline = Arc::new(Pipeline::new(rules, Arc::new(notifier)));

        // Cancel as soon as the tenth copy has been reported
        let after_ten_copies = async move {
            for _ in 0..10 {
                copies.recv().await;
            }
        };
        let summary = run_full_sync_until(pipeline, after_ten_copies).await;

        assert!(summary.cancelled);
        assert_eq!(summary.copied, 10);
        assert_eq!(summary.total_files, 10);
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 10);
    }

    #[tokio::test]
    async fn test_already_cancelled_sync_copies_nothing() {
        let temp = tempfile::Builder::new().prefix("fullsync").tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();
        let config = Config {
            monitor_dirs: format!("{}:{}", src.display(), temp.path().join("dst").display()),
            ..Default::default()
        };

        let summary = run_full_sync_until(pipeline_for(&config), std::future::ready(())).await;
        assert!(summary.cancelled);
        assert_eq!(summary.total_files, 0);
        assert!(!temp.path().join("dst").exists());
    }
}
