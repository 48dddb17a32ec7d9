//! Filter & Resolve Pipeline - decides skip-or-copy for each changed file
//!
//! Live watch events and full-sync walks both land in [`Pipeline::process`].
//! Everything after the existence check runs under one engine-wide lock, so
//! two events for the same file can never both see "destination missing" and
//! race to write it. Unrelated copies are serialized as a consequence.

use crate::config::Config;
use crate::copier::Copier;
use crate::error::MirrorError;
use crate::filter::{FilterReason, FilterRules};
use crate::mapping::MappingTable;
use crate::notifier::{Notification, Notifier};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of processing one candidate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyResult {
    Copied { bytes: u64 },
    SkippedExisting,
    SkippedFiltered(FilterReason),
    SkippedNotMapped,
    Failed(String),
}

/// What happened to one candidate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub source_path: PathBuf,
    /// Resolved destination, when the pipeline got far enough to compute it
    pub destination_path: Option<PathBuf>,
    pub result: CopyResult,
}

impl CopyOutcome {
    fn new(source_path: &Path, destination_path: Option<PathBuf>, result: CopyResult) -> Self {
        Self {
            source_path: source_path.to_path_buf(),
            destination_path,
            result,
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self.result, CopyResult::Copied { .. })
    }

    fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

/// Everything one processing pass reads; replaced wholesale on reload
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub mapping: MappingTable,
    pub filters: FilterRules,
    pub notify: bool,
    pub copier: Copier,
}

impl RuleSet {
    /// Build the rules for a configuration.
    ///
    /// Mapping problems are kept on the table; filter problems are returned.
    pub fn from_config(config: &Config) -> (Self, Vec<MirrorError>) {
        let mapping = MappingTable::parse(&config.monitor_dirs);
        let (filters, errors) = FilterRules::from_config(config);
        (
            Self {
                mapping,
                filters,
                notify: config.notify,
                copier: Copier::new(config.preserve_timestamps),
            },
            errors,
        )
    }
}

/// Shared decision pipeline used by every watch and full sync
pub struct Pipeline {
    rules: RwLock<Arc<RuleSet>>,
    copy_lock: Mutex<()>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(rules: RuleSet, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            copy_lock: Mutex::new(()),
            notifier,
        }
    }

    /// Current rule snapshot
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    /// Swap in a new rule set; in-flight events finish with the old one
    pub fn replace_rules(&self, rules: RuleSet) {
        *self.rules.write() = Arc::new(rules);
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Run one changed path through the pipeline.
    ///
    /// Returns `None` when the path vanished or is a directory; nothing is
    /// recorded for those.
    pub async fn process(&self, event_path: &Path, source_dir: &Path) -> Option<CopyOutcome> {
        match fs::metadata(event_path).await {
            Ok(metadata) if metadata.is_dir() => {
                debug!("{} is a directory, ignoring", event_path.display());
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("{} no longer exists, ignoring: {}", event_path.display(), e);
                return None;
            }
        }

        let (outcome, rules) = {
            let _guard = self.copy_lock.lock().await;
            let rules = self.rules();
            let outcome = self.evaluate(&rules, event_path, source_dir).await;
            (outcome, rules)
        };

        self.report(&rules, &outcome, source_dir).await;
        Some(outcome)
    }

    async fn evaluate(&self, rules: &RuleSet, event_path: &Path, source_dir: &Path) -> CopyOutcome {
        if let Some(reason) = rules.filters.check(event_path, source_dir) {
            match reason {
                FilterReason::RecycleOrHidden => {
                    debug!("{} is a recycle bin or hidden file", event_path.display())
                }
                _ => info!("{} skipped: {}", event_path.display(), reason),
            }
            return CopyOutcome::new(event_path, None, CopyResult::SkippedFiltered(reason));
        }

        let entry = match rules.mapping.lookup(source_dir) {
            Some(entry) => entry,
            None => {
                warn!(
                    "{} has no destination directory configured, not copying {}",
                    source_dir.display(),
                    event_path.display()
                );
                return CopyOutcome::new(event_path, None, CopyResult::SkippedNotMapped);
            }
        };

        let relative = match event_path.strip_prefix(&entry.source_dir) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => {
                let err = MirrorError::PathResolution {
                    path: event_path.to_path_buf(),
                    source_dir: entry.source_dir.clone(),
                };
                return CopyOutcome::new(event_path, None, CopyResult::Failed(err.reason()));
            }
        };

        let destination = entry.destination_dir.join(relative);
        match fs::try_exists(&destination).await {
            Ok(true) => {
                info!("{} already exists", destination.display());
                return CopyOutcome::new(event_path, Some(destination), CopyResult::SkippedExisting);
            }
            Ok(false) => {}
            Err(e) => {
                let reason = format!("Cannot check {}: {}", destination.display(), e);
                return CopyOutcome::new(event_path, Some(destination), CopyResult::Failed(reason));
            }
        }

        let result = match rules.copier.copy(event_path, &destination).await {
            Ok(bytes) => CopyResult::Copied { bytes },
            Err(e) => {
                debug!("Copy error detail: {:?}", e);
                CopyResult::Failed(e.reason())
            }
        };
        CopyOutcome::new(event_path, Some(destination), result)
    }

    /// Log terminal outcomes and send the matching notification
    async fn report(&self, rules: &RuleSet, outcome: &CopyOutcome, source_dir: &Path) {
        let name = outcome.file_name();
        let notification = match &outcome.result {
            CopyResult::Copied { bytes } => {
                let target_dir = outcome
                    .destination_path
                    .as_deref()
                    .and_then(Path::parent)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                info!("{} copied ({} bytes) to {}", name, bytes, target_dir);
                rules
                    .notify
                    .then(|| Notification::info(format!("{} copied", name), format!("Destination: {}", target_dir)))
            }
            CopyResult::Failed(reason) => {
                error!("{} copy failed: {}", outcome.source_path.display(), reason);
                rules
                    .notify
                    .then(|| Notification::error(format!("{} copy failed", name), format!("Reason: {}", reason)))
            }
            CopyResult::SkippedNotMapped => Some(Notification::warning(
                "Copy monitor",
                format!(
                    "{} has no destination directory configured, {} was not copied",
                    source_dir.display(),
                    name
                ),
            )),
            CopyResult::SkippedExisting | CopyResult::SkippedFiltered(_) => None,
        };

        if let Some(notification) = notification {
            self.notifier.send(notification).await;
        }
    }
}
