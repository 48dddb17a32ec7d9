//! Mirror engine - owns the watches, rules and scheduled jobs of one instance
//!
//! Every (re)load follows the same sequence: stop all watches and jobs, rebuild
//! the mapping and filters, swap them into the pipeline, then start watches
//! for every valid mapping. Old and new watches never run at the same time.

use crate::config::{Config, ConfigStore};
use crate::error::MirrorError;
use crate::notifier::{Notification, Notifier};
use crate::pipeline::{CopyOutcome, Pipeline, RuleSet};
use crate::schedule::{parse_schedule, ScheduledJob};
use crate::sync::{run_full_sync, run_full_sync_until, SyncSummary};
use crate::watcher::{WatchHandle, WatchSet};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Delay before the one-shot full sync requested by `run_once`
pub const RUN_ONCE_DELAY: Duration = Duration::from_secs(3);

/// Title used for engine-level notifications
const NOTIFY_TITLE: &str = "Copy monitor";

/// Running state replaced on every reload
#[derive(Default)]
struct Runtime {
    watches: WatchSet,
    jobs: Vec<ScheduledJob>,
}

/// Snapshot of what a reload started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub watched: Vec<PathBuf>,
    pub rejected_mappings: usize,
    pub scheduled: bool,
    pub run_once_pending: bool,
}

/// One mirroring engine instance
pub struct Engine {
    store: Arc<dyn ConfigStore>,
    pipeline: Arc<Pipeline>,
    runtime: Mutex<Runtime>,
    status: parking_lot::Mutex<EngineStatus>,
}

impl Engine {
    /// Create an idle engine; call [`Engine::reload`] to start it
    pub fn new(store: Arc<dyn ConfigStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            pipeline: Arc::new(Pipeline::new(RuleSet::default(), notifier)),
            runtime: Mutex::new(Runtime::default()),
            status: parking_lot::Mutex::new(EngineStatus::default()),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn status(&self) -> EngineStatus {
        self.status.lock().clone()
    }

    /// Load configuration from the store and apply it
    pub async fn reload(&self) -> Result<EngineStatus> {
        let config = self
            .store
            .load()
            .context("Failed to load configuration from store")?;
        self.apply(config).await
    }

    /// Stop everything, rebuild from `config` and start again.
    ///
    /// Problems with individual entries are logged, notified and skipped.
    /// A running full sync is cancelled before the new rules take effect.
    pub async fn apply(&self, mut config: Config) -> Result<EngineStatus> {
        let mut runtime = self.runtime.lock().await;
        Self::stop_runtime(&mut runtime).await;

        let (rules, filter_errors) = RuleSet::from_config(&config);
        for err in &filter_errors {
            self.warn_user(err.to_string()).await;
        }
        for issue in rules.mapping.issues() {
            self.warn_user(issue.to_string()).await;
        }

        let entries = rules.mapping.entries().to_vec();
        let rejected_mappings = rules.mapping.issues().len();
        self.pipeline.replace_rules(rules);

        let mut status = EngineStatus {
            rejected_mappings,
            ..Default::default()
        };

        if !config.enabled && !config.run_once {
            info!("Copy monitor is disabled");
            *self.status.lock() = status.clone();
            return Ok(status);
        }

        if config.enabled {
            for entry in &entries {
                match WatchHandle::start(entry, config.mode, self.pipeline.clone()) {
                    Ok(handle) => runtime.watches.push(handle),
                    Err(err) => self.report_watch_failure(&err).await,
                }
            }
            status.watched = runtime.watches.source_dirs();

            if let Some(expr) = config.schedule_expr() {
                match parse_schedule(expr) {
                    Ok(schedule) => {
                        let pipeline = self.pipeline.clone();
                        runtime.jobs.push(ScheduledJob::spawn("full sync", schedule, move |cancel| {
                            let pipeline = pipeline.clone();
                            async move {
                                run_full_sync_until(pipeline, cancel.cancelled()).await;
                            }
                        }));
                        info!("Scheduled full sync: {}", expr);
                        status.scheduled = true;
                    }
                    Err(err) => self.warn_user(err.to_string()).await,
                }
            }
        }

        if config.run_once {
            info!(
                "Running a full sync in {} seconds",
                RUN_ONCE_DELAY.as_secs()
            );
            let pipeline = self.pipeline.clone();
            runtime.jobs.push(ScheduledJob::once("run once", RUN_ONCE_DELAY, move |cancel| async move {
                run_full_sync_until(pipeline, cancel.cancelled()).await;
            }));
            status.run_once_pending = true;

            config.run_once = false;
            if let Err(err) = self.store.save(&config) {
                // The sync still runs; it repeats on the next load
                self.warn_user(format!("Failed to persist cleared run_once flag: {:#}", err))
                    .await;
            }
        }

        *self.status.lock() = status.clone();
        Ok(status)
    }

    /// Run a full sync now with the current rules
    pub async fn run_full_sync(&self) -> SyncSummary {
        run_full_sync(self.pipeline.clone()).await
    }

    /// Feed a single path through the pipeline as if a watch reported it
    pub async fn process(&self, event_path: &Path, source_dir: &Path) -> Option<CopyOutcome> {
        self.pipeline.process(event_path, source_dir).await
    }

    /// Stop all watches and scheduled jobs
    pub async fn shutdown(&self) {
        let mut runtime = self.runtime.lock().await;
        Self::stop_runtime(&mut runtime).await;
        *self.status.lock() = EngineStatus::default();
        info!("Copy monitor stopped");
    }

    async fn stop_runtime(runtime: &mut Runtime) {
        runtime.watches.stop_all().await;
        for job in runtime.jobs.drain(..) {
            job.cancel().await;
        }
    }

    async fn report_watch_failure(&self, err: &MirrorError) {
        if err.is_inotify_limit() {
            warn!(
                "{}. Raise the inotify limits on the host and restart:\n  \
                 echo fs.inotify.max_user_watches=524288 | sudo tee -a /etc/sysctl.conf\n  \
                 echo fs.inotify.max_user_instances=524288 | sudo tee -a /etc/sysctl.conf\n  \
                 sudo sysctl -p",
                err
            );
        } else {
            error!("{}", err);
        }
        self.pipeline
            .notifier()
            .send(Notification::error(NOTIFY_TITLE, err.to_string()))
            .await;
    }

    async fn warn_user(&self, message: String) {
        warn!("{}", message);
        self.pipeline
            .notifier()
            .send(Notification::warning(NOTIFY_TITLE, message))
            .await;
    }
}
