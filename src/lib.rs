//! copywatch - Event-driven one-way directory mirroring daemon
//!
//! copywatch watches configured source directories and copies every newly
//! created or modified file into the matching destination directory,
//! preserving the relative path. Existing destination files are never
//! overwritten and nothing is ever deleted.
//!
//! ## Core Features
//!
//! - **Two watch backends**: OS-native notifications or fixed-interval polling
//! - **Filtering**: recycle-bin/hidden paths, exclude and include patterns, extension allow-list
//! - **Full sync**: walk every mapping once, on demand, on a cron schedule or once after load
//! - **Hot reload**: every configuration change stops all watches before starting new ones
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and the host configuration store
//! - [`mapping`]: `source:destination` parsing and validation
//! - [`filter`]: Path filters applied before every copy
//! - [`pipeline`]: Per-event decision and copy under a global lock
//! - [`watcher`]: Watch handles over the notify backends
//! - [`sync`]: Full-sync driver
//! - [`engine`]: Engine lifecycle and reload

pub mod config;
pub mod copier;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod filter;
pub mod health;
pub mod mapping;
pub mod notifier;
pub mod pipeline;
pub mod schedule;
pub mod sync;
pub mod watcher;

pub use config::{Config, ConfigStore, FileConfigStore, MemoryConfigStore, WatchMode};
pub use daemon::Daemon;
pub use engine::{Engine, EngineStatus};
pub use error::MirrorError;
pub use health::HealthCheck;
pub use mapping::{MappingEntry, MappingIssue, MappingTable};
pub use notifier::{ChannelNotifier, LogNotifier, Notification, NotificationLevel, Notifier};
pub use pipeline::{CopyOutcome, CopyResult, Pipeline, RuleSet};
pub use sync::{run_full_sync, run_full_sync_until, SyncSummary};
pub use watcher::{ChangeEvent, ChangeKind, WatchHandle, WatchSet};
