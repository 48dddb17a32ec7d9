//! Watch Source - one background watcher per mapped source directory
//!
//! Two backends produce the same [`ChangeEvent`]s:
//! - `Responsive` uses the OS-native notify backend (inotify, FSEvents, ...)
//! - `Compatible` polls the tree every 10 seconds, for network shares where
//!   native events are missing or unreliable
//!
//! Raw notify events are normalized on the backend thread and handed to an
//! [`EventSink`]. The default sink forwards them to a tokio task that feeds
//! the pipeline, so the backend never blocks on copy I/O.

use crate::config::WatchMode;
use crate::error::MirrorError;
use crate::mapping::MappingEntry;
use crate::pipeline::Pipeline;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Scan interval of the polling backend
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Kind of change reported for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
}

/// A normalized file change under a watched source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub event_path: PathBuf,
    pub source_dir: PathBuf,
    pub kind: ChangeKind,
}

/// Receives normalized events from a watch backend.
///
/// Called on the backend's own thread; implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn on_file_event(&self, event: ChangeEvent);
}

/// Forwards events into an unbounded channel
struct ChannelSink {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl EventSink for ChannelSink {
    fn on_file_event(&self, event: ChangeEvent) {
        if self.sender.send(event).is_err() {
            trace!("Watch consumer stopped, dropping event");
        }
    }
}

/// The running backend; dropping it detaches from the directory
enum Backend {
    // Held only so the watcher lives until the backend is dropped
    Responsive(#[allow(dead_code)] RecommendedWatcher),
    Compatible(#[allow(dead_code)] PollWatcher),
}

impl Backend {
    fn start(mode: WatchMode, source_dir: &Path, sink: Arc<dyn EventSink>) -> notify::Result<Self> {
        let root = source_dir.to_path_buf();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in normalize(&event, &root) {
                    sink.on_file_event(change);
                }
            }
            Err(e) => error!("Watch error under {}: {}", root.display(), e),
        };

        match mode {
            WatchMode::Responsive => {
                let mut watcher = RecommendedWatcher::new(handler, notify::Config::default())?;
                watcher.watch(source_dir, RecursiveMode::Recursive)?;
                Ok(Backend::Responsive(watcher))
            }
            WatchMode::Compatible => {
                let config = notify::Config::default().with_poll_interval(POLL_INTERVAL);
                let mut watcher = PollWatcher::new(handler, config)?;
                watcher.watch(source_dir, RecursiveMode::Recursive)?;
                Ok(Backend::Compatible(watcher))
            }
        }
    }

    fn mode(&self) -> WatchMode {
        match self {
            Backend::Responsive(_) => WatchMode::Responsive,
            Backend::Compatible(_) => WatchMode::Compatible,
        }
    }
}

/// Translate a raw notify event into file change events.
///
/// Directory events and removals are dropped. A rename reports the new path
/// as a creation, so files moved into the tree get copied.
fn normalize(event: &Event, source_dir: &Path) -> Vec<ChangeEvent> {
    let (kind, paths): (ChangeKind, &[PathBuf]) = match event.kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => (ChangeKind::Created, event.paths.as_slice()),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            (ChangeKind::Created, event.paths.as_slice())
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            (ChangeKind::Created, event.paths.get(1..).unwrap_or_default())
        }
        EventKind::Modify(ModifyKind::Name(_)) => return Vec::new(),
        EventKind::Modify(_) => (ChangeKind::Modified, event.paths.as_slice()),
        _ => return Vec::new(),
    };

    paths
        .iter()
        .filter(|path| !path.is_dir())
        .map(|path| ChangeEvent {
            event_path: path.clone(),
            source_dir: source_dir.to_path_buf(),
            kind,
        })
        .collect()
}

/// A running watch on one source directory
pub struct WatchHandle {
    source_dir: PathBuf,
    backend: Option<Backend>,
    shutdown: broadcast::Sender<()>,
    consumer: JoinHandle<()>,
}

impl WatchHandle {
    /// Attach a watcher to `entry.source_dir` and start feeding `pipeline`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        entry: &MappingEntry,
        mode: WatchMode,
        pipeline: Arc<Pipeline>,
    ) -> Result<Self, MirrorError> {
        let source_dir = entry.source_dir.clone();
        if !source_dir.is_dir() {
            return Err(MirrorError::WatchStart {
                path: source_dir,
                reason: "directory does not exist".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(ChannelSink { sender });
        let backend = Backend::start(mode, &source_dir, sink).map_err(|e| MirrorError::WatchStart {
            path: source_dir.clone(),
            reason: e.to_string(),
        })?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let consumer = tokio::spawn(consume(receiver, shutdown_rx, pipeline));

        info!(
            "Watching {} ({} mode)",
            source_dir.display(),
            backend.mode().as_str()
        );

        Ok(Self {
            source_dir,
            backend: Some(backend),
            shutdown,
            consumer,
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn mode(&self) -> Option<WatchMode> {
        self.backend.as_ref().map(Backend::mode)
    }

    /// Stop accepting events and wait for the in-flight one to finish
    pub async fn stop(mut self) {
        // Dropping the backend detaches it and closes the event channel
        self.backend.take();
        let _ = self.shutdown.send(());
        if let Err(e) = (&mut self.consumer).await {
            error!("Watch consumer for {} ended abnormally: {}", self.source_dir.display(), e);
        }
        debug!("Stopped watching {}", self.source_dir.display());
    }
}

async fn consume(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    mut shutdown: broadcast::Receiver<()>,
    pipeline: Arc<Pipeline>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                debug!("File {:?}: {}", event.kind, event.event_path.display());
                pipeline.process(&event.event_path, &event.source_dir).await;
            }
        }
    }
}

/// The set of running watches owned by one engine
#[derive(Default)]
pub struct WatchSet {
    handles: Vec<WatchHandle>,
}

impl WatchSet {
    pub fn push(&mut self, handle: WatchHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.handles.iter().map(|h| h.source_dir.clone()).collect()
    }

    /// Stop every watch and wait until all of them have finished
    pub async fn stop_all(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let count = self.handles.len();
        futures::future::join_all(self.handles.drain(..).map(WatchHandle::stop)).await;
        info!("Stopped {} directory watch(es)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copier::Copier;
    use crate::filter::FilterRules;
    use crate::mapping::{MappingTable, PathStyle};
    use crate::notifier::LogNotifier;
    use crate::pipeline::RuleSet;
    use notify::event::{DataChange, ModifyKind, RemoveKind};
    use std::time::Instant;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_normalize_create_and_modify() {
        let src = Path::new("/nonexistent-src");
        let created = normalize(&event(EventKind::Create(CreateKind::File), &["/nonexistent-src/a"]), src);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, ChangeKind::Created);
        assert_eq!(created[0].source_dir, src);

        let modified = normalize(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/nonexistent-src/a"],
            ),
            src,
        );
        assert_eq!(modified[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_normalize_drops_folders_and_removals() {
        let src = Path::new("/nonexistent-src");
        assert!(normalize(&event(EventKind::Create(CreateKind::Folder), &["/nonexistent-src/d"]), src).is_empty());
        assert!(normalize(&event(EventKind::Remove(RemoveKind::File), &["/nonexistent-src/a"]), src).is_empty());
        assert!(normalize(
            &event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/nonexistent-src/a"]),
            src
        )
        .is_empty());
    }

    #[test]
    fn test_normalize_rename_uses_new_path() {
        let src = Path::new("/nonexistent-src");
        let moved = normalize(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/elsewhere/a.part", "/nonexistent-src/a.mkv"],
            ),
            src,
        );
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].event_path, PathBuf::from("/nonexistent-src/a.mkv"));
        assert_eq!(moved[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_normalize_drops_existing_directories() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("sub");
        std::fs::create_dir(&dir).unwrap();
        let events = normalize(
            &event(EventKind::Create(CreateKind::Any), &[dir.to_str().unwrap()]),
            temp.path(),
        );
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_directory() {
        let entry = MappingEntry {
            source_dir: PathBuf::from("/nonexistent/copywatch/src"),
            destination_dir: PathBuf::from("/nonexistent/copywatch/dst"),
        };
        let pipeline = Arc::new(Pipeline::new(RuleSet::default(), Arc::new(LogNotifier)));
        let result = WatchHandle::start(&entry, WatchMode::Responsive, pipeline);
        assert!(matches!(result, Err(MirrorError::WatchStart { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_responsive_watch_copies_new_file() {
        let temp = tempfile::Builder::new().prefix("watch").tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();

        let mapping =
            MappingTable::parse_with_style(&format!("{}:{}", src.display(), dst.display()), PathStyle::Unix);
        let entry = mapping.entries()[0].clone();
        let rules = RuleSet {
            mapping,
            filters: FilterRules::default(),
            notify: false,
            copier: Copier::default(),
        };
        let pipeline = Arc::new(Pipeline::new(rules, Arc::new(LogNotifier)));

        let mut watches = WatchSet::default();
        watches.push(WatchHandle::start(&entry, WatchMode::Responsive, pipeline).unwrap());

        // Move a finished file in so the first event already sees full content
        let staging = temp.path().join("staging.txt");
        std::fs::write(&staging, b"watched").unwrap();
        std::fs::rename(&staging, src.join("a.txt")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !dst.join("a.txt").exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        watches.stop_all().await;

        assert_eq!(std::fs::read(dst.join("a.txt")).unwrap(), b"watched");
        assert!(watches.is_empty());
    }
}
