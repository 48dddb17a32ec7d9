//! Common test utilities and helpers for copywatch tests
#![allow(dead_code)]

use assert_fs::prelude::*;
use assert_fs::TempDir;
use copywatch::{ChannelNotifier, Config, Engine, MemoryConfigStore, Notification};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub use std::time::{Duration, Instant};

/// A source and destination tree inside one temporary directory
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub src: PathBuf,
    pub dst: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.child("src");
        src.create_dir_all().expect("Failed to create source dir");

        Self {
            src: src.path().to_path_buf(),
            dst: temp_dir.child("dst").path().to_path_buf(),
            temp_dir,
        }
    }

    /// `src:dst` mapping line for this environment
    pub fn mapping(&self) -> String {
        format!("{}:{}", self.src.display(), self.dst.display())
    }

    /// Configuration mirroring `src` into `dst`
    pub fn config(&self) -> Config {
        Config {
            monitor_dirs: self.mapping(),
            ..Default::default()
        }
    }

    /// Write a file under the source tree and return its path
    pub fn write_source(&self, relative: &str, content: &str) -> PathBuf {
        let child = self.temp_dir.child("src").child(relative);
        child.write_str(content).expect("Failed to write source file");
        child.path().to_path_buf()
    }

    pub fn destination(&self, relative: &str) -> PathBuf {
        self.dst.join(relative)
    }

    /// Write a config file next to the trees and return its path
    pub fn create_config_file(&self, config: &Config) -> PathBuf {
        let path = self.temp_dir.child("config.yml");
        path.write_str(&serde_yaml::to_string(config).expect("Failed to serialize config"))
            .expect("Failed to write config");
        path.path().to_path_buf()
    }
}

/// An engine over an in-memory store with captured notifications
pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryConfigStore>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl TestEngine {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryConfigStore::new(config));
        let (notifier, notifications) = ChannelNotifier::new();

        Self {
            engine: Engine::new(store.clone(), Arc::new(notifier)),
            store,
            notifications,
        }
    }

    /// Notifications received so far
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            received.push(notification);
        }
        received
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Number of regular files below `root`
pub fn count_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
