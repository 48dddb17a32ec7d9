use anyhow::{Context, Result};
use dirs::config_dir;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for copywatch
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Watch the monitored directories continuously
    #[serde(default)]
    pub enabled: bool,

    /// Send a notification for every copy and failure
    #[serde(default)]
    pub notify: bool,

    /// Run a single full sync shortly after loading, then clear this flag
    #[serde(default)]
    pub run_once: bool,

    /// Watch backend
    #[serde(default)]
    pub mode: WatchMode,

    /// One mapping per line: `source` or `source:destination`
    #[serde(default)]
    pub monitor_dirs: String,

    /// One regular expression per line; matching paths are never copied
    #[serde(default)]
    pub exclude_keywords: String,

    /// One regular expression per line; when set, only matching paths are copied
    #[serde(default)]
    pub include_keywords: String,

    /// Comma-separated extension allow-list, e.g. ".jpg,.png"
    #[serde(default)]
    pub file_formats: String,

    /// Cron expression for a periodic full sync
    #[serde(default)]
    pub schedule: Option<String>,

    /// Carry the source modification time over to the copy
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which filesystem event backend a watch uses
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS-native change notifications
    #[default]
    #[serde(alias = "fast")]
    Responsive,
    /// Fixed-interval directory scanning, for network shares and similar
    #[serde(alias = "compatibility")]
    Compatible,
}

impl WatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchMode::Responsive => "responsive",
            WatchMode::Compatible => "compatible",
        }
    }
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/copywatch.pid", runtime_dir)
    } else {
        "/tmp/copywatch.pid".to_string()
    }
}

fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/copywatch/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/copywatch/daemon.log", home)
    } else {
        "/tmp/copywatch-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file.
    ///
    /// Values are kept as written so that saving the result back does not
    /// bake in expanded paths; call [`Config::expand_paths`] on a copy
    /// before using the daemon paths.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("copywatch").join("config.yml"))
    }

    /// Expand environment variables in daemon paths.
    ///
    /// Mapping paths are expanded per line by the path mapper so that a bad
    /// line only drops that mapping.
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    /// Non-empty cron expression, if a periodic full sync is configured
    pub fn schedule_expr(&self) -> Option<&str> {
        self.schedule
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            notify: false,
            run_once: false,
            mode: WatchMode::default(),
            monitor_dirs: String::new(),
            exclude_keywords: String::new(),
            include_keywords: String::new(),
            file_formats: String::new(),
            schedule: None,
            preserve_timestamps: default_true(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Persisted configuration owned by the host.
///
/// The engine reads its configuration through this and writes it back when
/// it clears the `run_once` flag.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config>;

    fn save(&self, config: &Config) -> Result<()>;
}

/// YAML file backed store
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the XDG default location
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config> {
        if self.path.exists() {
            Config::load(&self.path)
        } else {
            Ok(Config::default())
        }
    }

    fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        config.save(&self.path)
    }
}

/// In-memory store for embedding hosts that keep configuration elsewhere
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Config>,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// Last configuration written to (or seeded into) the store
    pub fn current(&self) -> Config {
        self.config.lock().clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Config> {
        Ok(self.current())
    }

    fn save(&self, config: &Config) -> Result<()> {
        *self.config.lock() = config.clone();
        Ok(())
    }
}
