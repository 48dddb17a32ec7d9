//! Daemon Infrastructure - Background service hosting the mirror engine
//!
//! This module runs the engine as a long-lived process with PID file
//! management, graceful shutdown on Ctrl+C/SIGTERM and configuration hot
//! reload on SIGHUP.

use crate::config::{Config, ConfigStore};
use crate::engine::{Engine, EngineStatus};
use crate::notifier::Notifier;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Daemon state and control
pub struct Daemon {
    engine: Arc<Engine>,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
    started: Instant,
}

/// Daemon statistics and status
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub uptime: Duration,
    pub engine: EngineStatus,
}

/// What an OS signal asks the daemon to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonSignal {
    Shutdown,
    Reload,
}

impl Daemon {
    /// Create a daemon around a fresh engine
    pub fn new(config: &Config, store: Arc<dyn ConfigStore>, notifier: Arc<dyn Notifier>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            engine: Arc::new(Engine::new(store, notifier)),
            shutdown_sender,
            is_running: Arc::new(AtomicBool::new(false)),
            pid_file_path: pid_file_path(config),
            started: Instant::now(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Sender that stops [`Daemon::run`] when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Run the daemon in the current process until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Starting copywatch daemon");

        self.write_pid_file().context("Failed to write PID file")?;
        let shutdown_receiver = self.shutdown_sender.subscribe();
        self.is_running.store(true, Ordering::SeqCst);

        let result = self.daemon_loop(shutdown_receiver).await;

        self.engine.shutdown().await;
        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Get current daemon status
    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            uptime: self.started.elapsed(),
            engine: self.engine.status(),
        }
    }

    /// Main daemon loop - waits for shutdown and reload requests
    async fn daemon_loop(&self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let mut signals = Signals::install().context("Failed to install signal handlers")?;

        let status = self
            .engine
            .reload()
            .await
            .context("Failed to start mirror engine")?;
        info!(
            "Daemon ready: watching {} directories{}",
            status.watched.len(),
            if status.scheduled { ", scheduled full sync installed" } else { "" }
        );

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown requested");
                    break;
                }

                signal = signals.next() => match signal {
                    DaemonSignal::Shutdown => {
                        info!("Shutdown signal received, stopping daemon...");
                        break;
                    }
                    DaemonSignal::Reload => {
                        info!("Reload signal received, reloading configuration");
                        // A configuration that fails to load leaves the running watches untouched
                        if let Err(e) = self.engine.reload().await {
                            error!("Configuration reload failed: {:#}", e);
                        }
                    }
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon loop exiting");
        Ok(())
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }
}

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> DaemonSignal {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                debug!("Ctrl+C received");
                DaemonSignal::Shutdown
            }
            _ = self.terminate.recv() => {
                debug!("SIGTERM received");
                DaemonSignal::Shutdown
            }
            _ = self.hangup.recv() => {
                debug!("SIGHUP received");
                DaemonSignal::Reload
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> DaemonSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            futures::future::pending::<()>().await;
        }
        DaemonSignal::Shutdown
    }
}

/// Detach from the terminal (Unix platforms).
///
/// Must run before the async runtime is started; only the calling thread
/// survives the fork. Output is redirected to the configured log file.
#[cfg(unix)]
pub fn daemonize(config: &Config) -> Result<()> {
    use daemonize::Daemonize;

    let mut daemonize = Daemonize::new().working_directory("/");

    if !config.daemon.log_file.is_empty() {
        let log_path = PathBuf::from(&config.daemon.log_file);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context("Failed to open log file")?;
        daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
    }

    daemonize.start().context("Failed to daemonize process")?;
    Ok(())
}

/// PID file location from configuration, if one is configured
pub fn pid_file_path(config: &Config) -> Option<PathBuf> {
    if config.daemon.pid_file.is_empty() {
        None
    } else {
        Some(PathBuf::from(&config.daemon.pid_file))
    }
}

/// PID recorded in the PID file, if the file exists
pub fn read_pid(config: &Config) -> Result<Option<u32>> {
    let Some(pid_file) = pid_file_path(config) else {
        return Ok(None);
    };
    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;
    let pid = pid_str.trim().parse().context("Invalid PID in PID file")?;
    Ok(Some(pid))
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    let Some(pid) = read_pid(config)? else {
        return Ok(false);
    };

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => {
                // Process doesn't exist, remove stale PID file
                if let Some(pid_file) = pid_file_path(config) {
                    let _ = fs::remove_file(pid_file);
                }
                Ok(false)
            }
            // Assume running if we can't check
            Err(_) => Ok(true),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(true)
    }
}

/// Ask a running daemon to shut down
pub fn stop_daemon(config: &Config) -> Result<()> {
    signal_daemon(config, DaemonSignal::Shutdown)
}

/// Ask a running daemon to reload its configuration
pub fn reload_daemon(config: &Config) -> Result<()> {
    signal_daemon(config, DaemonSignal::Reload)
}

#[cfg(unix)]
fn signal_daemon(config: &Config, request: DaemonSignal) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = read_pid(config)?.context("PID file not found, daemon may not be running")?;
    let sig = match request {
        DaemonSignal::Shutdown => Signal::SIGTERM,
        DaemonSignal::Reload => Signal::SIGHUP,
    };

    signal::kill(Pid::from_raw(pid as i32), sig)
        .with_context(|| format!("Failed to send {} to daemon process {}", sig, pid))?;

    info!("Sent {} to daemon process {}", sig, pid);
    Ok(())
}

#[cfg(not(unix))]
fn signal_daemon(_config: &Config, _request: DaemonSignal) -> Result<()> {
    anyhow::bail!("Signalling the daemon is not supported on this platform")
}
