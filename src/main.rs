use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use copywatch::config::{ConfigStore, FileConfigStore, LoggingConfig};
use copywatch::daemon::{self, is_daemon_running};
use copywatch::health::CheckResult;
use copywatch::{Config, Daemon, Engine, HealthCheck, LogNotifier, MappingTable};

#[derive(Parser)]
#[command(name = "copywatch")]
#[command(about = "Event-driven one-way directory mirroring daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every missing file from all monitored directories once
    Sync {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how monitor_dirs is parsed
    Check,

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Reload daemon configuration
    Reload,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (store, config) = load_config(cli.config)?;

    // Forking has to happen before the runtime spawns its worker threads
    let background = matches!(
        cli.command,
        Commands::Daemon {
            daemon_command: DaemonCommands::Start { foreground: false }
        }
    );
    if background {
        if is_daemon_running(&config)? {
            println!("⚠️  Daemon is already running!");
            println!("   Use 'copywatch daemon stop' to stop it first");
            return Ok(());
        }
        start_background(&config)?;
    }

    init_logging(cli.verbose, &config.logging, !background)?;
    info!("Starting copywatch v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Sync { json } => cmd_sync(json, store, &config).await,
            Commands::Check => cmd_check(&config),
            Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, store, &config).await,
            Commands::Doctor => cmd_doctor(&config),
        }
    })
}

#[cfg(unix)]
fn start_background(config: &Config) -> Result<()> {
    println!("🚀 Starting copywatch daemon...");
    println!("   PID file: {}", config.daemon.pid_file);
    println!("   Log file: {}", config.daemon.log_file);
    daemon::daemonize(config)
}

#[cfg(not(unix))]
fn start_background(_config: &Config) -> Result<()> {
    anyhow::bail!("Background daemon mode not supported on this platform, use --foreground")
}

/// Initialize logging based on verbosity level and configuration
fn init_logging(verbose: bool, logging: &LoggingConfig, terminal: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let ansi = terminal && logging.color;
    // stdout is reserved for command output such as `sync --json`
    let layer = match logging.format.as_str() {
        "pretty" => fmt::layer().pretty().with_ansi(ansi).with_writer(std::io::stderr).boxed(),
        "full" => fmt::layer().with_ansi(ansi).with_writer(std::io::stderr).boxed(),
        _ => fmt::layer().compact().with_ansi(ansi).with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location.
///
/// The returned config has its daemon paths expanded; the store keeps
/// reading and writing the file as written.
fn load_config(config_path: Option<PathBuf>) -> Result<(Arc<dyn ConfigStore>, Config)> {
    let (store, mut config): (Arc<dyn ConfigStore>, Config) = match config_path {
        Some(path) => {
            // The daemon changes directory to / when it detaches
            let path = if path.is_relative() {
                std::env::current_dir()?.join(path)
            } else {
                path
            };
            let config = Config::load(&path)?;
            (Arc::new(FileConfigStore::new(path)), config)
        }
        None => {
            let config = Config::load_or_default()?;
            (Arc::new(FileConfigStore::default_location()?), config)
        }
    };

    config.expand_paths()?;
    Ok((store, config))
}

/// Run one full sync in the foreground
async fn cmd_sync(json: bool, store: Arc<dyn ConfigStore>, config: &Config) -> Result<()> {
    let engine = Engine::new(store, Arc::new(LogNotifier));

    // Rules only: no watches, no schedule, and a pending run_once stays pending
    let mut rules_only = config.clone();
    rules_only.enabled = false;
    rules_only.run_once = false;
    engine.apply(rules_only).await?;

    if !json {
        println!("🔄 Running full sync...");
    }
    let summary = engine.run_full_sync().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📊 Full sync finished in {:.2}s", summary.duration.as_secs_f64());
    println!("   Files seen: {}", summary.total_files);
    println!("   ✅ Copied: {}", summary.copied);
    println!("   ⏭️  Already present: {}", summary.skipped_existing);
    println!("   🚫 Filtered: {}", summary.skipped_filtered);
    if summary.skipped_not_mapped > 0 {
        println!("   ❓ Not mapped: {}", summary.skipped_not_mapped);
    }
    if summary.vanished > 0 {
        println!("   👻 Vanished: {}", summary.vanished);
    }
    if summary.failed > 0 {
        println!("   ❌ Failed: {}", summary.failed);
    }

    Ok(())
}

/// Print the parsed mapping table
fn cmd_check(config: &Config) -> Result<()> {
    let table = MappingTable::parse(&config.monitor_dirs);

    println!("📂 Monitored directories");
    if table.is_empty() {
        println!("   (none)");
    }
    for entry in table.entries() {
        println!(
            "   ✅ {} → {}",
            entry.source_dir.display(),
            entry.destination_dir.display()
        );
    }

    if !table.issues().is_empty() {
        println!();
        println!("⚠️  Rejected lines");
        for issue in table.issues() {
            println!("   ❌ {}", issue);
        }
    }

    Ok(())
}

async fn cmd_daemon(
    daemon_command: DaemonCommands,
    store: Arc<dyn ConfigStore>,
    config: &Config,
) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                if is_daemon_running(config)? {
                    println!("⚠️  Daemon is already running!");
                    println!("   Use 'copywatch daemon stop' to stop it first");
                    return Ok(());
                }
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            let daemon = Daemon::new(config, store, Arc::new(LogNotifier));
            daemon.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping copywatch daemon...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            daemon::stop_daemon(config)?;
            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 copywatch Daemon Status");

            if is_daemon_running(config)? {
                println!("   🟢 Status: Running");
                if let Some(pid) = daemon::read_pid(config)? {
                    println!("   🔢 PID: {}", pid);
                }
                println!("   👁️  Mode: {}", config.mode.as_str());
                println!(
                    "   📂 Mappings: {}",
                    MappingTable::parse(&config.monitor_dirs).len()
                );
                if let Some(schedule) = config.schedule_expr() {
                    println!("   ⏰ Full sync schedule: {}", schedule);
                }
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'copywatch daemon start' to start the daemon");
            }
        }

        DaemonCommands::Reload => {
            println!("🔄 Reloading daemon configuration...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            daemon::reload_daemon(config)?;
            println!("✅ Reload signal sent");
        }
    }

    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if !health.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 copywatch System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
