//! System health checks for copywatch
//!
//! This module provides the `doctor` preflight checks that verify the
//! configuration and host are ready before the daemon is started.

use crate::config::{Config, WatchMode};
use crate::filter::FilterRules;
use crate::mapping::MappingTable;
use crate::schedule::parse_schedule;
use std::fs;
use std::path::Path;

/// Recommended inotify watch limit for large trees
pub const RECOMMENDED_MAX_USER_WATCHES: u64 = 524_288;

const INOTIFY_WATCHES_PATH: &str = "/proc/sys/fs/inotify/max_user_watches";
const WRITE_PROBE_NAME: &str = ".copywatch-doctor-probe";

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Mapping lines parse into usable entries
    pub mappings: CheckResult,
    /// Every mapped source directory exists
    pub sources: CheckResult,
    /// Every destination (or its nearest existing parent) is writable
    pub destinations: CheckResult,
    /// Exclude and include patterns compile
    pub patterns: CheckResult,
    /// Cron expression parses
    pub schedule: CheckResult,
    /// inotify watch limit (warning only)
    pub inotify: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

#[allow(dead_code)]
impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        let table = MappingTable::parse(&config.monitor_dirs);

        Self {
            mappings: Self::check_mappings(&table),
            sources: Self::check_sources(&table),
            destinations: Self::check_destinations(&table),
            patterns: Self::check_patterns(config),
            schedule: Self::check_schedule(config),
            inotify: Self::check_inotify(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_mappings(table: &MappingTable) -> CheckResult {
        let issues: Vec<String> = table.issues().iter().map(|i| i.to_string()).collect();

        match (table.len(), issues.is_empty()) {
            (0, true) => CheckResult::error_with_details(
                "No monitored directories configured",
                "Add 'source:destination' lines to monitor_dirs",
            ),
            (0, false) => {
                CheckResult::error_with_details("No usable monitored directories", issues.join("\n"))
            }
            (n, true) => CheckResult::ok(format!("{} mapping(s) configured", n)),
            (n, false) => CheckResult::warning_with_details(
                format!("{} mapping(s) usable, {} rejected", n, issues.len()),
                issues.join("\n"),
            ),
        }
    }

    fn check_sources(table: &MappingTable) -> CheckResult {
        let missing: Vec<String> = table
            .entries()
            .iter()
            .filter(|e| !e.source_dir.is_dir())
            .map(|e| e.source_dir.display().to_string())
            .collect();

        if table.is_empty() {
            CheckResult::warning("No source directories to check")
        } else if missing.is_empty() {
            CheckResult::ok("All source directories exist")
        } else {
            CheckResult::error_with_details(
                "Source directories missing",
                missing.join("\n"),
            )
        }
    }

    fn check_destinations(table: &MappingTable) -> CheckResult {
        let problems: Vec<String> = table
            .entries()
            .iter()
            .filter_map(|e| {
                probe_writable(&e.destination_dir)
                    .err()
                    .map(|reason| format!("{}: {}", e.destination_dir.display(), reason))
            })
            .collect();

        if table.is_empty() {
            CheckResult::warning("No destination directories to check")
        } else if problems.is_empty() {
            CheckResult::ok("All destination directories are writable")
        } else {
            CheckResult::error_with_details(
                "Destination directories not writable",
                problems.join("\n"),
            )
        }
    }

    fn check_patterns(config: &Config) -> CheckResult {
        let (rules, errors) = FilterRules::from_config(config);

        if errors.is_empty() {
            let count = rules.exclude_patterns().count();
            CheckResult::ok(format!("{} exclude pattern(s) compiled", count))
        } else {
            let details: Vec<String> = errors.iter().map(|e| e.reason()).collect();
            CheckResult::error_with_details("Invalid keyword patterns", details.join("\n"))
        }
    }

    fn check_schedule(config: &Config) -> CheckResult {
        let Some(expr) = config.schedule_expr() else {
            return CheckResult::ok("No scheduled full sync");
        };

        match parse_schedule(expr) {
            Ok(schedule) => match schedule.upcoming(chrono::Local).next() {
                Some(next) => CheckResult::ok_with_details(
                    "Schedule is valid",
                    format!("Next run: {}", next.format("%Y-%m-%d %H:%M:%S")),
                ),
                None => CheckResult::warning("Schedule has no upcoming runs"),
            },
            Err(e) => CheckResult::error_with_details("Invalid schedule", e.reason()),
        }
    }

    /// Check inotify limits (warning only)
    fn check_inotify(config: &Config) -> CheckResult {
        if config.mode == WatchMode::Compatible {
            return CheckResult::ok("Compatible mode does not use inotify");
        }

        match fs::read_to_string(INOTIFY_WATCHES_PATH) {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(limit) if limit >= RECOMMENDED_MAX_USER_WATCHES => {
                    CheckResult::ok(format!("inotify max_user_watches is {}", limit))
                }
                Ok(limit) => CheckResult::warning_with_details(
                    format!("inotify max_user_watches is low ({})", limit),
                    format!(
                        "Large trees may exhaust it. Run:\n\
                         echo fs.inotify.max_user_watches={} | sudo tee -a /etc/sysctl.conf\n\
                         sudo sysctl -p",
                        RECOMMENDED_MAX_USER_WATCHES
                    ),
                ),
                Err(_) => CheckResult::warning("Could not parse inotify max_user_watches"),
            },
            Err(_) => CheckResult::ok("inotify limits not applicable on this platform"),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 6] {
        [
            ("Monitored Directories", &self.mappings),
            ("Source Directories", &self.sources),
            ("Destination Directories", &self.destinations),
            ("Keyword Patterns", &self.patterns),
            ("Schedule", &self.schedule),
            ("inotify Limits", &self.inotify),
        ]
    }
}

/// Try to create and remove a file in `dir`, or in its nearest existing ancestor
fn probe_writable(dir: &Path) -> Result<(), String> {
    let existing = dir
        .ancestors()
        .find(|p| p.exists())
        .ok_or_else(|| "no existing parent directory".to_string())?;

    if !existing.is_dir() {
        return Err(format!("{} is not a directory", existing.display()));
    }

    let probe = existing.join(WRITE_PROBE_NAME);
    fs::write(&probe, b"").map_err(|e| e.to_string())?;
    let _ = fs::remove_file(&probe);
    Ok(())
}
