//! Path Mapper - turns the `monitor_dirs` text into source/destination pairs
//!
//! Each non-empty line is either `source` or `source:destination`. On Windows
//! the drive letter carries its own colon, so a line only has two segments
//! when it contains more than one colon, and the split happens at the colon
//! that follows the source path rather than the first one.
//!
//! Lines that cannot be copied from (no destination, destination inside the
//! source, malformed) are kept out of the table and reported as issues.

use path_clean::PathClean;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How mapping lines separate source from destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Single `:` separator
    Unix,
    /// Drive letters contain `:`; split by counting colons
    Windows,
}

impl PathStyle {
    /// Style of the platform we are running on
    pub fn host() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        }
    }
}

/// A validated source/destination pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingEntry {
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
}

/// Why a configured line was left out of the mapping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingIssue {
    /// Only a source directory was given
    MissingDestination { source_dir: PathBuf },
    /// The destination lies inside the source, which would re-trigger the watch
    DestinationInsideSource {
        source_dir: PathBuf,
        destination_dir: PathBuf,
    },
    /// The line could not be split into at most two paths
    Malformed { line: String, reason: String },
}

impl fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingIssue::MissingDestination { source_dir } => write!(
                f,
                "{} has no destination directory configured, files will not be copied",
                source_dir.display()
            ),
            MappingIssue::DestinationInsideSource {
                source_dir,
                destination_dir,
            } => write!(
                f,
                "{} is inside monitored directory {}, it cannot be watched",
                destination_dir.display(),
                source_dir.display()
            ),
            MappingIssue::Malformed { line, reason } => {
                write!(f, "Invalid monitor directory line '{}': {}", line, reason)
            }
        }
    }
}

/// The full set of mappings built from one configuration load
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
    index: HashMap<PathBuf, usize>,
    issues: Vec<MappingIssue>,
}

impl MappingTable {
    /// Parse `monitor_dirs` for the host platform
    pub fn parse(text: &str) -> Self {
        Self::parse_with_style(text, PathStyle::host())
    }

    pub fn parse_with_style(text: &str, style: PathStyle) -> Self {
        let mut table = MappingTable::default();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line, style) {
                Ok(entry) => table.insert(entry),
                Err(issue) => {
                    warn!("{}", issue);
                    table.issues.push(issue);
                }
            }
        }

        debug!(
            "Built mapping table: {} valid, {} rejected",
            table.entries.len(),
            table.issues.len()
        );

        table
    }

    fn insert(&mut self, entry: MappingEntry) {
        if let Some(&existing) = self.index.get(&entry.source_dir) {
            // Later lines win for a repeated source directory
            warn!(
                "{} is configured more than once, using destination {}",
                entry.source_dir.display(),
                entry.destination_dir.display()
            );
            self.entries[existing] = entry;
            return;
        }
        self.index.insert(entry.source_dir.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Valid entries in configuration order
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Lines rejected during parsing
    pub fn issues(&self) -> &[MappingIssue] {
        &self.issues
    }

    pub fn lookup(&self, source_dir: &Path) -> Option<&MappingEntry> {
        self.index.get(source_dir).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str, style: PathStyle) -> Result<MappingEntry, MappingIssue> {
    let (source, destination) = split_line(line, style)?;

    let source_dir = expand(source, line)?;
    let destination = match destination.map(str::trim).filter(|d| !d.is_empty()) {
        Some(destination) => destination,
        None => return Err(MappingIssue::MissingDestination { source_dir }),
    };
    let destination_dir = expand(destination, line)?;

    if destination_dir.starts_with(&source_dir) {
        return Err(MappingIssue::DestinationInsideSource {
            source_dir,
            destination_dir,
        });
    }

    Ok(MappingEntry {
        source_dir,
        destination_dir,
    })
}

/// Split a line into its source and optional destination segment
fn split_line(line: &str, style: PathStyle) -> Result<(&str, Option<&str>), MappingIssue> {
    match style {
        PathStyle::Unix => {
            let mut parts = line.splitn(3, ':');
            let source = parts.next().unwrap_or_default();
            let destination = parts.next();
            if parts.next().is_some() {
                return Err(MappingIssue::Malformed {
                    line: line.to_string(),
                    reason: "expected 'source:destination'".to_string(),
                });
            }
            Ok((source, destination))
        }
        PathStyle::Windows => {
            let colons: Vec<usize> = line.match_indices(':').map(|(i, _)| i).collect();
            if colons.len() <= 1 {
                return Ok((line, None));
            }
            // A drive letter is a single character followed by ':'
            let split_at = if colons[0] == 1 { colons[1] } else { colons[0] };
            let (source, rest) = line.split_at(split_at);
            let destination = &rest[1..];
            if destination.matches(':').count() > 1 {
                return Err(MappingIssue::Malformed {
                    line: line.to_string(),
                    reason: "expected 'C:\\source:D:\\destination'".to_string(),
                });
            }
            Ok((source, Some(destination)))
        }
    }
}

fn expand(raw: &str, line: &str) -> Result<PathBuf, MappingIssue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MappingIssue::Malformed {
            line: line.to_string(),
            reason: "empty source directory".to_string(),
        });
    }
    let expanded = shellexpand::full(raw).map_err(|e| MappingIssue::Malformed {
        line: line.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()).clean())
}
