//! Path filters applied before any destination is resolved
//!
//! Rules are checked in this order:
//! - recycle bin, hidden and NAS metadata folders are always skipped
//! - exclude keywords (regex, case-sensitive, first match wins)
//! - include keywords (regex, case-insensitive, at least one must match)
//! - extension allow-list (case-insensitive)

use crate::config::Config;
use crate::error::MirrorError;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path};

/// Recycle bin folders used by Synology / QNAP shares
const RECYCLE_DIRS: &[&str] = &["@Recycle", "#recycle", "$RECYCLE.BIN"];

/// Thumbnail and index folders maintained by NAS and OS services
const SYSTEM_DIRS: &[&str] = &["@eaDir", "System Volume Information"];

const HIDDEN_PREFIX: char = '.';

/// Why a path was filtered out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    RecycleOrHidden,
    Excluded { pattern: String },
    NotIncluded,
    Extension { extension: String },
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::RecycleOrHidden => write!(f, "recycle bin, hidden or system file"),
            FilterReason::Excluded { pattern } => write!(f, "matches exclude keyword '{}'", pattern),
            FilterReason::NotIncluded => write!(f, "matches no include keyword"),
            FilterReason::Extension { extension } if extension.is_empty() => {
                write!(f, "has no extension and a format list is configured")
            }
            FilterReason::Extension { extension } => {
                write!(f, "extension '{}' is not in the format list", extension)
            }
        }
    }
}

/// Compiled filter configuration
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    exclude: Vec<Regex>,
    include: Vec<Regex>,
    extensions: HashSet<String>,
}

impl FilterRules {
    /// Compile the filters of a configuration.
    ///
    /// Patterns that fail to compile are dropped and returned alongside the
    /// rules so the caller can surface them.
    pub fn from_config(config: &Config) -> (Self, Vec<MirrorError>) {
        let mut errors = Vec::new();

        let exclude = compile_patterns(&config.exclude_keywords, false, "exclude", &mut errors);
        let include = compile_patterns(&config.include_keywords, true, "include", &mut errors);
        let extensions = parse_extensions(&config.file_formats);

        (
            Self {
                exclude,
                include,
                extensions,
            },
            errors,
        )
    }

    /// Returns why `path` must not be copied, or `None` when it passes.
    ///
    /// `source_dir` limits the recycle/hidden check to the part of the path
    /// below the monitored directory, so a monitored directory that itself
    /// lives under a dot-folder still works.
    pub fn check(&self, path: &Path, source_dir: &Path) -> Option<FilterReason> {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        if is_recycle_or_hidden(relative) {
            return Some(FilterReason::RecycleOrHidden);
        }

        let path_str = path.to_string_lossy();

        if let Some(pattern) = self.exclude.iter().find(|re| re.is_match(&path_str)) {
            return Some(FilterReason::Excluded {
                pattern: pattern.as_str().to_string(),
            });
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&path_str)) {
            return Some(FilterReason::NotIncluded);
        }

        if !self.extensions.is_empty() {
            let extension = extension_of(path);
            if !self.extensions.contains(&extension) {
                return Some(FilterReason::Extension { extension });
            }
        }

        None
    }

    pub fn exclude_patterns(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(Regex::as_str)
    }

    pub fn allowed_extensions(&self) -> &HashSet<String> {
        &self.extensions
    }
}

/// Whether any component is a recycle bin, system folder or hidden entry
pub fn is_recycle_or_hidden(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with(HIDDEN_PREFIX)
                || RECYCLE_DIRS.contains(&name.as_ref())
                || SYSTEM_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

/// Lower-cased extension with its leading dot, or an empty string
fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn parse_extensions(formats: &str) -> HashSet<String> {
    formats
        .split(',')
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .map(|f| if f.starts_with('.') { f } else { format!(".{}", f) })
        .collect()
}

fn compile_patterns(
    text: &str,
    case_insensitive: bool,
    kind: &str,
    errors: &mut Vec<MirrorError>,
) -> Vec<Regex> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|pattern| {
            match RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
            {
                Ok(re) => Some(re),
                Err(e) => {
                    errors.push(MirrorError::configuration(format!(
                        "{} keyword '{}' is not a valid regular expression: {}",
                        kind, pattern, e
                    )));
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    fn rules(exclude: &str, include: &str, formats: &str) -> FilterRules {
        let config = Config {
            exclude_keywords: exclude.to_string(),
            include_keywords: include.to_string(),
            file_formats: formats.to_string(),
            ..Default::default()
        };
        let (rules, errors) = FilterRules::from_config(&config);
        assert!(errors.is_empty());
        rules
    }

    #[test]
    fn test_empty_rules_pass_everything_visible() {
        let rules = FilterRules::default();
        assert_eq!(rules.check(Path::new("/src/a.txt"), Path::new("/src")), None);
        assert_eq!(rules.check(Path::new("/src/noext"), Path::new("/src")), None);
    }

    #[test]
    fn test_recycle_hidden_and_system_segments() {
        let rules = FilterRules::default();
        let src = Path::new("/volume1/share");
        for path in [
            "/volume1/share/@Recycle/a.mkv",
            "/volume1/share/#recycle/a.mkv",
            "/volume1/share/movies/.a.mkv.part",
            "/volume1/share/.cache/a.mkv",
            "/volume1/share/movies/@eaDir/a.mkv/SYNOPHOTO_THUMB_XL.jpg",
        ] {
            assert_eq!(
                rules.check(Path::new(path), src),
                Some(FilterReason::RecycleOrHidden),
                "{}",
                path
            );
        }
    }

    #[test]
    fn test_hidden_check_is_relative_to_source() {
        let rules = FilterRules::default();
        let src = Path::new("/home/user/.local/share/inbox");
        assert_eq!(rules.check(&src.join("a.txt"), src), None);
        assert_eq!(
            rules.check(&src.join(".hidden"), src),
            Some(FilterReason::RecycleOrHidden)
        );
    }

    #[test]
    fn test_exclude_first_match_wins() {
        let rules = rules("draft\nreport", "", "");
        assert_matches!(
            rules.check(Path::new("/src/draft_report.docx"), Path::new("/src")),
            Some(FilterReason::Excluded { pattern }) if pattern == "draft"
        );
        assert_eq!(rules.check(Path::new("/src/final.docx"), Path::new("/src")), None);
    }

    #[test]
    fn test_exclude_beats_extension_allow_list() {
        let rules = rules(r"\.tmp\.", "", ".jpg");
        assert_matches!(
            rules.check(Path::new("/src/a.tmp.jpg"), Path::new("/src")),
            Some(FilterReason::Excluded { .. })
        );
    }

    #[test]
    fn test_include_keywords_are_case_insensitive() {
        let rules = rules("", "s01e\\d+", "");
        assert_eq!(rules.check(Path::new("/src/Show.S01E02.mkv"), Path::new("/src")), None);
        assert_eq!(
            rules.check(Path::new("/src/other.mkv"), Path::new("/src")),
            Some(FilterReason::NotIncluded)
        );
    }

    #[test]
    fn test_extension_allow_list() {
        let rules = rules("", "", ".jpg, PNG");
        assert!(rules.allowed_extensions().contains(".png"));
        assert_eq!(rules.check(Path::new("/src/a.JPG"), Path::new("/src")), None);
        assert_eq!(rules.check(Path::new("/src/b.png"), Path::new("/src")), None);
        assert_eq!(
            rules.check(Path::new("/src/doc.txt"), Path::new("/src")),
            Some(FilterReason::Extension {
                extension: ".txt".to_string()
            })
        );
        assert_matches!(
            rules.check(Path::new("/src/README"), Path::new("/src")),
            Some(FilterReason::Extension { extension }) if extension.is_empty()
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported_and_dropped() {
        let config = Config {
            exclude_keywords: "(unclosed\nvalid".to_string(),
            ..Default::default()
        };
        let (rules, errors) = FilterRules::from_config(&config);
        assert_eq!(errors.len(), 1);
        assert_matches!(&errors[0], MirrorError::Configuration { reason } if reason.contains("(unclosed"));
        assert_eq!(rules.exclude_patterns().collect::<Vec<_>>(), vec!["valid"]);
    }

    #[quickcheck]
    fn prop_hidden_segment_always_filtered(name: String, depth: u8) -> bool {
        let name: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
        let mut path = std::path::PathBuf::from("/src");
        for i in 0..(depth % 3) {
            path.push(format!("dir{}", i));
        }
        path.push(format!(".{}", name));
        path.push("file.jpg");
        rules("", "", ".jpg").check(&path, Path::new("/src")) == Some(FilterReason::RecycleOrHidden)
    }
}
