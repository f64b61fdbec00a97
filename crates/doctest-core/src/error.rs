//! Error taxonomy for DocTest.
//!
//! Execution failures (unsupported language, failing code, timeouts) are not
//! errors at this level: they are captured as data in
//! [`TestResult`](crate::result::TestResult). The enums here cover the
//! structural and environmental failures around a run.

use serde::{Deserialize, Serialize};

/// Which fence rule a document violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// An opening fence was never closed.
    Unterminated,
    /// A block was still open when a fence with an info string, at least as
    /// long as its opener, appeared. Reported at the unclosed opener.
    AmbiguousNesting,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::Unterminated => write!(f, "unterminated"),
            ParseErrorKind::AmbiguousNesting => write!(f, "ambiguous_nesting"),
        }
    }
}

/// Malformed document structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{file}:{line}: {message}")]
pub struct ParseError {
    pub file: String,
    /// 1-based line of the offending fence.
    pub line: usize,
    pub kind: ParseErrorKind,
    pub message: String,
}

impl ParseError {
    pub fn unterminated(file: &str, line: usize, fence: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            kind: ParseErrorKind::Unterminated,
            message: format!("unterminated code block opened with `{fence}`"),
        }
    }

    /// `line` is the still-open fence; `inner_line` the fence that opened
    /// inside it.
    pub fn ambiguous_nesting(file: &str, line: usize, inner_line: usize, fence: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            kind: ParseErrorKind::AmbiguousNesting,
            message: format!(
                "code block opened with `{fence}` is not closed before the fence at line {inner_line}; \
                 close it, or use a longer outer fence to nest the example"
            ),
        }
    }
}

/// Failure loading a document from disk.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid configuration value or unreadable configuration source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid filter pattern: {0}")]
    InvalidFilter(#[from] regex::Error),
}

/// Failure rendering a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("unknown report format: {0}")]
    UnknownFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("junit serialization error: {0}")]
    Junit(#[from] quick_junit::SerializeError),
}

/// Misuse of an [`Aggregator`](crate::aggregator::Aggregator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("result for slot {slot} already recorded")]
    Duplicate { slot: usize },

    #[error("slot {slot} out of range (run has {expected} blocks)")]
    OutOfRange { slot: usize, expected: usize },

    #[error("run incomplete: {completed} of {expected} blocks finished")]
    Incomplete { completed: usize, expected: usize },
}

/// Filesystem observation failure. Reported to subscribers; watching continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatcherError {
    #[error("watched path no longer exists: {path}")]
    PathMissing { path: String },

    #[error("failed to observe {path}: {message}")]
    Io { path: String, message: String },
}

/// Umbrella error for library consumers.
#[derive(Debug, thiserror::Error)]
pub enum DocTestError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("report error: {0}")]
    Report(#[from] ReportError),

    #[error("aggregate error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),
}

/// Result type for DocTest operations.
pub type Result<T> = std::result::Result<T, DocTestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_includes_location() {
        let err = ParseError::unterminated("guide.md", 12, "```");
        assert_eq!(err.kind, ParseErrorKind::Unterminated);
        assert!(err.to_string().starts_with("guide.md:12:"));
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_ambiguous_nesting_points_at_open_fence() {
        let err = ParseError::ambiguous_nesting("a.md", 3, 7, "```");
        assert_eq!(err.line, 3);
        assert!(err.message.contains("line 7"));
        assert!(err.to_string().starts_with("a.md:3:"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            field: "timeout_ms".to_string(),
            reason: "must be greater than zero".to_string(),
        };
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_umbrella_from_conversions() {
        let err: DocTestError = AggregateError::Duplicate { slot: 3 }.into();
        assert!(err.to_string().contains("slot 3"));

        let err: DocTestError = WatcherError::PathMissing {
            path: "docs/x.md".to_string(),
        }
        .into();
        assert!(err.to_string().contains("docs/x.md"));
    }
}
