//! Run configuration.
//!
//! Loaded once at startup from `doctest.toml` (or an explicit path), merged
//! with command-line overrides, validated, and then treated as an immutable
//! snapshot for the rest of the invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::parser::ParseOptions;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "doctest.toml";

/// Default per-block timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// A custom language runner declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSpec {
    /// Program and leading arguments; the script path is appended.
    pub command: Vec<String>,
    /// Script file extension, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Additional language tags served by this runner.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Regex locating the failing line in stderr. `{file}` is replaced by the
    /// escaped script file name; the first capture group is the line.
    #[serde(default)]
    pub line_pattern: Option<String>,
}

fn default_extension() -> String {
    "txt".to_string()
}

/// Watch-mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    /// Quiet period before a burst of changes triggers a run.
    pub debounce_ms: u64,
    /// Interval between filesystem polls.
    pub poll_interval_ms: u64,
    /// Do not run for the initial snapshot.
    pub ignore_initial: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            poll_interval_ms: 200,
            ignore_initial: true,
        }
    }
}

/// Validator rule switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Reject documents with two headings that produce the same anchor.
    pub unique_anchors: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            unique_anchors: true,
        }
    }
}

/// Complete configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocTestConfig {
    /// Per-block timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of blocks executing at once.
    pub max_workers: usize,
    /// Regex selecting blocks by `<file>:<line>` name or language tag.
    pub filter: Option<String>,
    pub debug: bool,
    pub verbose: bool,
    /// Language for fences without a tag.
    pub default_language: Option<String>,
    /// Read annotations (skip, group, timeout, ...) from fence lines.
    pub parse_metadata: bool,
    /// Working directory for executed blocks. A fresh temporary directory is
    /// used per block (or per group) when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for executed blocks.
    pub env: BTreeMap<String, String>,
    /// Custom runners keyed by language tag.
    pub runners: BTreeMap<String, RunnerSpec>,
    pub watch: WatchSettings,
    pub validation: ValidationSettings,
}

impl Default for DocTestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_workers: default_workers(),
            filter: None,
            debug: false,
            verbose: false,
            default_language: None,
            parse_metadata: true,
            working_dir: None,
            env: BTreeMap::new(),
            runners: BTreeMap::new(),
            watch: WatchSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub timeout_ms: Option<u64>,
    pub max_workers: Option<usize>,
    pub filter: Option<String>,
    pub debug: bool,
    pub verbose: bool,
}

impl DocTestConfig {
    /// Parse a TOML document. `origin` names the source in errors.
    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&contents, &path.display().to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Load `doctest.toml` from `dir` if present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading config");
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(max_workers) = overrides.max_workers {
            self.max_workers = max_workers;
        }
        if overrides.filter.is_some() {
            self.filter = overrides.filter;
        }
        self.debug |= overrides.debug;
        self.verbose |= overrides.verbose;
        self.validate()?;
        Ok(self)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "must be greater than zero"));
        }
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(invalid("watch.poll_interval_ms", "must be greater than zero"));
        }
        self.filter_regex()?;

        for (language, spec) in &self.runners {
            if spec.command.is_empty() || spec.command[0].trim().is_empty() {
                return Err(invalid(
                    &format!("runners.{language}.command"),
                    "must name a program",
                ));
            }
            if let Some(pattern) = &spec.line_pattern {
                let sample = pattern.replace("{file}", "script");
                Regex::new(&sample).map_err(|e| {
                    invalid(&format!("runners.{language}.line_pattern"), &e.to_string())
                })?;
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Compiled block filter, if one is configured.
    pub fn filter_regex(&self) -> Result<Option<Regex>, ConfigError> {
        match &self.filter {
            Some(pattern) if !pattern.is_empty() => Ok(Some(Regex::new(pattern)?)),
            _ => Ok(None),
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            default_language: self.default_language.clone(),
            parse_metadata: self.parse_metadata,
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DocTestConfig::default();
        assert_eq!(cfg.timeout_ms, 5_000);
        assert!(cfg.max_workers >= 1);
        assert!(cfg.parse_metadata);
        assert!(cfg.watch.ignore_initial);
        assert!(cfg.validation.unique_anchors);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_full_file() {
        let toml = r#"
            timeout_ms = 250
            max_workers = 2
            filter = "guide"
            default_language = "sh"

            [env]
            GREETING = "hello"

            [runners.lua]
            command = ["lua"]
            extension = "lua"
            aliases = ["luajit"]
            line_pattern = '{file}:(\d+):'

            [watch]
            debounce_ms = 50
        "#;
        let cfg = DocTestConfig::from_toml_str(toml, "inline").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.timeout(), Duration::from_millis(250));
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.env.get("GREETING").map(String::as_str), Some("hello"));
        assert_eq!(cfg.runners["lua"].aliases, vec!["luajit".to_string()]);
        assert_eq!(cfg.watch.debounce_ms, 50);
        assert_eq!(cfg.watch.poll_interval_ms, 200);
        assert_eq!(cfg.parse_options().default_language.as_deref(), Some("sh"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = DocTestConfig::from_toml_str("timeout = 5", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = DocTestConfig {
            timeout_ms: 0,
            ..DocTestConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "timeout_ms"),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_filter_rejected() {
        let cfg = DocTestConfig {
            filter: Some("(unclosed".to_string()),
            ..DocTestConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidFilter(_))));
    }

    #[test]
    fn test_runner_without_command_rejected() {
        let toml = r#"
            [runners.lua]
            command = []
        "#;
        let cfg = DocTestConfig::from_toml_str(toml, "inline").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let cfg = DocTestConfig::default()
            .with_overrides(ConfigOverrides {
                timeout_ms: Some(100),
                max_workers: Some(1),
                filter: Some("README".to_string()),
                debug: true,
                verbose: false,
            })
            .unwrap();
        assert_eq!(cfg.timeout_ms, 100);
        assert_eq!(cfg.max_workers, 1);
        assert!(cfg.debug);
        assert!(cfg.filter_regex().unwrap().unwrap().is_match("README.md:3"));
    }

    #[test]
    fn test_overrides_are_validated() {
        let err = DocTestConfig::default()
            .with_overrides(ConfigOverrides {
                max_workers: Some(0),
                ..ConfigOverrides::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_discover_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DocTestConfig::discover(dir.path()).unwrap();
        assert_eq!(cfg, DocTestConfig::default());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "timeout_ms = 42\n").unwrap();
        let cfg = DocTestConfig::discover(dir.path()).unwrap();
        assert_eq!(cfg.timeout_ms, 42);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = DocTestConfig::load(Path::new("/no/such/doctest.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
