//! Diagnostic logging for the `doctest` binary.
//!
//! Reports (json, markdown, text, junit) are the program's output and go to
//! stdout or the `--output` file. Everything logged here goes to stderr, so
//! piping a report into another tool never picks up log lines.
//!
//! Verbosity flags raise the level of DocTest's own crates only; block
//! execution, discovery and watch events log under `doctest_*` targets.
//! Dependencies stay at `warn` unless `RUST_LOG` says otherwise.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crate targets that follow the `--verbose`/`--debug` level.
const DOCTEST_TARGETS: &[&str] = &["doctest", "doctest_core", "doctest_runner"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(DOCTEST_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber on stderr.
///
/// `json` switches to newline-delimited JSON records, for CI log
/// collectors. A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(stderr.json()).try_init().ok();
    } else {
        registry.with(stderr).try_init().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_doctest_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,doctest=debug,doctest_core=debug,doctest_runner=debug"
        );
    }

    #[test]
    fn test_default_directives_parse() {
        for level in [Level::WARN, Level::DEBUG, Level::TRACE] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
