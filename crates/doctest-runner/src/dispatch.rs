//! Runner dispatch: turn one code block into one [`TestResult`].
//!
//! Dispatch never returns an error. Unsupported languages, spawn failures,
//! non-zero exits and timeouts are all recorded as failed results.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use doctest_core::{CodeBlock, ErrorKind, SkipReason, TestError, TestResult};

use crate::context::ExecutionContext;
use crate::registry::RunnerRegistry;
use crate::runner::ExecutionOutcome;

/// Routes blocks to the runner registered for their language.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<RunnerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: RunnerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// Execute `block` and judge the outcome.
    pub async fn dispatch(&self, block: &CodeBlock, ctx: &ExecutionContext) -> TestResult {
        if block.is_skipped() {
            return TestResult::skipped(block.id.clone(), &block.language, SkipReason::Annotated);
        }
        if ctx.cancel.is_cancelled() {
            return TestResult::skipped(block.id.clone(), &block.language, SkipReason::Cancelled);
        }

        let Some(runner) = self.registry.get(&block.language) else {
            let message = if block.language.is_empty() {
                "code block has no language tag and no default language is configured".to_string()
            } else {
                format!("no runner registered for language `{}`", block.language)
            };
            return TestResult::failed(
                block.id.clone(),
                &block.language,
                0,
                TestError {
                    kind: ErrorKind::UnsupportedLanguage,
                    message,
                    line: block.line(),
                },
                None,
            );
        };

        let outcome = match block.timeout() {
            Some(timeout) => {
                let ctx = ctx.clone().with_timeout(timeout);
                runner.execute(block, &ctx).await
            }
            None => runner.execute(block, ctx).await,
        };
        debug!(block = %block.id, runner = runner.name(), "execution finished");
        judge(block, outcome)
    }
}

/// Map a raw outcome to a test result, honouring `should-fail`.
pub fn judge(block: &CodeBlock, outcome: ExecutionOutcome) -> TestResult {
    let id = block.id.clone();
    let language = block.language.as_str();

    match outcome {
        ExecutionOutcome::Completed {
            exit_code,
            stdout,
            stderr,
            duration,
            error_line,
        } => {
            let ms = millis(duration);
            let succeeded = exit_code == Some(0);
            let message = failure_message(&stderr, exit_code);
            let output = combine_output(stdout, stderr);

            match (succeeded, block.should_fail()) {
                (true, false) | (false, true) => TestResult::passed(id, language, ms, output),
                (true, true) => TestResult::failed(
                    id,
                    language,
                    ms,
                    TestError {
                        kind: ErrorKind::UnexpectedSuccess,
                        message: "block is marked should-fail but exited successfully"
                            .to_string(),
                        line: block.line(),
                    },
                    output,
                ),
                (false, false) => TestResult::failed(
                    id,
                    language,
                    ms,
                    TestError {
                        kind: ErrorKind::TestFailure,
                        message,
                        line: error_line
                            .map(|line| block.document_line(line))
                            .unwrap_or_else(|| block.line()),
                    },
                    output,
                ),
            }
        }
        ExecutionOutcome::TimedOut {
            stdout,
            stderr,
            duration,
            limit,
        } => TestResult::failed(
            id,
            language,
            millis(duration),
            TestError {
                kind: ErrorKind::Timeout,
                message: format!(
                    "execution exceeded {} ms and was terminated",
                    limit.as_millis()
                ),
                line: block.line(),
            },
            combine_output(stdout, stderr),
        ),
        ExecutionOutcome::Cancelled { .. } => {
            TestResult::skipped(id, language, SkipReason::Cancelled)
        }
        ExecutionOutcome::SpawnFailed { message, duration } => TestResult::failed(
            id,
            language,
            millis(duration),
            TestError {
                kind: ErrorKind::Spawn,
                message,
                line: block.line(),
            },
            None,
        ),
    }
}

fn failure_message(stderr: &str, exit_code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    match exit_code {
        Some(code) => format!("process exited with status {code}"),
        None => "process was terminated by a signal".to_string(),
    }
}

fn combine_output(stdout: String, stderr: String) -> Option<String> {
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => None,
        (false, true) => Some(stdout),
        (true, false) => Some(stderr),
        (false, false) => Some(stdout + &stderr),
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
