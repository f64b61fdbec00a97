//! Language runners.
//!
//! A [`Runner`] executes one code block under a language runtime.
//! [`CommandRunner`] covers every interpreter that accepts a script path:
//! the block is written to a script file in a fresh temporary directory and
//! the interpreter is spawned on it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use doctest_core::{CodeBlock, RunnerSpec};

use crate::context::ExecutionContext;
use crate::process::{self, ProcessExit};

/// Raw outcome of one execution, before it is judged as a test result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The process ran to completion.
    Completed {
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
        /// 1-based line within the block's code, when the runtime reported one.
        error_line: Option<usize>,
    },
    /// The timeout elapsed and the process group was killed.
    TimedOut {
        stdout: String,
        stderr: String,
        duration: Duration,
        limit: Duration,
    },
    /// The run was cancelled while the block was executing.
    Cancelled { duration: Duration },
    /// The runtime could not be started.
    SpawnFailed { message: String, duration: Duration },
}

/// Capability: execute a code block.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, block: &CodeBlock, ctx: &ExecutionContext) -> ExecutionOutcome;
}

/// Runs a block by writing it to a script and invoking an interpreter on it.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: String,
    program: String,
    args: Vec<String>,
    extension: String,
    line_pattern: Option<Regex>,
}

impl CommandRunner {
    pub fn new(name: impl Into<String>, program: impl Into<String>, extension: &str) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            extension: extension.trim_start_matches('.').to_string(),
            line_pattern: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Pattern locating the failing line in stderr. `{file}` stands for the
    /// script's file name; capture group 1 is the line number.
    pub fn with_line_pattern(mut self, pattern: &str) -> Self {
        let expanded = pattern.replace("{file}", &regex::escape(&self.script_name()));
        match Regex::new(&expanded) {
            Ok(re) => self.line_pattern = Some(re),
            Err(e) => warn!(runner = %self.name, error = %e, "ignoring invalid line pattern"),
        }
        self
    }

    /// Build from a `[runners.<lang>]` config table.
    pub fn from_spec(name: &str, spec: &RunnerSpec) -> Self {
        let (program, args) = match spec.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        let runner = Self::new(name, program, &spec.extension).with_args(args);
        match &spec.line_pattern {
            Some(pattern) => runner.with_line_pattern(pattern),
            None => runner,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn script_name(&self) -> String {
        format!("doctest_block.{}", self.extension)
    }

    /// Last line reported for the script in `stderr`. Interpreters print the
    /// innermost frame last.
    fn error_line(&self, stderr: &str) -> Option<usize> {
        let re = self.line_pattern.as_ref()?;
        re.captures_iter(stderr)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
            .filter(|line| *line > 0)
            .last()
    }
}

#[async_trait]
impl Runner for CommandRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, block: &CodeBlock, ctx: &ExecutionContext) -> ExecutionOutcome {
        let started = Instant::now();
        let spawn_failed = |message: String| ExecutionOutcome::SpawnFailed {
            message,
            duration: started.elapsed(),
        };

        let script_dir = match tempfile::Builder::new().prefix("doctest-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return spawn_failed(format!("failed to create script directory: {e}")),
        };
        let script = script_dir.path().join(self.script_name());
        if let Err(e) = tokio::fs::write(&script, &block.code).await {
            return spawn_failed(format!("failed to write script: {e}"));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&script)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env);

        debug!(
            runner = %self.name,
            block = %block.id,
            program = %self.program,
            "spawning runtime"
        );

        let output = match process::run_supervised(command, ctx.timeout, &ctx.cancel).await {
            Ok(output) => output,
            Err(e) => return spawn_failed(format!("failed to start `{}`: {e}", self.program)),
        };
        let duration = started.elapsed();

        match output.exit {
            ProcessExit::Exited(status) => {
                let error_line = if status.success() {
                    None
                } else {
                    self.error_line(&output.stderr)
                };
                ExecutionOutcome::Completed {
                    exit_code: status.code(),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration,
                    error_line,
                }
            }
            ProcessExit::TimedOut => ExecutionOutcome::TimedOut {
                stdout: output.stdout,
                stderr: output.stderr,
                duration,
                limit: ctx.timeout,
            },
            ProcessExit::Cancelled => ExecutionOutcome::Cancelled { duration },
        }
    }
}
