//! Per-block outcomes and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{BlockId, BlockStatus};

/// Terminal outcome of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl From<TestStatus> for BlockStatus {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Passed => BlockStatus::Passed,
            TestStatus::Failed => BlockStatus::Failed,
            TestStatus::Skipped => BlockStatus::Skipped,
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a failed block failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The code ran and exited non-zero.
    TestFailure,
    /// Execution exceeded its time bound and was killed.
    Timeout,
    /// No runner is registered for the block's language.
    UnsupportedLanguage,
    /// The language runtime could not be started.
    Spawn,
    /// A `should-fail` block exited successfully.
    UnexpectedSuccess,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::TestFailure => write!(f, "TestError"),
            ErrorKind::Timeout => write!(f, "TimeoutError"),
            ErrorKind::UnsupportedLanguage => write!(f, "UnsupportedLanguage"),
            ErrorKind::Spawn => write!(f, "SpawnError"),
            ErrorKind::UnexpectedSuccess => write!(f, "UnexpectedSuccess"),
        }
    }
}

/// Error captured from a failed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub kind: ErrorKind,
    pub message: String,
    /// Document line the error points at.
    pub line: usize,
}

/// Why a block did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The fence carried a skip annotation.
    Annotated,
    /// The run was cancelled before or during execution.
    Cancelled,
    /// An earlier block of the same sequential group failed.
    DependencyFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Annotated => write!(f, "annotated"),
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::DependencyFailed => write!(f, "dependency_failed"),
        }
    }
}

/// Outcome of executing one code block. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub block: BlockId,
    pub language: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub error: Option<TestError>,
    pub output: Option<String>,
    pub skip_reason: Option<SkipReason>,
}

impl TestResult {
    pub fn passed(block: BlockId, language: &str, duration_ms: u64, output: Option<String>) -> Self {
        Self {
            block,
            language: language.to_string(),
            status: TestStatus::Passed,
            duration_ms,
            error: None,
            output,
            skip_reason: None,
        }
    }

    pub fn failed(
        block: BlockId,
        language: &str,
        duration_ms: u64,
        error: TestError,
        output: Option<String>,
    ) -> Self {
        Self {
            block,
            language: language.to_string(),
            status: TestStatus::Failed,
            duration_ms,
            error: Some(error),
            output,
            skip_reason: None,
        }
    }

    /// Skipped results always carry zero duration.
    pub fn skipped(block: BlockId, language: &str, reason: SkipReason) -> Self {
        Self {
            block,
            language: language.to_string(),
            status: TestStatus::Skipped,
            duration_ms: 0,
            error: None,
            output: None,
            skip_reason: Some(reason),
        }
    }

    /// `<file>:<line>` name used in reports and filters.
    pub fn name(&self) -> String {
        self.block.to_string()
    }
}

/// A document that could not be loaded or parsed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

/// Aggregate of all results for one invocation.
///
/// Only produced by [`Aggregator::finish`](crate::aggregator::Aggregator::finish)
/// once every submitted block reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    /// Results in document order.
    pub results: Vec<TestResult>,
    #[serde(default)]
    pub document_errors: Vec<DocumentFailure>,
}

impl RunSummary {
    /// Whether every block passed or was skipped and every document parsed.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.document_errors.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Failed)
    }
}
