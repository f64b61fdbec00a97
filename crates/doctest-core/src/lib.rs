//! DocTest Core Library
//!
//! Data model and pure components of the documentation tester: documents and
//! fenced code block parsing, result aggregation, validation, reports, run
//! configuration and notifications. Execution lives in `doctest-runner`.

pub mod aggregator;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod obs;
pub mod parser;
pub mod reporter;
pub mod result;
pub mod telemetry;
pub mod validator;

pub use aggregator::{Aggregator, Progress};
pub use config::{
    ConfigOverrides, DocTestConfig, RunnerSpec, ValidationSettings, WatchSettings,
    CONFIG_FILE_NAME, DEFAULT_TIMEOUT_MS,
};
pub use document::{
    content_digest, BlockId, BlockStatus, CodeBlock, Document, Metadata, TransitionError,
};
pub use error::{
    AggregateError, ConfigError, DocTestError, DocumentError, ParseError, ParseErrorKind,
    ReportError, Result, WatcherError,
};
pub use events::{EventBus, Notification};
pub use parser::{MarkdownParser, ParseOptions, Parser};
pub use reporter::{
    render_report, reporter_for, JUnitReporter, JsonReporter, MarkdownReporter, ReportFormat,
    Reporter, TextReporter,
};
pub use result::{
    DocumentFailure, ErrorKind, RunSummary, SkipReason, TestError, TestResult, TestStatus,
};
pub use validator::{DocumentAnalysis, ValidationIssue, ValidationReport, Validator};

pub use obs::{
    emit_block_finished, emit_block_started, emit_run_finished, emit_run_started,
    emit_watch_error, emit_watch_triggered, run_span,
};
pub use telemetry::init_tracing;

/// DocTest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
