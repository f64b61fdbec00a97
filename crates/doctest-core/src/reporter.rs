//! Run report rendering.
//!
//! Provides four renderings of a completed [`RunSummary`]:
//! - `json`: machine-readable summary and per-block results
//! - `markdown`: summary table plus per-test detail and failure output
//! - `text`: terminal-friendly plain text
//! - `junit`: JUnit XML for CI consumers
//!
//! Every reporter is a pure function of the summary: the same summary always
//! renders to byte-identical output.

use std::str::FromStr;
use std::time::Duration;

use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::result::{RunSummary, TestResult, TestStatus};

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Json,
    Markdown,
    Text,
    Junit,
}

impl ReportFormat {
    /// Conventional file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
            ReportFormat::Text => "txt",
            ReportFormat::Junit => "xml",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "text" | "txt" | "plain" => Ok(ReportFormat::Text),
            "junit" | "xml" => Ok(ReportFormat::Junit),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Markdown => write!(f, "markdown"),
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Junit => write!(f, "junit"),
        }
    }
}

/// Renders a completed run summary.
pub trait Reporter: Send + Sync {
    fn format(&self) -> ReportFormat;
    fn render(&self, summary: &RunSummary) -> Result<String, ReportError>;
}

/// Default reporter for a format.
pub fn reporter_for(format: ReportFormat) -> Box<dyn Reporter> {
    match format {
        ReportFormat::Json => Box::new(JsonReporter),
        ReportFormat::Markdown => Box::new(MarkdownReporter),
        ReportFormat::Text => Box::new(TextReporter),
        ReportFormat::Junit => Box::new(JUnitReporter),
    }
}

/// Render `summary` with the default reporter for `format`.
pub fn render_report(summary: &RunSummary, format: ReportFormat) -> Result<String, ReportError> {
    reporter_for(format).render(summary)
}

// ── json ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn format(&self) -> ReportFormat {
        ReportFormat::Json
    }

    fn render(&self, summary: &RunSummary) -> Result<String, ReportError> {
        let mut json = serde_json::to_string_pretty(summary)?;
        json.push('\n');
        Ok(json)
    }
}

// ── markdown ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownReporter;

impl Reporter for MarkdownReporter {
    fn format(&self) -> ReportFormat {
        ReportFormat::Markdown
    }

    fn render(&self, summary: &RunSummary) -> Result<String, ReportError> {
        let mut md = String::from("# DocTest Report\n\n");
        md.push_str(&format!(
            "Run `{}` started {}\n\n",
            summary.run_id,
            summary.started_at.to_rfc3339()
        ));
        md.push_str("| Total | Passed | Failed | Skipped | Duration |\n");
        md.push_str("|------:|-------:|-------:|--------:|---------:|\n");
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} ms |\n",
            summary.total, summary.passed, summary.failed, summary.skipped, summary.duration_ms
        ));

        md.push_str("\n## Results\n\n");
        if summary.results.is_empty() {
            md.push_str("no code blocks\n");
        }
        for result in &summary.results {
            md.push_str(&format!(
                "- **{}** `{}` ({}) {}\n",
                status_label(result.status),
                result.name(),
                language_label(result),
                detail(result)
            ));
        }

        let failures: Vec<&TestResult> = summary.failures().collect();
        if !failures.is_empty() {
            md.push_str("\n## Failures\n");
            for result in failures {
                md.push_str(&format!(
                    "\n### `{}` ({})\n\n",
                    result.name(),
                    language_label(result)
                ));
                if let Some(err) = &result.error {
                    md.push_str(&format!(
                        "**{}** at line {}: {}\n",
                        err.kind,
                        err.line,
                        first_line(&err.message)
                    ));
                }
                if let Some(output) = &result.output {
                    let fence = fence_for(output);
                    md.push_str(&format!("\n{fence}text\n{}", output));
                    if !output.ends_with('\n') {
                        md.push('\n');
                    }
                    md.push_str(&format!("{fence}\n"));
                }
            }
        }

        if !summary.document_errors.is_empty() {
            md.push_str("\n## Document Errors\n\n");
            for failure in &summary.document_errors {
                md.push_str(&format!(
                    "- `{}`: {}\n",
                    location(&failure.file, failure.line),
                    failure.message
                ));
            }
        }

        Ok(md)
    }
}

/// A backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

// ── text ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct TextReporter;

impl Reporter for TextReporter {
    fn format(&self) -> ReportFormat {
        ReportFormat::Text
    }

    fn render(&self, summary: &RunSummary) -> Result<String, ReportError> {
        let mut out = format!("doctest run {}\n\n", summary.run_id);
        for result in &summary.results {
            out.push_str(&format!(
                "{} {} [{}] {}\n",
                status_label(result.status),
                result.name(),
                language_label(result),
                detail(result)
            ));
            if let Some(err) = &result.error {
                out.push_str(&format!(
                    "    {} at {}: {}\n",
                    err.kind,
                    location(&result.block.file, Some(err.line)),
                    first_line(&err.message)
                ));
            }
        }
        for failure in &summary.document_errors {
            out.push_str(&format!(
                "ERROR {}: {}\n",
                location(&failure.file, failure.line),
                failure.message
            ));
        }
        out.push_str(&format!(
            "\n{} total, {} passed, {} failed, {} skipped in {} ms\n",
            summary.total, summary.passed, summary.failed, summary.skipped, summary.duration_ms
        ));
        Ok(out)
    }
}

// ── junit ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct JUnitReporter;

impl Reporter for JUnitReporter {
    fn format(&self) -> ReportFormat {
        ReportFormat::Junit
    }

    fn render(&self, summary: &RunSummary) -> Result<String, ReportError> {
        let mut report = Report::new("doctest");
        report
            .set_uuid(summary.run_id)
            .set_timestamp(summary.started_at.fixed_offset())
            .set_time(Duration::from_millis(summary.duration_ms));

        // One suite per document, in order of first appearance.
        let mut suites: Vec<TestSuite> = Vec::new();
        for result in &summary.results {
            let case = junit_case(result);
            match suites.iter_mut().find(|s| s.name.as_str() == result.block.file) {
                Some(suite) => {
                    suite.add_test_case(case);
                }
                None => {
                    let mut suite = TestSuite::new(result.block.file.as_str());
                    suite.add_test_case(case);
                    suites.push(suite);
                }
            }
        }
        for suite in &mut suites {
            let time: u64 = summary
                .results
                .iter()
                .filter(|r| r.block.file == suite.name.as_str())
                .map(|r| r.duration_ms)
                .sum();
            suite.set_time(Duration::from_millis(time));
        }
        report.add_test_suites(suites);

        Ok(report.to_string()?)
    }
}

fn junit_case(result: &TestResult) -> TestCase {
    let status = match result.status {
        TestStatus::Passed => TestCaseStatus::success(),
        TestStatus::Skipped => {
            let mut status = TestCaseStatus::skipped();
            if let Some(reason) = result.skip_reason {
                status.set_message(reason.to_string());
            }
            status
        }
        TestStatus::Failed => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            if let Some(error) = &result.error {
                status
                    .set_type(error.kind.to_string())
                    .set_message(first_line(&error.message))
                    .set_description(error.message.as_str());
            }
            status
        }
    };

    let mut case = TestCase::new(result.name(), status);
    case.set_classname(language_label(result))
        .set_time(Duration::from_millis(result.duration_ms));
    if result.status == TestStatus::Failed {
        if let Some(output) = &result.output {
            case.set_system_out(output.as_str());
        }
    }
    case
}

// ── shared helpers ────────────────────────────────────────────────────────

fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASS",
        TestStatus::Failed => "FAIL",
        TestStatus::Skipped => "SKIP",
    }
}

fn language_label(result: &TestResult) -> &str {
    if result.language.is_empty() {
        "untagged"
    } else {
        &result.language
    }
}

fn detail(result: &TestResult) -> String {
    match (result.status, result.skip_reason) {
        (TestStatus::Skipped, Some(reason)) => format!("({reason})"),
        (TestStatus::Skipped, None) => String::new(),
        _ => format!("({} ms)", result.duration_ms),
    }
}

fn location(file: &str, line: Option<usize>) -> String {
    match line {
        Some(line) => format!("{file}:{line}"),
        None => file.to_string(),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
