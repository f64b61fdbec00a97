//! Concurrent result aggregation.
//!
//! Every submitted block owns one slot, numbered in document order. Workers
//! record into slots as they complete, in any order; each slot accepts exactly
//! one result. The running counters are atomics so [`Aggregator::progress`]
//! never blocks, and [`Aggregator::finish`] only yields a [`RunSummary`] once
//! every slot is filled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AggregateError;
use crate::result::{DocumentFailure, RunSummary, TestResult, TestStatus};

/// In-progress view of a run. Not a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub expected: usize,
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.expected
    }
}

/// Collects [`TestResult`]s for one run.
#[derive(Debug)]
pub struct Aggregator {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    expected: usize,
    completed: AtomicUsize,
    passed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    slots: Mutex<Vec<Option<TestResult>>>,
    document_errors: Mutex<Vec<DocumentFailure>>,
}

impl Aggregator {
    /// Create an aggregator expecting `expected` results.
    pub fn new(expected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            expected,
            completed: AtomicUsize::new(0),
            passed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            slots: Mutex::new(vec![None; expected]),
            document_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Attribute `result` to `slot`. Each slot accepts exactly one result.
    pub async fn record(&self, slot: usize, result: TestResult) -> Result<Progress, AggregateError> {
        let mut slots = self.slots.lock().await;
        let entry = slots.get_mut(slot).ok_or(AggregateError::OutOfRange {
            slot,
            expected: self.expected,
        })?;
        if entry.is_some() {
            return Err(AggregateError::Duplicate { slot });
        }

        let counter = match result.status {
            TestStatus::Passed => &self.passed,
            TestStatus::Failed => &self.failed,
            TestStatus::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        *entry = Some(result);
        self.completed.fetch_add(1, Ordering::AcqRel);
        drop(slots);

        Ok(self.progress())
    }

    /// Record a document that contributed no blocks because it failed to
    /// load or parse.
    pub async fn record_document_error(&self, failure: DocumentFailure) {
        self.document_errors.lock().await.push(failure);
    }

    /// Snapshot of the running counters.
    pub fn progress(&self) -> Progress {
        Progress {
            expected: self.expected,
            completed: self.completed.load(Ordering::Acquire),
            passed: self.passed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }

    /// Slots that have not received a result yet, ascending.
    pub async fn missing_slots(&self) -> Vec<usize> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_none())
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Produce the completed summary, results in slot order.
    ///
    /// Fails with [`AggregateError::Incomplete`] while any slot is empty.
    pub async fn finish(&self) -> Result<RunSummary, AggregateError> {
        let slots = self.slots.lock().await;
        let results: Vec<TestResult> = slots.iter().flatten().cloned().collect();
        if results.len() != self.expected {
            return Err(AggregateError::Incomplete {
                completed: results.len(),
                expected: self.expected,
            });
        }
        drop(slots);

        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let document_errors = self.document_errors.lock().await.clone();

        Ok(RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            duration_ms: self.started.elapsed().as_millis() as u64,
            results,
            document_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BlockId;
    use crate::result::{ErrorKind, SkipReason, TestError};
    use std::sync::Arc;

    fn result(line: usize, status: TestStatus) -> TestResult {
        let id = BlockId {
            file: "doc.md".to_string(),
            index: line,
            line,
        };
        match status {
            TestStatus::Passed => TestResult::passed(id, "sh", 1, None),
            TestStatus::Failed => TestResult::failed(
                id,
                "sh",
                1,
                TestError {
                    kind: ErrorKind::TestFailure,
                    message: "exit 1".to_string(),
                    line,
                },
                None,
            ),
            TestStatus::Skipped => TestResult::skipped(id, "sh", SkipReason::Annotated),
        }
    }

    #[tokio::test]
    async fn test_finish_orders_by_slot() {
        let agg = Aggregator::new(3);
        agg.record(2, result(30, TestStatus::Skipped)).await.unwrap();
        agg.record(0, result(10, TestStatus::Passed)).await.unwrap();
        agg.record(1, result(20, TestStatus::Failed)).await.unwrap();

        let summary = agg.finish().await.unwrap();
        let lines: Vec<usize> = summary.results.iter().map(|r| r.block.line).collect();
        assert_eq!(lines, vec![10, 20, 30]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_duplicate_slot_rejected() {
        let agg = Aggregator::new(1);
        agg.record(0, result(1, TestStatus::Passed)).await.unwrap();
        let err = agg.record(0, result(1, TestStatus::Failed)).await.unwrap_err();
        assert_eq!(err, AggregateError::Duplicate { slot: 0 });
        assert_eq!(agg.progress().failed, 0);
        assert_eq!(agg.progress().completed, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_slot_rejected() {
        let agg = Aggregator::new(1);
        let err = agg.record(5, result(1, TestStatus::Passed)).await.unwrap_err();
        assert_eq!(
            err,
            AggregateError::OutOfRange {
                slot: 5,
                expected: 1
            }
        );
    }

    #[tokio::test]
    async fn test_incomplete_run_has_no_summary() {
        let agg = Aggregator::new(2);
        agg.record(0, result(1, TestStatus::Passed)).await.unwrap();

        let progress = agg.progress();
        assert!(!progress.is_complete());
        assert_eq!(progress.completed, 1);
        assert_eq!(agg.missing_slots().await, vec![1]);

        let err = agg.finish().await.unwrap_err();
        assert_eq!(
            err,
            AggregateError::Incomplete {
                completed: 1,
                expected: 2
            }
        );
    }

    #[tokio::test]
    async fn test_empty_run_completes_immediately() {
        let agg = Aggregator::new(0);
        assert!(agg.progress().is_complete());
        let summary = agg.finish().await.unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.success());
    }

    #[tokio::test]
    async fn test_concurrent_records_are_counted_once() {
        let n = 200;
        let agg = Arc::new(Aggregator::new(n));
        let mut tasks = Vec::new();
        for slot in 0..n {
            let agg = Arc::clone(&agg);
            tasks.push(tokio::spawn(async move {
                let status = match slot % 3 {
                    0 => TestStatus::Passed,
                    1 => TestStatus::Failed,
                    _ => TestStatus::Skipped,
                };
                agg.record(slot, result(slot + 1, status)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let summary = agg.finish().await.unwrap();
        assert_eq!(summary.total, n);
        assert_eq!(summary.passed + summary.failed + summary.skipped, n);
        assert_eq!(summary.passed, 67);
        assert_eq!(summary.failed, 67);
        assert_eq!(summary.skipped, 66);
        assert_eq!(summary.run_id, agg.run_id());
    }

    #[tokio::test]
    async fn test_document_errors_carried_into_summary() {
        let agg = Aggregator::new(0);
        agg.record_document_error(DocumentFailure {
            file: "bad.md".to_string(),
            line: Some(4),
            message: "unterminated".to_string(),
        })
        .await;
        let summary = agg.finish().await.unwrap();
        assert_eq!(summary.document_errors.len(), 1);
        assert!(!summary.success());
    }
}
