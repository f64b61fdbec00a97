//! Run notifications.
//!
//! Runs publish structured [`Notification`]s on an explicit [`EventBus`]
//! handed to them by the caller. There is no global bus: whoever creates the
//! bus decides who subscribes, and ordering per publisher is preserved.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::document::BlockId;
use crate::result::{RunSummary, TestResult, TestStatus};

const DEFAULT_CAPACITY: usize = 1024;

/// A lifecycle notification emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    TestStarted { block: BlockId, language: String },
    TestPassed { result: TestResult },
    TestFailed { result: TestResult },
    TestSkipped { result: TestResult },
    RunComplete { summary: RunSummary },
}

impl Notification {
    /// Notification matching a finished result's status.
    pub fn for_result(result: TestResult) -> Self {
        match result.status {
            TestStatus::Passed => Notification::TestPassed { result },
            TestStatus::Failed => Notification::TestFailed { result },
            TestStatus::Skipped => Notification::TestSkipped { result },
        }
    }

    /// Short event name, e.g. `test:start`.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::TestStarted { .. } => "test:start",
            Notification::TestPassed { .. } => "test:pass",
            Notification::TestFailed { .. } => "test:fail",
            Notification::TestSkipped { .. } => "test:skip",
            Notification::RunComplete { .. } => "run:complete",
        }
    }
}

/// Publish/subscribe channel for [`Notification`]s.
///
/// Slow subscribers that fall more than the channel capacity behind observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, notification: Notification) -> usize {
        tracing::trace!(event = notification.name(), "notification published");
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
