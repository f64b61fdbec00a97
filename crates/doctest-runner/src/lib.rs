//! DocTest block execution.
//!
//! Runners execute one code block in an isolated process, the dispatcher
//! turns the outcome into a test result, the executor schedules whole runs
//! over a bounded worker pool, and the watcher re-runs files as they change.

pub mod context;
pub mod dispatch;
pub mod executor;
mod process;
pub mod registry;
pub mod runner;
pub mod watcher;

pub use context::{CancelSource, CancelToken, ExecutionContext};
pub use dispatch::{judge, Dispatcher};
pub use executor::Executor;
pub use registry::RunnerRegistry;
pub use runner::{CommandRunner, ExecutionOutcome, Runner};
pub use watcher::{WatchEvent, WatchSession, Watcher};
