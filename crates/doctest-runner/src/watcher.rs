//! Watch mode.
//!
//! A background task polls the watched files, compares modification time and
//! content digest, and re-runs a file once its changes have settled for the
//! debounce period. Only the changed file is re-run. A file never has two
//! runs in flight: a newer trigger cancels the older run first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use doctest_core::{
    content_digest, emit_watch_error, emit_watch_triggered, RunSummary, WatchSettings,
    WatcherError,
};

use crate::context::{CancelSource, CancelToken};
use crate::executor::Executor;

/// Something the watch session observed.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A file changed and a run for it is starting.
    FileChanged { path: PathBuf },
    /// A triggered run finished.
    RunComplete(RunSummary),
    /// Observation failed; watching continues.
    Error(WatcherError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileState {
    Present {
        modified: Option<SystemTime>,
        digest: String,
    },
    Missing,
    Unreadable(String),
}

/// Entry point for watch mode.
pub struct Watcher;

impl Watcher {
    /// Start watching `paths`, running changed files with `executor`.
    pub fn spawn(
        paths: Vec<PathBuf>,
        settings: WatchSettings,
        executor: Arc<Executor>,
    ) -> WatchSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancelSource::new();
        let token = stop.token();
        info!(paths = paths.len(), debounce_ms = settings.debounce_ms, "watch started");
        let task = tokio::spawn(async move {
            WatchLoop::new(paths, settings, executor, tx).run(token).await;
        });
        WatchSession {
            events: rx,
            stop,
            task,
        }
    }
}

/// Handle to a running watch task.
pub struct WatchSession {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    stop: CancelSource,
    task: JoinHandle<()>,
}

impl WatchSession {
    /// Next observed event; `None` once the watch task has ended.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Stop watching. In-flight runs are cancelled and awaited; no events
    /// are delivered after this returns.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "watch task ended abnormally");
        }
        info!("watch stopped");
    }
}

struct InFlight {
    cancel: CancelSource,
    handle: JoinHandle<()>,
}

struct WatchLoop {
    paths: Vec<PathBuf>,
    debounce: Duration,
    poll_interval: Duration,
    ignore_initial: bool,
    executor: Arc<Executor>,
    tx: mpsc::UnboundedSender<WatchEvent>,
    known: HashMap<PathBuf, FileState>,
    /// Last time a change was seen, per file awaiting its debounce.
    pending: HashMap<PathBuf, Instant>,
    in_flight: HashMap<PathBuf, InFlight>,
}

impl WatchLoop {
    fn new(
        paths: Vec<PathBuf>,
        settings: WatchSettings,
        executor: Arc<Executor>,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> Self {
        Self {
            paths,
            debounce: Duration::from_millis(settings.debounce_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            ignore_initial: settings.ignore_initial,
            executor,
            tx,
            known: HashMap::new(),
            pending: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    async fn run(mut self, stop: CancelToken) {
        self.initial_snapshot().await;

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.poll().await;
            self.fire_due().await;
            self.in_flight.retain(|_, run| !run.handle.is_finished());
        }

        for (path, run) in self.in_flight.drain() {
            debug!(path = %path.display(), "cancelling in-flight run");
            run.cancel.cancel();
            if let Err(e) = run.handle.await {
                warn!(path = %path.display(), error = %e, "run task ended abnormally");
            }
        }
    }

    async fn initial_snapshot(&mut self) {
        for path in self.paths.clone() {
            let state = observe(&path).await;
            self.report_problem(&path, &state);
            if !self.ignore_initial && matches!(state, FileState::Present { .. }) {
                // Due on the first poll.
                let seen = Instant::now()
                    .checked_sub(self.debounce)
                    .unwrap_or_else(Instant::now);
                self.pending.insert(path.clone(), seen);
            }
            self.known.insert(path, state);
        }
    }

    async fn poll(&mut self) {
        for path in self.paths.clone() {
            let state = observe(&path).await;
            let changed = self.known.get(&path) != Some(&state);
            if !changed {
                continue;
            }
            match &state {
                FileState::Present { .. } => {
                    debug!(path = %path.display(), "change observed");
                    self.pending.insert(path.clone(), Instant::now());
                }
                _ => {
                    self.pending.remove(&path);
                    self.report_problem(&path, &state);
                }
            }
            self.known.insert(path, state);
        }
    }

    async fn fire_due(&mut self) {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            self.pending.remove(&path);
            self.trigger(path).await;
        }
    }

    async fn trigger(&mut self, path: PathBuf) {
        if let Some(previous) = self.in_flight.remove(&path) {
            debug!(path = %path.display(), "superseding in-flight run");
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                warn!(path = %path.display(), error = %e, "run task ended abnormally");
            }
        }

        emit_watch_triggered(&path.display().to_string());
        let _ = self.tx.send(WatchEvent::FileChanged { path: path.clone() });

        let cancel = CancelSource::new();
        let token = cancel.token();
        let executor = Arc::clone(&self.executor);
        let tx = self.tx.clone();
        let target = path.clone();
        let handle = tokio::spawn(async move {
            match executor.run_file(&target, &token).await {
                Ok(summary) => {
                    let _ = tx.send(WatchEvent::RunComplete(summary));
                }
                Err(e) => warn!(path = %target.display(), error = %e, "watch run failed"),
            }
        });
        self.in_flight.insert(path, InFlight { cancel, handle });
    }

    fn report_problem(&self, path: &Path, state: &FileState) {
        let error = match state {
            FileState::Present { .. } => return,
            FileState::Missing => WatcherError::PathMissing {
                path: path.display().to_string(),
            },
            FileState::Unreadable(message) => WatcherError::Io {
                path: path.display().to_string(),
                message: message.clone(),
            },
        };
        emit_watch_error(&error);
        let _ = self.tx.send(WatchEvent::Error(error));
    }
}

async fn observe(path: &Path) -> FileState {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FileState::Missing,
        Err(e) => return FileState::Unreadable(e.to_string()),
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => FileState::Present {
            modified: metadata.modified().ok(),
            digest: content_digest(&bytes),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileState::Missing,
        Err(e) => FileState::Unreadable(e.to_string()),
    }
}
