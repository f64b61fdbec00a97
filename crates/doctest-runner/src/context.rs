//! Per-execution context and run cancellation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;

use doctest_core::DEFAULT_TIMEOUT_MS;

/// Cancelling side of a run. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Observing side of a run's cancellation, cheap to clone into workers.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel every token handed out by this source. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the source is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Everything one block execution needs besides the block itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub timeout: Duration,
    pub working_dir: PathBuf,
    /// Extra environment variables, layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            cancel: CancelToken::never(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_existing_tokens() {
        let source = CancelSource::new();
        let token = source.token();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        source.cancel();
        assert!(token.is_cancelled());
        assert!(source.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_token_created_after_cancel_is_cancelled() {
        let source = CancelSource::new();
        source.cancel();
        source.token().cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_token_stays_pending() {
        let token = CancelToken::never();
        let waited =
            tokio::time::timeout(Duration::from_secs(60), token.cancelled()).await;
        assert!(waited.is_err());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_context_builders() {
        let ctx = ExecutionContext::new("/tmp")
            .with_timeout(Duration::from_millis(100))
            .with_env(BTreeMap::from([("A".to_string(), "1".to_string())]));
        assert_eq!(ctx.timeout, Duration::from_millis(100));
        assert_eq!(ctx.env.len(), 1);
        assert!(!ctx.cancel.is_cancelled());
    }
}
