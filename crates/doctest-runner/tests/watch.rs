//! Watch mode against a real temporary directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use doctest_core::{DocTestConfig, TestStatus, WatchSettings, WatcherError};
use doctest_runner::{Executor, WatchEvent, WatchSession, Watcher};

fn settings(ignore_initial: bool) -> WatchSettings {
    WatchSettings {
        debounce_ms: 100,
        poll_interval_ms: 20,
        ignore_initial,
    }
}

fn executor() -> Arc<Executor> {
    Arc::new(Executor::new(DocTestConfig::default()))
}

async fn next(session: &mut WatchSession) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(10), session.next_event())
        .await
        .expect("no watch event in time")
        .expect("watch session closed")
}

fn write(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn test_initial_run_when_not_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("guide.md");
    write(&doc, "```sh\necho hi\n```\n");

    let mut session = Watcher::spawn(vec![doc.clone()], settings(false), executor());

    assert_eq!(next(&mut session).await, WatchEvent::FileChanged { path: doc.clone() });
    match next(&mut session).await {
        WatchEvent::RunComplete(summary) => {
            assert_eq!(summary.total, 1);
            assert_eq!(summary.passed, 1);
            assert_eq!(summary.results[0].block.file, doc.display().to_string());
        }
        other => panic!("expected RunComplete, got {:?}", other),
    }
    session.stop().await;
}

#[tokio::test]
async fn test_change_triggers_run_of_changed_file_only() {
    let dir = tempfile::tempdir().unwrap();
    let changed = dir.path().join("changed.md");
    let untouched = dir.path().join("untouched.md");
    write(&changed, "```sh\ntrue\n```\n");
    write(&untouched, "```sh\ntrue\n```\n");

    let mut session = Watcher::spawn(
        vec![changed.clone(), untouched.clone()],
        settings(true),
        executor(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    write(&changed, "```sh\nexit 1\n```\n");

    assert_eq!(
        next(&mut session).await,
        WatchEvent::FileChanged {
            path: changed.clone()
        }
    );
    match next(&mut session).await {
        WatchEvent::RunComplete(summary) => {
            assert_eq!(summary.total, 1);
            assert_eq!(summary.results[0].status, TestStatus::Failed);
            assert_eq!(summary.results[0].block.file, changed.display().to_string());
        }
        other => panic!("expected RunComplete, got {:?}", other),
    }
    session.stop().await;
}

#[tokio::test]
async fn test_burst_of_writes_is_debounced() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("burst.md");
    write(&doc, "```sh\ntrue\n```\n");

    let mut session = Watcher::spawn(
        vec![doc.clone()],
        WatchSettings {
            debounce_ms: 400,
            poll_interval_ms: 20,
            ignore_initial: true,
        },
        executor(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    for i in 0..4 {
        write(&doc, &format!("```sh\necho {i}\n```\n"));
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert!(matches!(next(&mut session).await, WatchEvent::FileChanged { .. }));
    assert!(matches!(next(&mut session).await, WatchEvent::RunComplete(_)));
    let extra = tokio::time::timeout(Duration::from_millis(800), session.next_event()).await;
    assert!(extra.is_err(), "unexpected second trigger: {:?}", extra);
    session.stop().await;
}

#[tokio::test]
async fn test_missing_path_reported_and_watching_continues() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("later.md");

    let mut session = Watcher::spawn(vec![missing.clone()], settings(true), executor());
    assert_eq!(
        next(&mut session).await,
        WatchEvent::Error(WatcherError::PathMissing {
            path: missing.display().to_string()
        })
    );

    write(&missing, "```sh\ntrue\n```\n");
    assert_eq!(
        next(&mut session).await,
        WatchEvent::FileChanged {
            path: missing.clone()
        }
    );
    assert!(matches!(next(&mut session).await, WatchEvent::RunComplete(_)));
    session.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_in_flight_run() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("slow.md");
    write(&doc, "```sh\nsleep 30\n```\n");

    let mut session = Watcher::spawn(vec![doc.clone()], settings(false), executor());
    assert!(matches!(next(&mut session).await, WatchEvent::FileChanged { .. }));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    session.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
