//! Exercises the file-watcher's trailing-edge debounce (spec: at most one `HostRestart` per
//! 300ms window of consecutive matching file events) against a real temp directory.

mod common;

use std::time::Duration;

use worker_channel::events::{Event, EventBus};
use worker_channel::filewatch::FileWatcher;

#[tokio::test]
async fn a_burst_of_matching_saves_collapses_into_one_restart_event() {
    common::init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    let watcher = FileWatcher::start(
        "w1",
        dir.path(),
        vec!["py".to_string()],
        Duration::from_millis(100),
        bus.clone(),
    )
    .expect("start watcher");

    // Give the OS watcher a moment to arm before the first write.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let target = dir.path().join("handler.py");
    for i in 0..5 {
        std::fs::write(&target, format!("version {i}")).expect("write");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut restarts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(Event::HostRestart { worker_id })) => {
                assert_eq!(worker_id, "w1");
                restarts += 1;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    assert_eq!(restarts, 1, "a burst within the debounce window must collapse to one event");
    watcher.stop();
}

#[tokio::test]
async fn non_matching_extension_never_triggers_a_restart() {
    common::init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    let watcher = FileWatcher::start(
        "w2",
        dir.path(),
        vec!["py".to_string()],
        Duration::from_millis(100),
        bus.clone(),
    )
    .expect("start watcher");

    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(dir.path().join("readme.md"), "not python").expect("write");

    let result = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(result.is_err(), "a non-matching extension must not schedule a restart");
    watcher.stop();
}
