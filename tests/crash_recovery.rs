//! Fault injection around the publish -> record boundary.

mod support;

use detik_relay::error::RelayError;
use detik_relay::ledger::Ledger;
use std::sync::Arc;
use support::*;

#[tokio::test(start_paused = true)]
async fn test_failed_record_aborts_run_and_leaves_item_retriable() {
    let dir = tempfile::tempdir().unwrap();
    // parent directory does not exist yet, so the first ledger write fails
    let ledger_path = dir.path().join("state").join("posted_videos.json");
    let listing = candidates(3);
    let source = Arc::new(FakeSource::new(listing.clone()));
    let acquirer = Arc::new(FakeAcquirer::new());
    let publisher = Arc::new(FakePublisher::new());

    let relay = orchestrator(&source, &acquirer, &publisher, Ledger::load(&ledger_path).unwrap(), settings());
    let err = relay.run(&[page("p1")]).await.unwrap_err();

    assert!(matches!(err, RelayError::Persistence { .. }));
    assert!(err.is_fatal());
    // the run stops at the first unpersisted publish
    assert_eq!(publisher.calls().len(), 1);
    assert!(relay.ledger().lock().unwrap().is_empty());
    drop(relay);

    // "restart": nothing was recorded, so the item is attempted again
    std::fs::create_dir_all(ledger_path.parent().unwrap()).unwrap();
    let retry_publisher = Arc::new(FakePublisher::new());
    let relay = orchestrator(&source, &acquirer, &retry_publisher, Ledger::load(&ledger_path).unwrap(), settings());
    let report = relay.run(&[page("p1")]).await.unwrap();

    assert_eq!(report.published(), 3);
    assert_eq!(retry_publisher.calls()[0].title, "Video 1");
    let on_disk = Ledger::load(&ledger_path).unwrap();
    assert_eq!(on_disk.len(), 3);
    assert!(on_disk.contains(&listing[0].video_id, "p1"));
}

#[tokio::test(start_paused = true)]
async fn test_crash_after_record_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("posted_videos.json");
    let source = Arc::new(FakeSource::new(candidates(2)));
    let acquirer = Arc::new(FakeAcquirer::new());
    let publisher = Arc::new(FakePublisher::new());

    let relay = orchestrator(&source, &acquirer, &publisher, Ledger::load(&ledger_path).unwrap(), settings());
    relay.run(&[page("p1")]).await.unwrap();
    // process dies here; only what reached disk survives
    drop(relay);

    let after_restart = Arc::new(FakePublisher::new());
    let relay = orchestrator(&source, &acquirer, &after_restart, Ledger::load(&ledger_path).unwrap(), settings());
    let report = relay.run(&[page("p1")]).await.unwrap();

    assert!(after_restart.calls().is_empty());
    assert_eq!(report.skipped(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_units_stay_out_of_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("posted_videos.json");
    let source = Arc::new(FakeSource::new(candidates(2)));
    let acquirer = Arc::new(FakeAcquirer::always_unavailable());
    let publisher = Arc::new(FakePublisher::new());

    let relay = orchestrator(&source, &acquirer, &publisher, Ledger::load(&ledger_path).unwrap(), settings());
    let report = relay.run(&[page("p1")]).await.unwrap();

    assert_eq!(report.failed(), 2);
    // nothing was ever written
    assert!(!ledger_path.exists());
}
