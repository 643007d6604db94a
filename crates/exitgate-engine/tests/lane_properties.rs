//! Lane-level properties: timers, serialization, store outages, snapshots.
//!
//! Timer tests pause the runtime clock once the lane is up; nothing they do
//! after that touches the database.
//!
//! Run with: cargo test --package exitgate-engine --test lane_properties

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use exitgate_engine::{ExitRequest, GateState, LaneSettings, ResultCode};
use exitgate_hardware::GateCall;
use exitgate_storage::TransactionStore;
use futures::future::join_all;
use rstest::rstest;

use common::{flaky_lane, memory_store, seed, seeded_lane, settings, start};

fn with_auto_close(auto_close: Duration) -> LaneSettings {
    LaneSettings {
        auto_close,
        ..settings()
    }
}

#[rstest]
#[case::default_timeout(Duration::from_secs(10))]
#[case::short_timeout(Duration::from_millis(500))]
#[tokio::test]
async fn test_gate_auto_closes_after_timeout(#[case] timeout: Duration) {
    let t = seeded_lane(with_auto_close(timeout)).await;
    tokio::time::pause();

    assert_eq!(t.lane.open_gate().await.unwrap(), GateState::Open);

    tokio::time::sleep(timeout - Duration::from_millis(50)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Open);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = t.lane.gate_status().await.unwrap();
    assert_eq!(status.state, GateState::Closed);
    assert_eq!(status.auto_close_in_ms, None);
    assert_eq!(t.gate.close_count(), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_manual_close_disarms_timer() {
    let t = seeded_lane(with_auto_close(Duration::from_secs(10))).await;
    tokio::time::pause();

    t.lane.open_gate().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(t.lane.close_gate().await.unwrap(), GateState::Closed);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Closed);
    assert_eq!(t.gate.close_count(), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_second_exit_extends_open_period() {
    let t = seeded_lane(with_auto_close(Duration::from_secs(10))).await;

    assert!(t.lane.process_exit(ExitRequest::new("IMGTEST001")).await.success);
    tokio::time::pause();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(t.lane.open_gate().await.unwrap(), GateState::Open);

    // the first deadline passes without closing
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Open);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Closed);
    assert_eq!(
        t.gate.calls(),
        vec![GateCall::Open, GateCall::Open, GateCall::Close]
    );
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_auto_close_retries() {
    let t = seeded_lane(with_auto_close(Duration::from_secs(2))).await;
    tokio::time::pause();

    t.lane.open_gate().await.unwrap();
    t.gate.fail_next(1);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Open);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Closed);
    assert_eq!(t.gate.close_count(), 2);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_exits_close_once() {
    let t = seeded_lane(settings()).await;

    let results = join_all(
        (0..4).map(|_| t.lane.process_exit(ExitRequest::new("IMGTEST001"))),
    )
    .await;

    let successes = results.iter().filter(|r| r.success).count();
    assert_eq!(successes, 1, "{results:?}");
    for result in results.iter().filter(|r| !r.success) {
        assert_eq!(result.code, ResultCode::AlreadyClosed);
    }
    assert_eq!(t.gate.open_count(), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_non_blocking_exit_reports_busy() {
    let t = seeded_lane(settings()).await;

    let results = join_all(
        (0..2).map(|_| t.lane.try_process_exit(ExitRequest::new("IMGTEST001"))),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.success).count(), 1);
    let loser = results.iter().find(|r| !r.success).unwrap();
    assert!(
        matches!(loser.code, ResultCode::Busy | ResultCode::AlreadyClosed),
        "{loser:?}"
    );

    // nothing in flight any more
    let again = t.lane.try_process_exit(ExitRequest::new("TCK0009")).await;
    assert!(again.success, "{again:?}");
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_two_lanes_share_one_store() {
    let (store, cache) = memory_store().await;
    seed(&*store).await;
    let north = start(Arc::clone(&store), Arc::clone(&cache), settings()).await;
    let south = start(Arc::clone(&store), Arc::clone(&cache), settings()).await;

    let (a, b) = tokio::join!(
        north.lane.process_exit(ExitRequest::new("IMGTEST001")),
        south.lane.process_exit(ExitRequest::new("IMGTEST001")),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.success).count(), 1, "{results:?}");
    let loser = results.iter().find(|r| !r.success).unwrap();
    assert_eq!(loser.code, ResultCode::AlreadyClosed);
    assert_eq!(north.gate.open_count() + south.gate.open_count(), 1);

    north.engine.shutdown().await;
    south.engine.shutdown().await;
}

#[tokio::test]
async fn test_store_outage_degrades_lane() {
    let t = flaky_lane(settings()).await;
    tokio::time::pause();
    t.store.set_down(true);

    let first = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(first.code, ResultCode::Unavailable);
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Closed);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let second = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(second.code, ResultCode::Unavailable);
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Degraded);

    let third = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(third.code, ResultCode::Unavailable);
    assert_eq!(t.gate.open_count(), 0);

    let diagnostics = t.lane.diagnostics().await.unwrap();
    assert!(!diagnostics.ts_connected);
    assert_eq!(diagnostics.state, GateState::Degraded);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_degraded_lane_recovers_on_next_exit() {
    let t = flaky_lane(LaneSettings {
        degraded_after: Duration::ZERO,
        ..settings()
    })
    .await;

    t.store.set_down(true);
    let refused = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(refused.code, ResultCode::Unavailable);
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Degraded);

    t.store.set_down(false);
    let result = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert!(result.success, "{result:?}");
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Open);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_degraded_lane_keeps_manual_control() {
    let t = flaky_lane(LaneSettings {
        degraded_after: Duration::ZERO,
        ..settings()
    })
    .await;

    t.store.set_down(true);
    t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Degraded);

    assert_eq!(t.lane.open_gate().await.unwrap(), GateState::Open);
    assert_eq!(t.lane.close_gate().await.unwrap(), GateState::Degraded);
    assert_eq!(t.gate.open_count(), 1);
    assert_eq!(t.lane.diagnostics().await.unwrap().state, GateState::Degraded);

    // still degraded: refused by the health check without a lookup
    let lookups = t.store.lookups();
    let refused = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert_eq!(refused.code, ResultCode::Unavailable);
    assert_eq!(t.store.lookups(), lookups);

    t.store.set_down(false);
    let result = t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    assert!(result.success, "{result:?}");
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_open_on_degraded_lane_stays_degraded() {
    let t = flaky_lane(LaneSettings {
        degraded_after: Duration::ZERO,
        ..settings()
    })
    .await;

    t.store.set_down(true);
    t.lane.process_exit(ExitRequest::new("IMGTEST001")).await;
    t.gate.fail_next(1);

    assert!(t.lane.open_gate().await.is_err());
    let status = t.lane.gate_status().await.unwrap();
    assert_eq!(status.state, GateState::Degraded);
    assert_eq!(status.auto_close_in_ms, None);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_close_of_lowered_gate_stays_closed() {
    let t = seeded_lane(with_auto_close(Duration::from_secs(2))).await;
    tokio::time::pause();
    t.gate.fail_next(1);

    assert!(t.lane.close_gate().await.is_err());
    let status = t.lane.gate_status().await.unwrap();
    assert_eq!(status.state, GateState::Closed);
    assert_eq!(status.auto_close_in_ms, None);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(t.lane.gate_status().await.unwrap().state, GateState::Closed);
    assert_eq!(t.gate.close_count(), 1);
    assert_eq!(t.gate.open_count(), 0);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_snapshot_is_retried() {
    let t = flaky_lane(LaneSettings {
        attachment_retry_interval: Duration::from_millis(50),
        ..settings()
    })
    .await;
    t.store.set_attachments_down(true);

    let result = t
        .lane
        .process_exit(ExitRequest::new("IMGTEST001").snapshot(Bytes::from_static(b"jpeg")))
        .await;
    assert!(result.success, "attachment failure must not fail the exit");
    assert_eq!(t.lane.diagnostics().await.unwrap().pending_attachments, 1);

    t.store.set_attachments_down(false);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(t.lane.diagnostics().await.unwrap().pending_attachments, 0);
    let attachment = t
        .store
        .get_attachment("transaction_IMGTEST001", "exit.jpg")
        .await
        .unwrap();
    assert!(attachment.is_some());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_snapshots_and_closes_gate() {
    let t = flaky_lane(settings()).await;
    t.store.set_attachments_down(true);

    let result = t
        .lane
        .process_exit(ExitRequest::new("IMGTEST001").snapshot(Bytes::from_static(b"jpeg")))
        .await;
    assert!(result.success);
    assert!(t.gate.is_raised());

    t.store.set_attachments_down(false);
    t.engine.shutdown().await;

    assert!(!t.gate.is_raised());
    let attachment = t
        .store
        .get_attachment("transaction_IMGTEST001", "exit.jpg")
        .await
        .unwrap();
    assert!(attachment.is_some());

    let stopped = t.lane.process_exit(ExitRequest::new("TCK0009")).await;
    assert_eq!(stopped.code, ResultCode::Unavailable);
}
