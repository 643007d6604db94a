//! Hands scanner events to a lane.
//!
//! The ingestor only publishes [`ScanEvent`]s on a bounded channel; this task
//! drains it and turns each valid scan into an exit. Invalid scans get the
//! error tone and go no further.

use exitgate_scanner::ScanEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{LaneEvent, Tone};
use crate::lane::{ExitRequest, LaneHandle};

/// Spawn the bridge; it ends on cancellation or when the ingestor stops.
pub fn spawn_scan_bridge(
    lane: LaneHandle,
    mut scans: mpsc::Receiver<ScanEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let scan = tokio::select! {
                _ = cancel.cancelled() => break,
                scan = scans.recv() => match scan {
                    Some(scan) => scan,
                    None => break,
                },
            };

            if !scan.valid {
                debug!(code = %scan.code, "invalid scan ignored");
                lane.publish(LaneEvent::Feedback { tone: Tone::Error });
                continue;
            }

            let result = lane.process_exit(ExitRequest::new(scan.code.as_str())).await;
            debug!(code = %scan.code, result = %result.code, "scan handled");
        }
        info!("scan bridge stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::lane::ExitEngine;
    use crate::result::ResultCode;
    use exitgate_hardware::GateDriver;
    use exitgate_storage::{Database, SqliteTransactionStore};

    #[tokio::test]
    async fn test_scans_become_exits() {
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(SqliteTransactionStore::new(db, Duration::from_secs(2)));
        let (driver, _gate) = GateDriver::simulated(3);
        let engine = ExitEngine::builder(store, driver).start().await.unwrap();
        let lane = engine.handle();
        let mut events = lane.subscribe();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let bridge = spawn_scan_bridge(lane.clone(), rx, cancel.clone());

        let now = tokio::time::Instant::now();
        tx.send(ScanEvent {
            code: "AB".to_string(),
            valid: false,
            timestamp: now,
        })
        .await
        .unwrap();
        tx.send(ScanEvent {
            code: "NOPE0001".to_string(),
            valid: true,
            timestamp: now,
        })
        .await
        .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            LaneEvent::Feedback { tone: Tone::Error }
        );
        loop {
            if let LaneEvent::ExitProcessed { identifier, result } = events.recv().await.unwrap() {
                assert_eq!(identifier, "NOPE0001");
                assert_eq!(result.code, ResultCode::NotFound);
                break;
            }
        }

        cancel.cancel();
        bridge.await.unwrap();
        engine.shutdown().await;
    }
}
