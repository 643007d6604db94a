//! Ingestor task around a [`ScanBuffer`].
//!
//! Characters arrive on an input channel, scans leave on a bounded event
//! channel. A monitor tick flushes a burst that was never terminated. While
//! disabled the task keeps running and drops every character it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use exitgate_core::constants::SCAN_MONITOR_INTERVAL_MS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{ScanBuffer, ScanEvent, ScanRules};

const INPUT_CAPACITY: usize = 256;

/// Errors returned by [`ScanInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("scanner ingestor stopped")]
    Stopped,
}

/// Cloneable feeder of an ingestor.
#[derive(Debug, Clone)]
pub struct ScanInput {
    tx: mpsc::Sender<char>,
    enabled: Arc<AtomicBool>,
}

impl ScanInput {
    /// Send one keystroke.
    pub async fn feed(&self, ch: char) -> Result<(), IngestError> {
        self.tx.send(ch).await.map_err(|_| IngestError::Stopped)
    }

    /// Send every character of `text`.
    pub async fn feed_str(&self, text: &str) -> Result<(), IngestError> {
        for ch in text.chars() {
            self.feed(ch).await?;
        }
        Ok(())
    }

    /// Type `code` followed by a newline, as a scanner burst would.
    pub async fn simulate_scan(&self, code: &str) -> Result<(), IngestError> {
        self.feed_str(code).await?;
        self.feed('\n').await
    }

    /// Resume accepting keystrokes.
    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("scanner enabled");
        }
    }

    /// Drop keystrokes until [`enable`](Self::enable) is called.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("scanner disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Running ingestor task.
///
/// # Examples
///
/// ```
/// use exitgate_scanner::{ScanIngestor, ScanRules};
///
/// #[tokio::main]
/// async fn main() {
///     let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 16);
///     let input = ingestor.input();
///
///     input.simulate_scan("IMGTEST001").await.unwrap();
///     let scan = events.recv().await.unwrap();
///     assert_eq!(scan.code, "IMGTEST001");
///     assert!(scan.valid);
///
///     ingestor.shutdown().await;
/// }
/// ```
#[derive(Debug)]
pub struct ScanIngestor {
    input: ScanInput,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScanIngestor {
    /// Start the ingestor; scans are delivered on the returned receiver.
    pub fn spawn(rules: ScanRules, capacity: usize) -> (Self, mpsc::Receiver<ScanEvent>) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let enabled = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            ScanBuffer::new(rules),
            input_rx,
            event_tx,
            Arc::clone(&enabled),
            cancel.clone(),
        ));

        let ingestor = Self {
            input: ScanInput {
                tx: input_tx,
                enabled,
            },
            cancel,
            task,
        };
        (ingestor, event_rx)
    }

    /// Feeder handle.
    pub fn input(&self) -> ScanInput {
        self.input.clone()
    }

    /// Stop the monitor and wait for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "scanner task ended abnormally");
        }
    }
}

async fn run(
    mut buffer: ScanBuffer,
    mut input: mpsc::Receiver<char>,
    events: mpsc::Sender<ScanEvent>,
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut monitor = tokio::time::interval(Duration::from_millis(SCAN_MONITOR_INTERVAL_MS));
    monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = input.recv() => {
                let Some(ch) = received else { break };
                if !enabled.load(Ordering::SeqCst) {
                    buffer.clear();
                    continue;
                }
                for event in buffer.feed(ch, Instant::now()) {
                    deliver(&events, event);
                }
            }
            _ = monitor.tick() => {
                if let Some(event) = buffer.tick(Instant::now()) {
                    deliver(&events, event);
                }
            }
        }
    }
    debug!("scanner task stopped");
}

fn deliver(events: &mpsc::Sender<ScanEvent>, event: ScanEvent) {
    if event.valid {
        info!(code = %event.code, "barcode scanned");
    } else {
        warn!(code = %event.code, "invalid barcode scanned");
    }

    // listeners must never stall the keystroke loop
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(code = %event.code, "scan listener lagging, scan dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("no scan listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn type_slowly(input: &ScanInput, text: &str, spacing: Duration) {
        for ch in text.chars() {
            input.feed(ch).await.unwrap();
            tokio::time::sleep(spacing).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_burst_emits_one_valid_event() {
        let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 8);
        let input = ingestor.input();

        type_slowly(&input, "IMGTEST001\n", Duration::from_millis(2)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        ingestor.shutdown().await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.code, "IMGTEST001");
        assert!(event.valid);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_typing_emits_nothing() {
        let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 8);
        let input = ingestor.input();

        type_slowly(&input, "IMGTEST001", Duration::from_millis(300)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        ingestor.shutdown().await;

        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_flushes_unterminated_burst() {
        let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 8);
        let input = ingestor.input();

        type_slowly(&input, "IMGTEST001", Duration::from_millis(2)).await;
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.code, "IMGTEST001");

        ingestor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_drops_keystrokes() {
        let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 8);
        let input = ingestor.input();

        input.disable();
        assert!(!input.is_enabled());
        input.simulate_scan("IMGTEST001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(events.try_recv().is_err());

        input.enable();
        input.simulate_scan("IMGTEST002").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.code, "IMGTEST002");

        ingestor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_scan_is_delivered() {
        let (ingestor, mut events) = ScanIngestor::spawn(ScanRules::default(), 8);
        ingestor.input().simulate_scan("AB").await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.code, "AB");
        assert!(!event.valid);
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_feed_after_shutdown_fails() {
        let (ingestor, _events) = ScanIngestor::spawn(ScanRules::default(), 8);
        let input = ingestor.input();
        ingestor.shutdown().await;

        assert_eq!(input.feed('A').await, Err(IngestError::Stopped));
    }
}
