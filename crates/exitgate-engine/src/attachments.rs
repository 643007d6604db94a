//! Best-effort retry queue for exit snapshots.
//!
//! A snapshot is attached after the closure commits. When the store refuses
//! it the snapshot waits here and is retried on the lane's retry tick until it
//! is stored or runs out of attempts. A closed record is never touched again
//! by this queue except to add the attachment.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use exitgate_core::constants::SNAPSHOT_CONTENT_TYPE;
use exitgate_storage::TransactionStore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause between two flush rounds at shutdown.
const FLUSH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct PendingAttachment {
    record_id: String,
    name: String,
    data: Bytes,
    attempts: u32,
}

/// Snapshots waiting to be attached.
#[derive(Debug)]
pub struct AttachmentQueue {
    pending: VecDeque<PendingAttachment>,
    max_attempts: u32,
    dropped: u64,
}

impl AttachmentQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            max_attempts: max_attempts.max(1),
            dropped: 0,
        }
    }

    /// Queue a snapshot whose first attempt already failed.
    pub fn push(&mut self, record_id: impl Into<String>, name: impl Into<String>, data: Bytes) {
        let pending = PendingAttachment {
            record_id: record_id.into(),
            name: name.into(),
            data,
            attempts: 1,
        };
        if pending.attempts >= self.max_attempts {
            self.drop_attachment(&pending);
            return;
        }
        debug!(record_id = %pending.record_id, name = %pending.name, "snapshot queued for retry");
        self.pending.push_back(pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshots given up on since start.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Try every pending snapshot once; returns how many were stored.
    pub async fn retry<S: TransactionStore>(&mut self, store: &S) -> usize {
        let mut stored = 0;
        for _ in 0..self.pending.len() {
            let Some(mut pending) = self.pending.pop_front() else {
                break;
            };
            match store
                .put_attachment(
                    &pending.record_id,
                    &pending.name,
                    pending.data.clone(),
                    SNAPSHOT_CONTENT_TYPE,
                )
                .await
            {
                Ok(revision) => {
                    info!(
                        record_id = %pending.record_id,
                        name = %pending.name,
                        revision = %revision,
                        attempts = pending.attempts + 1,
                        "queued snapshot attached"
                    );
                    stored += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(record_id = %pending.record_id, "record of queued snapshot is gone");
                    self.drop_attachment(&pending);
                }
                Err(e) => {
                    pending.attempts += 1;
                    if pending.attempts >= self.max_attempts {
                        warn!(error = %e, record_id = %pending.record_id, "snapshot retry failed");
                        self.drop_attachment(&pending);
                    } else {
                        debug!(
                            error = %e,
                            record_id = %pending.record_id,
                            attempts = pending.attempts,
                            "snapshot retry failed, keeping it queued"
                        );
                        self.pending.push_back(pending);
                    }
                }
            }
        }
        stored
    }

    /// Retry until the queue is empty or `budget` has elapsed.
    ///
    /// Returns the number of snapshots still pending.
    pub async fn flush<S: TransactionStore>(&mut self, store: &S, budget: Duration) -> usize {
        let deadline = Instant::now() + budget;
        while !self.is_empty() && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, self.retry(store)).await.is_err() {
                break;
            }
            if !self.is_empty() {
                let pause = FLUSH_PAUSE.min(deadline.saturating_duration_since(Instant::now()));
                tokio::time::sleep(pause).await;
            }
        }
        if !self.is_empty() {
            warn!(pending = self.len(), "snapshots left unattached at shutdown");
        }
        self.len()
    }

    fn drop_attachment(&mut self, pending: &PendingAttachment) {
        self.dropped += 1;
        error!(
            record_id = %pending.record_id,
            name = %pending.name,
            attempts = pending.attempts,
            "giving up on snapshot"
        );
    }
}
