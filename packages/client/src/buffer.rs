use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{BatchResponse, ChangeStatus, WriteChange};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ApiError, BufferError};

/// Network seam between the buffer and the batch endpoint.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn submit_batch(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError>;
}

/// A change plus the last rejection message the server gave for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedChange {
    pub change: WriteChange,
    pub last_error: Option<String>,
}

/// Result of one `flush` attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Another flush is already in flight; nothing was touched.
    InFlight,
    /// The queue was cleared while the batch was in flight; the server
    /// response was discarded.
    Aborted,
    /// The batch was submitted and the response applied to the queue.
    Flushed { applied: usize, rejected: usize },
    /// The submission failed outright; every change stays pending.
    Failed { error: String },
}

#[derive(Default)]
struct BufferState {
    entries: Vec<QueuedChange>,
    /// Bumped by `clear` so an in-flight flush can detect it raced a reset
    /// and must not resurrect or complete cleared entries.
    epoch: u64,
}

/// Durable client-side queue of pending mutations.
///
/// `enqueue` is the local-first commit point: synchronous, in-memory, never
/// waiting on disk or network. Durability comes from a background persister
/// task that journals the queue to a JSON side-file on every nudge,
/// coalescing bursts into one write.
pub struct WriteBuffer {
    state: Arc<Mutex<BufferState>>,
    journal: PathBuf,
    persist_tx: mpsc::UnboundedSender<()>,
    flush_gate: tokio::sync::Mutex<()>,
    batch_size: usize,
}

fn lock(state: &Mutex<BufferState>) -> std::sync::MutexGuard<'_, BufferState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WriteBuffer {
    /// Open the buffer, loading any journaled queue. A missing or corrupt
    /// journal starts empty, never fails.
    pub async fn open(journal: PathBuf, batch_size: usize) -> Result<Self, BufferError> {
        let mut entries = match tokio::fs::read(&journal).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<QueuedChange>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %journal.display(), error = %e, "outbox journal corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        // A crash mid-flush leaves entries journaled as syncing; their fate
        // is unknown, so they go back to pending. Replay is a server-side
        // no-op if they did land.
        for queued in entries.iter_mut() {
            if queued.change.status == ChangeStatus::Syncing {
                queued.change.status = ChangeStatus::Pending;
                queued.change.retry_count += 1;
            }
        }

        let state = Arc::new(Mutex::new(BufferState { entries, epoch: 0 }));
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<()>();

        let task_state = Arc::clone(&state);
        let task_journal = journal.clone();
        tokio::spawn(async move {
            while persist_rx.recv().await.is_some() {
                // Coalesce queued nudges into one journal write.
                while persist_rx.try_recv().is_ok() {}
                if let Err(e) = write_journal(&task_state, &task_journal).await {
                    warn!(path = %task_journal.display(), error = %e, "outbox journal write failed");
                }
            }
        });

        Ok(Self {
            state,
            journal,
            persist_tx,
            flush_gate: tokio::sync::Mutex::new(()),
            batch_size,
        })
    }

    /// Append a change to the queue. This is the optimistic local commit:
    /// it returns immediately, never suspends, and never fails. Outcomes
    /// surface asynchronously through [`WriteBuffer::flush`].
    pub fn enqueue(&self, mut change: WriteChange) {
        change.status = ChangeStatus::Pending;
        {
            let mut state = lock(&self.state);
            state.entries.push(QueuedChange {
                change,
                last_error: None,
            });
        }
        let _ = self.persist_tx.send(());
    }

    /// Number of changes awaiting submission.
    pub fn pending_count(&self) -> usize {
        lock(&self.state)
            .entries
            .iter()
            .filter(|q| q.change.status == ChangeStatus::Pending)
            .count()
    }

    /// Copy of the whole queue, for inspection.
    pub fn snapshot(&self) -> Vec<QueuedChange> {
        lock(&self.state).entries.clone()
    }

    /// Submit one bounded batch of pending changes.
    ///
    /// Safe to call repeatedly and concurrently: a second caller returns
    /// [`FlushOutcome::InFlight`]; replaying an already-applied change id is
    /// a server-side no-op. A transport failure leaves every batch member
    /// pending with `retry_count` bumped; nothing is ever dropped on a
    /// transient failure.
    pub async fn flush(&self, transport: &dyn BatchTransport) -> Result<FlushOutcome, BufferError> {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return Ok(FlushOutcome::InFlight);
        };

        let (batch, epoch) = {
            let mut state = lock(&self.state);
            let epoch = state.epoch;
            let mut batch = Vec::new();
            for queued in state.entries.iter_mut() {
                if batch.len() == self.batch_size {
                    break;
                }
                if queued.change.status == ChangeStatus::Pending {
                    queued.change.status = ChangeStatus::Syncing;
                    batch.push(queued.change.clone());
                }
            }
            (batch, epoch)
        };

        if batch.is_empty() {
            return Ok(FlushOutcome::Idle);
        }
        debug!(changes = batch.len(), "submitting batch");

        let response = transport.submit_batch(&batch).await;
        let batch_ids: HashSet<&str> = batch.iter().map(|c| c.id.as_str()).collect();

        let outcome = {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                // The queue was cleared underneath us; whatever the server
                // did, these entries no longer exist locally.
                return Ok(FlushOutcome::Aborted);
            }

            match response {
                Err(e) => {
                    for queued in state.entries.iter_mut() {
                        if queued.change.status == ChangeStatus::Syncing
                            && batch_ids.contains(queued.change.id.as_str())
                        {
                            queued.change.status = ChangeStatus::Pending;
                            queued.change.retry_count += 1;
                        }
                    }
                    FlushOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Ok(response) => {
                    let applied: HashSet<&str> =
                        response.applied.iter().map(String::as_str).collect();
                    state
                        .entries
                        .retain(|q| !applied.contains(q.change.id.as_str()));

                    for rejection in &response.errors {
                        if let Some(queued) = state
                            .entries
                            .iter_mut()
                            .find(|q| q.change.id == rejection.id)
                        {
                            queued.change.status = ChangeStatus::Error;
                            queued.last_error = Some(rejection.error.clone());
                        }
                    }

                    // Anything the server did not mention goes back to
                    // pending for the next attempt.
                    for queued in state.entries.iter_mut() {
                        if queued.change.status == ChangeStatus::Syncing {
                            queued.change.status = ChangeStatus::Pending;
                            queued.change.retry_count += 1;
                        }
                    }

                    FlushOutcome::Flushed {
                        applied: response.applied.len(),
                        rejected: response.errors.len(),
                    }
                }
            }
        };

        let _ = self.persist_tx.send(());
        if let FlushOutcome::Flushed { applied, rejected } = outcome {
            info!(applied, rejected, "batch flushed");
        }
        Ok(outcome)
    }

    /// Empty the queue (identity/session reset) and persist immediately.
    ///
    /// Bumps the epoch so any in-flight flush drops its results instead of
    /// resurrecting cleared entries.
    pub async fn clear(&self) -> Result<(), BufferError> {
        {
            let mut state = lock(&self.state);
            state.epoch += 1;
            state.entries.clear();
        }
        self.sync_journal().await
    }

    /// Write the journal now, bypassing the persister task. Used by `clear`
    /// and by callers that need a durability barrier.
    pub async fn sync_journal(&self) -> Result<(), BufferError> {
        write_journal(&self.state, &self.journal).await
    }
}

async fn write_journal(
    state: &Arc<Mutex<BufferState>>,
    journal: &PathBuf,
) -> Result<(), BufferError> {
    let bytes = {
        let state = lock(state);
        serde_json::to_vec_pretty(&state.entries)?
    };
    if let Some(parent) = journal.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = journal.with_extension("json.tmp");
    tokio::fs::write(&staging, &bytes).await?;
    tokio::fs::rename(&staging, journal).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use common::{ChangeRejection, SyncTable, WriteOp};
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;

    fn change(id: &str) -> WriteChange {
        let mut c = WriteChange::new(SyncTable::Notes, WriteOp::Insert, json!({"id": id}));
        c.id = id.to_string();
        c
    }

    async fn temp_buffer() -> (WriteBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = WriteBuffer::open(dir.path().join("outbox.json"), 16)
            .await
            .unwrap();
        (buffer, dir)
    }

    /// Applies every submitted change.
    struct AcceptAll;

    #[async_trait]
    impl BatchTransport for AcceptAll {
        async fn submit_batch(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError> {
            Ok(BatchResponse {
                success: true,
                applied: changes.iter().map(|c| c.id.clone()).collect(),
                responses: changes.iter().map(|c| c.payload.clone()).collect(),
                errors: vec![],
            })
        }
    }

    /// Fails the whole submission.
    struct NetworkDown;

    #[async_trait]
    impl BatchTransport for NetworkDown {
        async fn submit_batch(&self, _: &[WriteChange]) -> Result<BatchResponse, ApiError> {
            Err(ApiError::Network("connection refused".into()))
        }
    }

    /// Rejects one specific change id, applies the rest.
    struct RejectOne(&'static str);

    #[async_trait]
    impl BatchTransport for RejectOne {
        async fn submit_batch(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError> {
            let mut applied = Vec::new();
            let mut errors = Vec::new();
            for c in changes {
                if c.id == self.0 {
                    errors.push(ChangeRejection {
                        id: c.id.clone(),
                        error: "constraint violated".into(),
                    });
                } else {
                    applied.push(c.id.clone());
                }
            }
            Ok(BatchResponse {
                success: errors.is_empty(),
                applied,
                responses: vec![],
                errors,
            })
        }
    }

    /// Signals when the batch arrives, then waits until released.
    struct Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl BatchTransport for Gated {
        async fn submit_batch(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(BatchResponse {
                success: true,
                applied: changes.iter().map(|c| c.id.clone()).collect(),
                responses: vec![],
                errors: vec![],
            })
        }
    }

    #[tokio::test]
    async fn enqueue_is_immediate_and_forces_pending() {
        let (buffer, _dir) = temp_buffer().await;
        let mut c = change("c1");
        c.status = ChangeStatus::Applied;
        buffer.enqueue(c);
        assert_eq!(buffer.pending_count(), 1);
        assert_eq!(buffer.snapshot()[0].change.status, ChangeStatus::Pending);
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");

        let buffer = WriteBuffer::open(path.clone(), 16).await.unwrap();
        buffer.enqueue(change("c1"));
        buffer.enqueue(change("c2"));
        buffer.sync_journal().await.unwrap();

        let reopened = WriteBuffer::open(path, 16).await.unwrap();
        assert_eq!(reopened.pending_count(), 2);
    }

    #[tokio::test]
    async fn interrupted_flush_recovers_as_pending_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");

        // Journal as left behind by a crash mid-flush.
        let mut stuck = change("c1");
        stuck.status = ChangeStatus::Syncing;
        let journal = serde_json::to_vec(&vec![QueuedChange {
            change: stuck,
            last_error: None,
        }])
        .unwrap();
        std::fs::write(&path, journal).unwrap();

        let buffer = WriteBuffer::open(path, 16).await.unwrap();
        let entries = buffer.snapshot();
        assert_eq!(entries[0].change.status, ChangeStatus::Pending);
        assert_eq!(entries[0].change.retry_count, 1);
    }

    #[tokio::test]
    async fn corrupt_journal_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(&path, b"[{ truncated").unwrap();

        let buffer = WriteBuffer::open(path, 16).await.unwrap();
        assert_eq!(buffer.pending_count(), 0);
    }

    #[tokio::test]
    async fn flush_with_empty_queue_is_idle() {
        let (buffer, _dir) = temp_buffer().await;
        assert_eq!(buffer.flush(&AcceptAll).await.unwrap(), FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn flush_removes_applied_changes() {
        let (buffer, _dir) = temp_buffer().await;
        buffer.enqueue(change("c1"));
        buffer.enqueue(change("c2"));

        let outcome = buffer.flush(&AcceptAll).await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                applied: 2,
                rejected: 0
            }
        );
        assert!(buffer.snapshot().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_keeps_everything_pending() {
        let (buffer, _dir) = temp_buffer().await;
        buffer.enqueue(change("c1"));
        buffer.enqueue(change("c2"));

        let outcome = buffer.flush(&NetworkDown).await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Failed { .. }));

        let entries = buffer.snapshot();
        assert_eq!(entries.len(), 2);
        for queued in entries {
            assert_eq!(queued.change.status, ChangeStatus::Pending);
            assert_eq!(queued.change.retry_count, 1);
        }
    }

    #[tokio::test]
    async fn rejected_changes_keep_the_server_error() {
        let (buffer, _dir) = temp_buffer().await;
        buffer.enqueue(change("good"));
        buffer.enqueue(change("bad"));

        let outcome = buffer.flush(&RejectOne("bad")).await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                applied: 1,
                rejected: 1
            }
        );

        let entries = buffer.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change.id, "bad");
        assert_eq!(entries[0].change.status, ChangeStatus::Error);
        assert_eq!(entries[0].last_error.as_deref(), Some("constraint violated"));

        // Errored entries are not retried; only clear removes them.
        assert_eq!(buffer.flush(&AcceptAll).await.unwrap(), FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn batch_size_bounds_a_single_flush() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = WriteBuffer::open(dir.path().join("outbox.json"), 2)
            .await
            .unwrap();
        for i in 0..5 {
            buffer.enqueue(change(&format!("c{i}")));
        }

        let outcome = buffer.flush(&AcceptAll).await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                applied: 2,
                rejected: 0
            }
        );
        assert_eq!(buffer.pending_count(), 3);
    }

    #[tokio::test]
    async fn clear_during_flight_discards_the_response() {
        let (buffer, _dir) = temp_buffer().await;
        let buffer = Arc::new(buffer);
        buffer.enqueue(change("c1"));

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Gated {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };

        let flusher = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.flush(&transport).await.unwrap() })
        };

        started.notified().await;
        buffer.clear().await.unwrap();
        release.notify_one();

        assert_eq!(flusher.await.unwrap(), FlushOutcome::Aborted);
        assert!(buffer.snapshot().is_empty());

        // Nothing was resurrected afterwards either.
        assert_eq!(buffer.flush(&AcceptAll).await.unwrap(), FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn concurrent_flush_coalesces() {
        let (buffer, _dir) = temp_buffer().await;
        let buffer = Arc::new(buffer);
        buffer.enqueue(change("c1"));

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Gated {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };

        let first = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.flush(&transport).await.unwrap() })
        };

        started.notified().await;
        assert_eq!(
            buffer.flush(&AcceptAll).await.unwrap(),
            FlushOutcome::InFlight
        );
        release.notify_one();

        assert_eq!(
            first.await.unwrap(),
            FlushOutcome::Flushed {
                applied: 1,
                rejected: 0
            }
        );
    }
}
