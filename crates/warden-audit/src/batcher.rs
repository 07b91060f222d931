//! Write path: immediate commits or a debounced background batch.
//!
//! # Architecture
//!
//! ```text
//! enqueue(record) ──mpsc──► worker task
//!                             queue empty? arm deadline (debounce)
//!                             deadline fires  → drain whole queue, in order
//!                             Flush(ack)      → drain now, ack with report
//!                             cancel / closed → drain remainder, exit
//! ```
//!
//! The queue is owned by exactly one task, so at most one drain runs at a
//! time. A failed commit inside a drain is logged and the drain moves on;
//! failures are collected and reported by the next [`WriteBatcher::flush`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AuditError, AuditResult};
use crate::index::IndexMaintainer;
use crate::record::{AuditRecord, RecordId};
use crate::stats::StatsAggregator;

/// Default debounce window for batched writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default bound of the batch channel. Enqueue waits when it is full.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How records reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Every record is committed before the call returns.
    Immediate,
    /// Records are queued and committed after a quiet period.
    Debounced {
        /// Time between the first enqueue into an empty queue and the drain.
        delay: Duration,
    },
}

impl Default for BatchMode {
    fn default() -> Self {
        Self::Debounced {
            delay: DEFAULT_DEBOUNCE,
        }
    }
}

/// A queued record that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    /// The record's id.
    pub id: RecordId,
    /// Why the commit failed.
    pub error: String,
}

/// Outcome of the drains since the previous flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Records committed.
    pub committed: usize,
    /// Records that failed to commit. They are not retried.
    pub failures: Vec<FailedWrite>,
}

impl FlushReport {
    /// Whether every attempted record was committed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Command {
    Record(Box<AuditRecord>),
    Flush(oneshot::Sender<FlushReport>),
}

/// Routes records to the [`IndexMaintainer`] according to a [`BatchMode`].
pub struct WriteBatcher {
    mode: BatchMode,
    maintainer: IndexMaintainer,
    stats: Arc<StatsAggregator>,
    sender: Option<mpsc::Sender<Command>>,
    worker: Mutex<Option<JoinHandle<FlushReport>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WriteBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatcher")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl WriteBatcher {
    /// Create a batcher. In debounced mode this spawns the worker task, so
    /// it must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        maintainer: IndexMaintainer,
        stats: Arc<StatsAggregator>,
        mode: BatchMode,
        queue_capacity: usize,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (sender, worker) = match mode {
            BatchMode::Immediate => (None, None),
            BatchMode::Debounced { delay } => {
                let (tx, rx) = mpsc::channel(queue_capacity.max(1));
                let worker = BatchWorker {
                    maintainer: maintainer.clone(),
                    stats: Arc::clone(&stats),
                    delay,
                    committed: 0,
                    failures: Vec::new(),
                };
                let handle = tokio::spawn(worker.run(rx, cancel.clone()));
                (Some(tx), Some(handle))
            },
        };

        Self {
            mode,
            maintainer,
            stats,
            sender,
            worker: Mutex::new(worker),
            cancel,
        }
    }

    /// Commit `record` now and return once the commit resolved.
    ///
    /// # Errors
    ///
    /// Returns the commit error unchanged.
    pub async fn write(&self, record: &AuditRecord) -> AuditResult<()> {
        self.maintainer.commit(record).await?;
        self.stats.record_committed(record);
        Ok(())
    }

    /// Hand `record` to the worker without waiting for the commit.
    ///
    /// In immediate mode this is [`write`](Self::write).
    ///
    /// # Errors
    ///
    /// - [`AuditError::WriterClosed`] once the worker has shut down.
    /// - In immediate mode, the commit error.
    pub async fn enqueue(&self, record: AuditRecord) -> AuditResult<()> {
        let Some(sender) = &self.sender else {
            return self.write(&record).await;
        };
        sender
            .send(Command::Record(Box::new(record)))
            .await
            .map_err(|_| AuditError::WriterClosed)
    }

    /// Drain the queue now and wait for every queued record to be attempted.
    ///
    /// Reports what happened since the previous flush. Immediate mode has
    /// nothing queued and returns an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::WriterClosed`] once the worker has shut down.
    pub async fn flush(&self) -> AuditResult<FlushReport> {
        let Some(sender) = &self.sender else {
            return Ok(FlushReport::default());
        };
        let (ack, done) = oneshot::channel();
        sender
            .send(Command::Flush(ack))
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        done.await.map_err(|_| AuditError::WriterClosed)
    }

    /// Stop the worker after it drained everything already queued.
    ///
    /// Idempotent: later calls return an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::WriterClosed`] if the worker task panicked.
    pub async fn shutdown(&self) -> AuditResult<FlushReport> {
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                warn!(error = %e, "Audit batch worker did not exit cleanly");
                AuditError::WriterClosed
            }),
            None => Ok(FlushReport::default()),
        }
    }
}

struct BatchWorker {
    maintainer: IndexMaintainer,
    stats: Arc<StatsAggregator>,
    delay: Duration,
    committed: usize,
    failures: Vec<FailedWrite>,
}

impl BatchWorker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> FlushReport {
        let mut queue: Vec<AuditRecord> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("Audit batch worker cancelled");
                    break;
                }

                () = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    deadline = None;
                    self.drain(&mut queue).await;
                }

                command = rx.recv() => match command {
                    Some(Command::Record(record)) => {
                        if queue.is_empty() {
                            let now = Instant::now();
                            deadline = Some(now.checked_add(self.delay).unwrap_or(now));
                        }
                        queue.push(*record);
                    }
                    Some(Command::Flush(ack)) => {
                        deadline = None;
                        self.drain(&mut queue).await;
                        let _ = ack.send(self.take_report());
                    }
                    None => {
                        debug!("Audit batch channel closed");
                        break;
                    }
                }
            }
        }

        // Nothing new gets in; everything already sent is still attempted.
        rx.close();
        while let Some(command) = rx.recv().await {
            match command {
                Command::Record(record) => queue.push(*record),
                Command::Flush(ack) => {
                    self.drain(&mut queue).await;
                    let _ = ack.send(self.take_report());
                },
            }
        }
        self.drain(&mut queue).await;
        self.take_report()
    }

    async fn drain(&mut self, queue: &mut Vec<AuditRecord>) {
        if queue.is_empty() {
            return;
        }
        let batch = queue.len();
        let mut failed = 0usize;
        for record in queue.drain(..) {
            match self.maintainer.commit(&record).await {
                Ok(()) => {
                    self.committed = self.committed.saturating_add(1);
                    self.stats.record_committed(&record);
                },
                Err(e) => {
                    failed = failed.saturating_add(1);
                    warn!(record_id = %record.id, error = %e, "Batched audit write failed");
                    self.failures.push(FailedWrite {
                        id: record.id,
                        error: e.to_string(),
                    });
                },
            }
        }
        debug!(batch, failed, "Drained audit batch");
    }

    fn take_report(&mut self) -> FlushReport {
        FlushReport {
            committed: std::mem::take(&mut self.committed),
            failures: std::mem::take(&mut self.failures),
        }
    }
}
