//! Parallel, bounded batch committer
//!
//! A fixed pool of workers drains a shared batch queue. Each worker owns one
//! store session for its whole life and commits one batch per transaction.
//! Outcomes travel over a channel to a single [`ResultAggregator`] task, which
//! is the only place the totals are mutated.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::{CommitTotals, ResultAggregator};
use crate::errors::{ImportError, ImportResult};
use crate::models::{Batch, BatchOutcome};
use crate::repositories::{UserStore, UserStoreSession};

type BatchQueue = Arc<Mutex<VecDeque<Batch>>>;

pub struct ParallelCommitter {
    workers: usize,
    cancel: CancellationToken,
}

impl ParallelCommitter {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching new batches once `token` is cancelled. Batches
    /// already in flight still finish.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Commit every batch and return the merged totals.
    ///
    /// Fails only when not a single worker can acquire a store session.
    /// Every other failure is absorbed into the totals: each batch is
    /// reported exactly once as committed, rolled back or cancelled.
    pub async fn commit(
        &self,
        store: Arc<dyn UserStore>,
        batches: Vec<Batch>,
    ) -> ImportResult<CommitTotals> {
        if batches.is_empty() {
            return Ok(CommitTotals::default());
        }

        let total = batches.len();
        let worker_count = self.workers.min(total);

        let mut sessions = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            match store.open_session().await {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Worker {} could not acquire a store connection: {}", id, e),
            }
        }
        if sessions.is_empty() {
            return Err(ImportError::store_connect(
                "no committer worker could acquire a store connection",
            ));
        }

        info!(
            "Committing {} batches with {} workers",
            total,
            sessions.len()
        );

        let queue: BatchQueue = Arc::new(Mutex::new(batches.into()));
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let aggregator = tokio::spawn(ResultAggregator::new(total).run(receiver));

        let mut workers = JoinSet::new();
        for (id, session) in sessions.into_iter().enumerate() {
            let worker = Worker {
                id,
                session: Some(session),
                store: Arc::clone(&store),
                queue: Arc::clone(&queue),
                outcomes: outcomes.clone(),
                cancel: self.cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Committer worker terminated abnormally: {}", e);
            }
        }

        // Anything still queued was never dispatched.
        let leftover: Vec<Batch> = queue.lock().await.drain(..).collect();
        if !leftover.is_empty() {
            let cancelled = self.cancel.is_cancelled();
            if cancelled {
                info!("Run cancelled, skipping {} undispatched batches", leftover.len());
            } else {
                warn!(
                    "No worker left to commit {} batches, counting them as failed",
                    leftover.len()
                );
            }
            for batch in leftover {
                let outcome = if cancelled {
                    BatchOutcome::cancelled(batch.index, batch.len())
                } else {
                    BatchOutcome::rolled_back(batch.index, batch.len())
                };
                let _ = outcomes.send(outcome);
            }
        }
        drop(outcomes);

        let aggregator = aggregator
            .await
            .map_err(|e| ImportError::internal(format!("result aggregator failed: {}", e)))?;
        if aggregator.missing() > 0 {
            return Err(ImportError::internal(format!(
                "{} batches never reported an outcome",
                aggregator.missing()
            )));
        }

        Ok(aggregator.totals())
    }
}

struct Worker {
    id: usize,
    session: Option<Box<dyn UserStoreSession>>,
    store: Arc<dyn UserStore>,
    queue: BatchQueue,
    outcomes: UnboundedSender<BatchOutcome>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                debug!("Worker {} stopping on cancellation", self.id);
                break;
            }

            let Some(batch) = self.queue.lock().await.pop_front() else {
                break;
            };

            if self.session.is_none() {
                match self.store.open_session().await {
                    Ok(session) => self.session = Some(session),
                    Err(e) => {
                        warn!("Worker {} could not reconnect, retiring: {}", self.id, e);
                        self.queue.lock().await.push_front(batch);
                        break;
                    }
                }
            }
            let Some(session) = self.session.as_mut() else {
                break;
            };

            let guard = OutcomeGuard::new(&self.outcomes, &batch);
            match session.commit_batch(&batch).await {
                Ok(outcome) => guard.report(outcome),
                Err(e) => {
                    warn!(
                        "Batch {} rolled back ({} records): {}",
                        batch.index,
                        batch.len(),
                        e
                    );
                    guard.report(BatchOutcome::rolled_back(batch.index, batch.len()));
                    // The connection may be broken; release it and take a
                    // fresh one before the next batch.
                    self.session = None;
                }
            }
        }

        debug!("Worker {} finished", self.id);
    }
}

/// Reports a batch as failed if it is dropped before an outcome is sent,
/// which happens when the commit future panics.
struct OutcomeGuard<'a> {
    outcomes: &'a UnboundedSender<BatchOutcome>,
    batch_index: usize,
    batch_size: usize,
    reported: bool,
}

impl<'a> OutcomeGuard<'a> {
    fn new(outcomes: &'a UnboundedSender<BatchOutcome>, batch: &Batch) -> Self {
        Self {
            outcomes,
            batch_index: batch.index,
            batch_size: batch.len(),
            reported: false,
        }
    }

    fn report(mut self, outcome: BatchOutcome) {
        self.reported = true;
        let _ = self.outcomes.send(outcome);
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if !self.reported {
            error!(
                "Batch {} abandoned mid-commit, counting {} records as failed",
                self.batch_index, self.batch_size
            );
            let _ = self
                .outcomes
                .send(BatchOutcome::rolled_back(self.batch_index, self.batch_size));
        }
    }
}
