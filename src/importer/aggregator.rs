//! Result aggregation for the commit phase
//!
//! Workers never touch shared counters. Each one sends its [`BatchOutcome`]
//! down a channel, and a single aggregator task owns the running totals.

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::models::{BatchOutcome, BatchStatus};

/// Sums over every merged batch outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitTotals {
    pub inserted: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub batches_committed: usize,
    pub batches_rolled_back: usize,
    pub batches_cancelled: usize,
}

impl CommitTotals {
    pub fn batches(&self) -> usize {
        self.batches_committed + self.batches_rolled_back + self.batches_cancelled
    }

    pub fn records(&self) -> usize {
        self.inserted + self.failed + self.cancelled
    }
}

#[derive(Debug)]
pub struct ResultAggregator {
    seen: Vec<bool>,
    totals: CommitTotals,
}

impl ResultAggregator {
    /// Expect outcomes for batch indices `0..expected`
    pub fn new(expected: usize) -> Self {
        Self {
            seen: vec![false; expected],
            totals: CommitTotals::default(),
        }
    }

    /// Fold one outcome into the totals. Each batch is counted once; a
    /// repeated or unknown batch index is ignored and reported as `false`.
    pub fn merge(&mut self, outcome: BatchOutcome) -> bool {
        match self.seen.get_mut(outcome.batch_index) {
            Some(seen) if !*seen => *seen = true,
            Some(_) => {
                warn!("Ignoring repeated outcome for batch {}", outcome.batch_index);
                return false;
            }
            None => {
                warn!("Ignoring outcome for unknown batch {}", outcome.batch_index);
                return false;
            }
        }

        self.totals.inserted += outcome.inserted;
        self.totals.failed += outcome.failed;
        self.totals.cancelled += outcome.cancelled;
        match outcome.status {
            BatchStatus::Committed => self.totals.batches_committed += 1,
            BatchStatus::RolledBack => self.totals.batches_rolled_back += 1,
            BatchStatus::Cancelled => self.totals.batches_cancelled += 1,
        }

        if outcome.status != BatchStatus::Cancelled {
            info!(
                "Batch {} finished ({}/{}): {} inserted, {} failed",
                outcome.batch_index,
                self.totals.batches(),
                self.seen.len(),
                outcome.inserted,
                outcome.failed
            );
        }
        true
    }

    /// Drain `outcomes` until every sender is gone
    pub async fn run(mut self, mut outcomes: UnboundedReceiver<BatchOutcome>) -> Self {
        while let Some(outcome) = outcomes.recv().await {
            self.merge(outcome);
        }
        self
    }

    /// Batches that have not reported yet
    pub fn missing(&self) -> usize {
        self.seen.iter().filter(|seen| !**seen).count()
    }

    pub fn totals(&self) -> CommitTotals {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_merge_is_order_independent() {
        let outcomes = [
            BatchOutcome::committed(0, 2, 0),
            BatchOutcome::rolled_back(1, 2),
            BatchOutcome::committed(2, 0, 1),
            BatchOutcome::cancelled(3, 4),
        ];

        let mut forward = ResultAggregator::new(4);
        for outcome in outcomes {
            assert!(forward.merge(outcome));
        }
        let mut backward = ResultAggregator::new(4);
        for outcome in outcomes.iter().rev() {
            assert!(backward.merge(*outcome));
        }

        assert_eq!(forward.totals(), backward.totals());
        assert_eq!(
            forward.totals(),
            CommitTotals {
                inserted: 2,
                failed: 3,
                cancelled: 4,
                batches_committed: 2,
                batches_rolled_back: 1,
                batches_cancelled: 1,
            }
        );
        assert_eq!(forward.missing(), 0);
    }

    #[test]
    fn test_each_batch_counts_once() {
        let mut aggregator = ResultAggregator::new(2);
        assert!(aggregator.merge(BatchOutcome::committed(0, 5, 0)));
        assert!(!aggregator.merge(BatchOutcome::committed(0, 5, 0)));
        assert!(!aggregator.merge(BatchOutcome::committed(7, 5, 0)));

        assert_eq!(aggregator.totals().inserted, 5);
        assert_eq!(aggregator.missing(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel_from_many_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(ResultAggregator::new(8).run(rx));

        let mut senders = Vec::new();
        for worker in 0..4 {
            let tx = tx.clone();
            senders.push(tokio::spawn(async move {
                for batch in [worker, worker + 4] {
                    tx.send(BatchOutcome::committed(batch, 3, 0)).unwrap();
                }
            }));
        }
        drop(tx);
        for sender in senders {
            sender.await.unwrap();
        }

        let aggregator = handle.await.unwrap();
        assert_eq!(aggregator.totals().inserted, 24);
        assert_eq!(aggregator.totals().batches_committed, 8);
        assert_eq!(aggregator.missing(), 0);
    }
}
