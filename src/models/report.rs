//! Final run report

use serde::Serialize;
use std::fmt;

/// Aggregate of every batch outcome plus the store counts around the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub initial_count: i64,
    /// `None` when the store could not be counted after the commit phase
    pub final_count: Option<i64>,
    pub rows_read: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub batches_total: usize,
    pub batches_committed: usize,
    pub batches_rolled_back: usize,
    pub batches_cancelled: usize,
}

impl RunReport {
    /// Rows accounted for by every counter
    pub fn accounted(&self) -> usize {
        self.invalid + self.duplicates + self.inserted + self.failed + self.cancelled
    }

    /// Every row read ended up in exactly one counter
    pub fn is_conserved(&self) -> bool {
        self.accounted() == self.rows_read
    }

    /// Net rows the store gained while the run was in progress
    pub fn store_delta(&self) -> Option<i64> {
        self.final_count.map(|count| count - self.initial_count)
    }

    /// The store grew by exactly the number of inserted rows. A mismatch
    /// means something else wrote to the store during the run.
    pub fn is_consistent(&self) -> bool {
        match (self.store_delta(), i64::try_from(self.inserted)) {
            (Some(delta), Ok(inserted)) => delta == inserted,
            _ => false,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import Summary")?;
        writeln!(f, "Initial count:    {}", self.initial_count)?;
        match self.final_count {
            Some(count) => writeln!(f, "Final count:      {}", count)?,
            None => writeln!(f, "Final count:      unavailable")?,
        }
        writeln!(f, "Rows read:        {}", self.rows_read)?;
        writeln!(f, "Inserted:         {}", self.inserted)?;
        writeln!(f, "Duplicates:       {}", self.duplicates)?;
        writeln!(f, "Invalid:          {}", self.invalid)?;
        writeln!(f, "Failed:           {}", self.failed)?;
        if self.cancelled > 0 {
            writeln!(f, "Cancelled:        {}", self.cancelled)?;
        }
        writeln!(
            f,
            "Batches:          {} ({} committed, {} rolled back, {} cancelled)",
            self.batches_total,
            self.batches_committed,
            self.batches_rolled_back,
            self.batches_cancelled
        )?;
        match self.store_delta() {
            Some(delta) if self.is_consistent() => {
                write!(f, "Store delta:      {} (consistent)", delta)
            }
            Some(delta) => write!(
                f,
                "Store delta:      {} (expected {}, concurrent writers?)",
                delta, self.inserted
            ),
            None => write!(f, "Store delta:      unknown"),
        }
    }
}
