//! Deduplicating batch accumulator
//!
//! Collects validated rows for one table from one source. Rows are compared
//! by value, so the same tuple appears at most once per batch. Uniqueness is
//! not tracked across batches; the insert template handles that side.

use std::collections::BTreeSet;

use crate::schema::{FeedRecord, FieldValue};

/// Default number of distinct rows per INSERT statement
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// One drained batch, ready to render as a VALUES list
pub type Batch = BTreeSet<Vec<FieldValue>>;

#[derive(Debug)]
pub struct BatchAccumulator {
    rows: Batch,
    chunk_size: usize,
}

impl BatchAccumulator {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            rows: Batch::new(),
            chunk_size,
        }
    }

    /// Add a record. Returns false when an identical row is already batched.
    pub fn add(&mut self, record: FeedRecord) -> bool {
        self.rows.insert(record.into_values())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn should_flush(&self) -> bool {
        self.rows.len() >= self.chunk_size
    }

    /// Take the current contents and start over empty
    pub fn drain(&mut self) -> Batch {
        std::mem::take(&mut self.rows)
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
