//! Split the ordered structure collection into contiguous batches.

use crate::error::{Error, Result};
use crate::structure::Structure;
use std::ops::Range;
use std::sync::Arc;

/// Contiguous window of the input collection.
///
/// `start_index` is the absolute position of the first structure and the only
/// positional key later stages rely on. `batch_id` is 1-based and exists for
/// progress reporting.
#[derive(Debug, Clone)]
pub struct Batch {
    source: Arc<[Structure]>,
    start_index: usize,
    len: usize,
    batch_id: usize,
}

impl Batch {
    pub fn structures(&self) -> &[Structure] {
        &self.source[self.index_range()]
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn batch_id(&self) -> usize {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute indices covered by this batch.
    pub fn index_range(&self) -> Range<usize> {
        self.start_index..self.start_index + self.len
    }
}

/// Partition `structures` into batches of `batch_size`; the last may be shorter.
///
/// An empty collection yields no batches.
pub fn partition(structures: Arc<[Structure]>, batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }

    let total = structures.len();
    let batches = (0..total)
        .step_by(batch_size)
        .enumerate()
        .map(|(k, start_index)| Batch {
            source: Arc::clone(&structures),
            start_index,
            len: batch_size.min(total - start_index),
            batch_id: k + 1,
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        "Partitioned {} structures into {} batches of up to {}",
        total,
        batches.len(),
        batch_size
    );

    Ok(batches)
}
