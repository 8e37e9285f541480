//! Merge completion-ordered batch outcomes back into input order.

use super::worker::{BatchOutcome, FeatureRecord};
use crate::error::{Error, Result};

/// A batch whose structures are absent from the output.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub batch_id: usize,
    pub start_index: usize,
    pub len: usize,
    pub error: String,
}

/// Records in ascending `structure_index` order plus the batches that failed.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub records: Vec<FeatureRecord>,
    /// Sorted by `start_index`
    pub failed: Vec<FailedBatch>,
    pub total_batches: usize,
}

impl Extraction {
    pub fn structures_dropped(&self) -> usize {
        self.failed.iter().map(|f| f.len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Flatten record groups and sort by `structure_index`.
///
/// Gaps are allowed. A repeated index means two batches claimed the same
/// structure and is rejected.
pub fn merge<I>(groups: I) -> Result<Vec<FeatureRecord>>
where
    I: IntoIterator<Item = Vec<FeatureRecord>>,
{
    let mut records: Vec<FeatureRecord> = groups.into_iter().flatten().collect();
    records.sort_by_key(|r| r.structure_index);

    if let Some(pair) = records
        .windows(2)
        .find(|w| w[0].structure_index == w[1].structure_index)
    {
        return Err(Error::DuplicateIndex(pair[0].structure_index));
    }

    Ok(records)
}

/// Split outcomes into ordered records and failures.
pub fn reassemble(outcomes: Vec<BatchOutcome>) -> Result<Extraction> {
    let total_batches = outcomes.len();
    let mut failed = Vec::new();
    let mut groups = Vec::with_capacity(total_batches);

    for outcome in outcomes {
        match outcome {
            BatchOutcome::Completed { records, .. } => groups.push(records),
            BatchOutcome::Failed {
                batch_id,
                start_index,
                len,
                error,
            } => failed.push(FailedBatch {
                batch_id,
                start_index,
                len,
                error,
            }),
        }
    }

    failed.sort_by_key(|f| f.start_index);
    let records = merge(groups)?;

    tracing::debug!(
        "Reassembled {} records from {} batches ({} failed)",
        records.len(),
        total_batches,
        failed.len()
    );

    Ok(Extraction {
        records,
        failed,
        total_batches,
    })
}
