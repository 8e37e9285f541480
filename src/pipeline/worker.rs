//! Per-batch unit of work.

use super::batcher::Batch;
use crate::encoder::{EncodeError, EncoderFactory};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Feature vector of one structure, keyed by its absolute input position.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub structure_index: usize,
    pub features: Vec<f32>,
    pub num_atoms: usize,
}

/// Result of running one batch. Failures carry the batch identity and never
/// abort the run.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Completed {
        batch_id: usize,
        start_index: usize,
        records: Vec<FeatureRecord>,
        elapsed: Duration,
    },
    Failed {
        batch_id: usize,
        start_index: usize,
        len: usize,
        error: String,
    },
}

impl BatchOutcome {
    pub fn batch_id(&self) -> usize {
        match self {
            Self::Completed { batch_id, .. } | Self::Failed { batch_id, .. } => *batch_id,
        }
    }

    pub fn start_index(&self) -> usize {
        match self {
            Self::Completed { start_index, .. } | Self::Failed { start_index, .. } => *start_index,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Number of records this batch contributes.
    pub fn record_count(&self) -> usize {
        match self {
            Self::Completed { records, .. } => records.len(),
            Self::Failed { .. } => 0,
        }
    }

    /// Records of a completed batch; empty for a failed one.
    pub fn into_records(self) -> Vec<FeatureRecord> {
        match self {
            Self::Completed { records, .. } => records,
            Self::Failed { .. } => Vec::new(),
        }
    }

    fn failed(batch: &Batch, error: impl Into<String>) -> Self {
        Self::Failed {
            batch_id: batch.batch_id(),
            start_index: batch.start_index(),
            len: batch.len(),
            error: error.into(),
        }
    }
}

/// Work applied to each batch by the executor.
pub trait WorkerTask: Send + Sync + 'static {
    fn run(&self, batch: &Batch) -> BatchOutcome;
}

impl<F> WorkerTask for F
where
    F: Fn(&Batch) -> BatchOutcome + Send + Sync + 'static,
{
    fn run(&self, batch: &Batch) -> BatchOutcome {
        self(batch)
    }
}

/// Encodes a batch with an encoder built for that batch alone.
#[derive(Clone)]
pub struct EncodeTask {
    factory: Arc<dyn EncoderFactory>,
}

impl EncodeTask {
    pub fn new(factory: Arc<dyn EncoderFactory>) -> Self {
        Self { factory }
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<FeatureRecord>, EncodeError> {
        let mut encoder = self.factory.create()?;
        let structures = batch.structures();
        let outputs = encoder.transform(structures)?;

        if outputs.len() != structures.len() {
            return Err(EncodeError::OutputCount {
                expected: structures.len(),
                found: outputs.len(),
            });
        }

        let dim = encoder.feature_dim();
        if let Some((offset, features)) = outputs.iter().enumerate().find(|(_, f)| f.len() != dim) {
            return Err(EncodeError::FeatureLength {
                offset,
                expected: dim,
                found: features.len(),
            });
        }

        Ok(outputs
            .into_iter()
            .zip(structures)
            .enumerate()
            .map(|(offset, (features, structure))| FeatureRecord {
                structure_index: batch.start_index() + offset,
                features,
                num_atoms: structure.atom_count(),
            })
            .collect())
    }
}

impl WorkerTask for EncodeTask {
    fn run(&self, batch: &Batch) -> BatchOutcome {
        let start = Instant::now();
        match self.encode(batch) {
            Ok(records) => BatchOutcome::Completed {
                batch_id: batch.batch_id(),
                start_index: batch.start_index(),
                records,
                elapsed: start.elapsed(),
            },
            Err(e) => BatchOutcome::failed(batch, e.to_string()),
        }
    }
}

/// Run a task, turning a panic into a failed outcome for that batch.
pub(crate) fn run_contained<T: WorkerTask + ?Sized>(task: &T, batch: &Batch) -> BatchOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run(batch))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            BatchOutcome::failed(batch, format!("worker panicked: {message}"))
        }
    }
}
