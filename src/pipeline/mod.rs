//! Batch orchestration: partition, fan out, collect, reassemble.

mod batcher;
mod executor;
mod metrics;
mod reassemble;
mod worker;

pub use batcher::{partition, Batch};
pub use executor::{
    BatchProgress, LogProgress, NoProgress, ParallelExecutor, ProgressFanout, ProgressSink,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reassemble::{merge, reassemble, Extraction, FailedBatch};
pub use worker::{BatchOutcome, EncodeTask, FeatureRecord, WorkerTask};
