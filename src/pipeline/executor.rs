//! Batch fan-out over a fixed worker pool.
//!
//! ```text
//!             ┌──────────┐
//!          ┌─▶│ worker 0 │──┐
//! ┌───────┐│  └──────────┘  │  ┌────────────┐
//! │ queue │┤       ...      ├─▶│ collection │──▶ outcomes (completion order)
//! └───────┘│  ┌──────────┐  │  └────────────┘
//!          └─▶│ worker N │──┘        │
//!             └──────────┘      progress sink
//! ```
//!
//! Workers pull batches from a shared queue and run each one under
//! `spawn_blocking`. Outcomes are consumed as they finish, so a slow batch never
//! holds back the rest. Only the collection loop reports progress.

use super::batcher::Batch;
use super::worker::{run_contained, BatchOutcome, WorkerTask};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Progress after one batch has been collected.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batch_id: usize,
    pub start_index: usize,
    /// Batches collected so far, including this one
    pub completed: usize,
    pub total: usize,
    /// Records contributed by this batch
    pub records: usize,
    /// Structures lost because this batch failed
    pub dropped: usize,
    pub failed: bool,
    pub elapsed: Duration,
}

impl BatchProgress {
    fn from_outcome(outcome: &BatchOutcome, completed: usize, total: usize) -> Self {
        let (dropped, elapsed) = match outcome {
            BatchOutcome::Completed { elapsed, .. } => (0, *elapsed),
            BatchOutcome::Failed { len, .. } => (*len, Duration::ZERO),
        };
        Self {
            batch_id: outcome.batch_id(),
            start_index: outcome.start_index(),
            completed,
            total,
            records: outcome.record_count(),
            dropped,
            failed: outcome.is_failed(),
            elapsed,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total > 0 {
            self.completed as f64 / self.total as f64 * 100.0
        } else {
            100.0
        }
    }
}

/// Receives one call per collected batch.
pub trait ProgressSink: Send + Sync {
    fn started(&self, _total_batches: usize) {}

    fn batch_completed(&self, progress: &BatchProgress);

    fn finished(&self) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn batch_completed(&self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn batch_completed(&self, _progress: &BatchProgress) {}
}

/// Logs each collected batch through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn started(&self, total_batches: usize) {
        tracing::info!("Dispatching {} batches", total_batches);
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        tracing::info!(
            "[{:.1}%] Batch {} finished: {} records ({}/{} batches)",
            progress.percent(),
            progress.batch_id,
            progress.records,
            progress.completed,
            progress.total
        );
    }
}

/// Forwards every call to each inner sink in order.
pub struct ProgressFanout<'a>(pub Vec<&'a dyn ProgressSink>);

impl ProgressSink for ProgressFanout<'_> {
    fn started(&self, total_batches: usize) {
        for sink in &self.0 {
            sink.started(total_batches);
        }
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        for sink in &self.0 {
            sink.batch_completed(progress);
        }
    }

    fn finished(&self) {
        for sink in &self.0 {
            sink.finished();
        }
    }
}

/// Runs a [`WorkerTask`] over every batch.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    pool_size: usize,
}

impl ParallelExecutor {
    /// `pool_size == 1` processes batches sequentially in the caller's task.
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidPoolSize);
        }
        Ok(Self { pool_size })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run `task` over `batches`, returning outcomes in completion order.
    ///
    /// Batch failures are returned as [`BatchOutcome::Failed`]; only a dispatch
    /// failure of the pool itself is an error. Every worker has exited by the time
    /// this returns.
    pub async fn execute<T: WorkerTask>(
        &self,
        batches: Vec<Batch>,
        task: Arc<T>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<BatchOutcome>> {
        progress.started(batches.len());

        let outcomes = if self.pool_size == 1 {
            Self::run_sequential(batches, task.as_ref(), progress)
        } else {
            self.run_pooled(batches, task, progress).await?
        };

        progress.finished();
        Ok(outcomes)
    }

    fn run_sequential<T: WorkerTask>(
        batches: Vec<Batch>,
        task: &T,
        progress: &dyn ProgressSink,
    ) -> Vec<BatchOutcome> {
        let total = batches.len();
        let mut outcomes = Vec::with_capacity(total);

        for batch in &batches {
            let outcome = run_contained(task, batch);
            report(&outcome, outcomes.len() + 1, total, progress);
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn run_pooled<T: WorkerTask>(
        &self,
        batches: Vec<Batch>,
        task: Arc<T>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<BatchOutcome>> {
        let total = batches.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.pool_size.min(total);
        tracing::info!("Processing {} batches on {} workers", total, workers);

        // Shared work queue, filled in submission order
        let (work_tx, work_rx) = async_channel::bounded::<Batch>(total);
        for batch in batches {
            work_tx
                .send(batch)
                .await
                .map_err(|_| Error::Dispatch("work queue closed before dispatch".to_string()))?;
        }
        work_tx.close();

        let (done_tx, mut done_rx) = mpsc::channel::<BatchOutcome>(workers);
        let abort = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let task = Arc::clone(&task);
            let abort = Arc::clone(&abort);

            let handle = tokio::spawn(async move {
                while let Ok(batch) = work_rx.recv().await {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }

                    let batch_id = batch.batch_id();
                    let task = Arc::clone(&task);
                    // Encoding is CPU-bound
                    let joined =
                        tokio::task::spawn_blocking(move || run_contained(task.as_ref(), &batch))
                            .await;

                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            abort.store(true, Ordering::Relaxed);
                            return Err(Error::Dispatch(format!(
                                "worker {worker} lost batch {batch_id}: {e}"
                            )));
                        }
                    };

                    if done_tx.send(outcome).await.is_err() {
                        tracing::debug!("Collector dropped, stopping worker {}", worker);
                        break;
                    }
                }
                Ok(())
            });

            handles.push(handle);
        }

        // Collection ends once every worker has dropped its sender
        drop(done_tx);
        drop(work_rx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = done_rx.recv().await {
            report(&outcome, outcomes.len() + 1, total, progress);
            outcomes.push(outcome);
        }

        let mut failure = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(Error::Dispatch(format!("worker task failed: {e}")));
                }
            }
        }

        if let Some(e) = failure {
            tracing::error!("Worker pool shut down after dispatch failure: {}", e);
            return Err(e);
        }

        if outcomes.len() != total {
            return Err(Error::Dispatch(format!(
                "only {} of {} batches reported back",
                outcomes.len(),
                total
            )));
        }

        Ok(outcomes)
    }
}

fn report(outcome: &BatchOutcome, completed: usize, total: usize, progress: &dyn ProgressSink) {
    match outcome {
        BatchOutcome::Failed {
            batch_id,
            start_index,
            len,
            error,
        } => {
            tracing::warn!(
                "Batch {} failed, dropping structures {}..{}: {}",
                batch_id,
                start_index,
                start_index + len,
                error
            );
        }
        BatchOutcome::Completed {
            batch_id,
            records,
            elapsed,
            ..
        } => {
            tracing::debug!(
                "Batch {} encoded {} structures in {:.3}s",
                batch_id,
                records.len(),
                elapsed.as_secs_f64()
            );
        }
    }

    progress.batch_completed(&BatchProgress::from_outcome(outcome, completed, total));
}
