//! Structure Features
//!
//! Batch feature extraction for collections of atomic structures. Every structure
//! of an extended XYZ file is encoded into a fixed-length vector and the results
//! are stored as one Parquet table keyed by input position.
//!
//! # Architecture
//!
//! ```text
//! StructureSet ─▶ partition ─▶ ParallelExecutor(EncodeTask) ─▶ reassemble ─▶ FeatureStore
//! ```
//!
//! - **Structure**: immutable structure values and the extended XYZ reader
//! - **Encoder**: the encoder capability and the built-in radial descriptor
//! - **Pipeline**: batching, worker pool, progress reporting, reassembly and metrics
//! - **I/O**: the Parquet feature container
//!
//! Batches fail independently: a failed batch drops its structures and the run
//! continues. The run fails only when nothing can be extracted or written.
//!
//! # Usage
//!
//! ```no_run
//! use structure_features::{run_pipeline, Config, LogProgress};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml".as_ref())?;
//!     run_pipeline(config, &LogProgress).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod structure;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use encoder::{EncodeError, EncoderFactory, RadialConfig, RadialEncoderFactory, StructureEncoder};
pub use error::{Error, Result};
pub use io::{FeatureStore, FeatureTable};
pub use pipeline::{
    BatchProgress, Extraction, FeatureRecord, LogProgress, Metrics, NoProgress, ParallelExecutor,
    ProgressFanout, ProgressSink,
};
pub use structure::{SourceSummary, Structure, StructureSet};

use anyhow::Context;
use pipeline::EncodeTask;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Encode every structure in `structures`, batch by batch.
///
/// Returns records in input order together with the batches that failed. An
/// empty collection is an error; failed batches are not.
pub async fn extract_features(
    structures: &StructureSet,
    factory: Arc<dyn EncoderFactory>,
    batch_size: usize,
    pool_size: usize,
    progress: &dyn ProgressSink,
) -> Result<Extraction> {
    if structures.is_empty() {
        return Err(Error::EmptyCollection(structures.origin().to_path_buf()));
    }

    let executor = ParallelExecutor::new(pool_size)?;
    let batches = pipeline::partition(structures.shared(), batch_size)?;
    let task = Arc::new(EncodeTask::new(factory));

    let outcomes = executor.execute(batches, task, progress).await?;
    pipeline::reassemble(outcomes)
}

/// Load and validate the input named by `config` without encoding anything.
pub fn inspect_input(config: &Config) -> anyhow::Result<SourceSummary> {
    let structures = StructureSet::load(&config.input.path)
        .with_context(|| format!("Failed to load structures from {}", config.input.path.display()))?;
    Ok(structures.validate()?)
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub num_structures: usize,
    pub total_batches: usize,
    pub failed_batches: usize,
    pub records_written: usize,
    pub structures_dropped: usize,
    pub feature_dim: usize,
    pub output: PathBuf,
    pub elapsed: Duration,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} structures written to {} (dim {}) | {} of {} batches failed | {:.1}s",
            self.records_written,
            self.num_structures,
            self.output.display(),
            self.feature_dim,
            self.failed_batches,
            self.total_batches,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Run the full extraction pipeline with the given configuration.
///
/// `progress` is called once per collected batch, in addition to the run metrics.
pub async fn run_pipeline(config: Config, progress: &dyn ProgressSink) -> anyhow::Result<PipelineStats> {
    config.validate()?;
    let start = Instant::now();

    tracing::info!("Starting structure feature extraction");

    let structures = StructureSet::load(&config.input.path)
        .with_context(|| format!("Failed to load structures from {}", config.input.path.display()))?;
    let summary = structures.validate()?;
    tracing::info!(
        "{} structures, {}-{} atoms, species: {}",
        summary.num_structures,
        summary.min_atoms,
        summary.max_atoms,
        summary.species.iter().cloned().collect::<Vec<_>>().join(" ")
    );

    let factory = RadialEncoderFactory::new(config.encoder.clone());
    tracing::info!(
        "Encoder: {} | batch size {} | {} workers",
        factory.name(),
        config.processing.batch_size,
        config.processing.workers
    );

    let metrics = Metrics::new();
    let mut sinks: Vec<&dyn ProgressSink> = vec![progress];
    if config.processing.enable_metrics {
        sinks.push(&*metrics);
    }
    let fanout = ProgressFanout(sinks);

    let extraction = extract_features(
        &structures,
        Arc::new(factory),
        config.processing.batch_size,
        config.processing.workers,
        &fanout,
    )
    .await?;

    // Each failed batch was already logged as it was collected
    if !extraction.is_complete() {
        tracing::warn!(
            "{} of {} batches failed; {} structures have no features",
            extraction.failed.len(),
            extraction.total_batches,
            extraction.structures_dropped()
        );
    }

    let structures_dropped = extraction.structures_dropped();
    let failed_batches = extraction.failed.len();
    let total_batches = extraction.total_batches;

    // Parquet encoding is CPU-bound
    let store = FeatureStore::new(config.output.compression_level, config.output.description.clone());
    let output = config.output.path.clone();
    let write_start = Instant::now();
    let table = tokio::task::spawn_blocking({
        let output = output.clone();
        move || store.write(&extraction.records, &output)
    })
    .await
    .context("Container writer task failed")?
    .with_context(|| format!("Failed to write features to {}", output.display()))?;

    metrics.add_write_time(write_start.elapsed());
    if let Ok(meta) = std::fs::metadata(&output) {
        metrics.add_bytes_written(meta.len());
    }

    let stats = PipelineStats {
        num_structures: structures.len(),
        total_batches,
        failed_batches,
        records_written: table.num_structures,
        structures_dropped,
        feature_dim: table.feature_dim,
        output,
        elapsed: start.elapsed(),
    };

    if config.processing.enable_metrics {
        let snapshot = metrics.snapshot();
        tracing::info!("Final: {}", snapshot);
        metrics.print_summary();
        if let Some(path) = &config.processing.metrics_output_path {
            snapshot.save_to_file(path)?;
        }
    }

    tracing::info!("Pipeline complete: {}", stats);

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failing_factory, index_factory, indexed_structures};
    use tempfile::TempDir;

    const FRAMES: &str = "\
2
Lattice=\"5.0 0.0 0.0 0.0 5.0 0.0 0.0 0.0 5.0\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"
Na 0.0 0.0 0.0
Cl 2.5 0.0 0.0
3
Lattice=\"6.0 0.0 0.0 0.0 6.0 0.0 0.0 0.0 6.0\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"
O 0.0 0.0 0.0
H 0.96 0.0 0.0
H -0.24 0.93 0.0
1
Lattice=\"4.0 0.0 0.0 0.0 4.0 0.0 0.0 0.0 4.0\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"
Cu 0.0 0.0 0.0
";

    fn set(n: usize) -> StructureSet {
        StructureSet::from_structures(indexed_structures(n).to_vec())
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn config_for(dir: &TempDir, workers: usize) -> Config {
        let input = dir.path().join("structures.xyz");
        std::fs::write(&input, FRAMES).unwrap();

        let mut config = Config::for_input(input);
        config.output.path = dir.path().join(format!("features-{workers}.parquet"));
        config.processing.batch_size = 2;
        config.processing.workers = workers;
        config.processing.enable_metrics = false;
        config
    }

    #[tokio::test]
    async fn test_ten_structures_batch_four() {
        let extraction = extract_features(&set(10), index_factory(2), 4, 2, &NoProgress)
            .await
            .unwrap();

        assert_eq!(extraction.total_batches, 3);
        assert!(extraction.is_complete());

        let table = FeatureTable::from_records(&extraction.records, "").unwrap();
        assert_eq!(table.structure_indices, (0..10).collect::<Vec<_>>());
        assert_eq!(table.row_for_structure(7).unwrap().to_vec(), vec![7.0, 7.0]);
    }

    #[tokio::test]
    async fn test_failed_batch_range_is_skipped() {
        let extraction = extract_features(&set(10), failing_factory(2, 5..6), 4, 3, &NoProgress)
            .await
            .unwrap();

        let indices: Vec<_> = extraction.records.iter().map(|r| r.structure_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 8, 9]);
        assert_eq!(extraction.failed.len(), 1);
        assert_eq!(extraction.failed[0].batch_id, 2);
        assert_eq!(extraction.structures_dropped(), 4);
    }

    #[tokio::test]
    async fn test_empty_collection_is_fatal() {
        let result = extract_features(&set(0), index_factory(2), 4, 2, &NoProgress).await;
        assert!(matches!(result, Err(Error::EmptyCollection(_))));
    }

    #[tokio::test]
    async fn test_pool_sizes_write_identical_files() {
        let dir = TempDir::new().unwrap();
        let structures = set(37);
        let store = FeatureStore::new(22, "stub");

        let mut files = Vec::new();
        for pool in [1, 4] {
            let extraction = extract_features(&structures, index_factory(3), 5, pool, &NoProgress)
                .await
                .unwrap();
            let path = dir.path().join(format!("pool-{pool}.parquet"));
            store.write(&extraction.records, &path).unwrap();
            files.push(std::fs::read(&path).unwrap());
        }

        assert_eq!(files[0], files[1]);
    }

    #[test]
    fn test_ragged_vectors_write_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.parquet");
        let records: Vec<FeatureRecord> = (0..10)
            .map(|index| FeatureRecord {
                structure_index: index,
                features: vec![index as f32; if index == 6 { 8 } else { 16 }],
                num_atoms: 1,
            })
            .collect();

        let result = FeatureStore::default().write(&records, &path);

        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                structure_index: 6,
                expected: 16,
                found: 8
            })
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_pipeline_end_to_end() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, 2);
        let output = config.output.path.clone();

        let stats = run_pipeline(config, &NoProgress).await.unwrap();

        assert_eq!(stats.num_structures, 3);
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.records_written, 3);
        assert_eq!(stats.feature_dim, 35);

        let table = FeatureStore::read(&output).unwrap();
        assert_eq!(table.structure_indices, vec![0, 1, 2]);
        assert_eq!(table.num_atoms, vec![2, 3, 1]);
        // Distinct species is the last feature
        assert_eq!(table.row(1).unwrap()[34], 2.0);
    }

    #[tokio::test]
    async fn test_run_pipeline_sequential_matches_pooled() {
        let dir = TempDir::new().unwrap();

        let sequential = run_pipeline(config_for(&dir, 1), &NoProgress).await.unwrap();
        let pooled = run_pipeline(config_for(&dir, 3), &NoProgress).await.unwrap();

        assert_eq!(
            std::fs::read(&sequential.output).unwrap(),
            std::fs::read(&pooled.output).unwrap()
        );
    }

    #[tokio::test]
    async fn test_run_pipeline_reports_progress_and_metrics() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir, 2);
        config.processing.enable_metrics = true;
        let metrics_path = dir.path().join("metrics.json");
        config.processing.metrics_output_path = Some(metrics_path.to_string_lossy().into_owned());

        let calls = std::sync::Mutex::new(0usize);
        let sink = |_: &BatchProgress| *calls.lock().unwrap() += 1;

        run_pipeline(config, &sink).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), 2);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
        assert_eq!(json["structures_encoded"], 3);
        assert_eq!(json["batches_failed"], 0);
    }

    #[tokio::test]
    async fn test_run_pipeline_missing_input() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::for_input(dir.path().join("absent.xyz"));
        config.output.path = dir.path().join("features.parquet");

        let err = run_pipeline(config, &NoProgress).await.unwrap_err();

        assert!(matches!(
            err.root_cause().downcast_ref::<Error>(),
            Some(Error::MissingInput(_))
        ));
        assert!(!dir.path().join("features.parquet").exists());
    }

    #[tokio::test]
    async fn test_run_pipeline_all_batches_failed() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir, 2);
        // Atom-less frames parse but cannot be encoded
        std::fs::write(&config.input.path, "0\n\n0\n\n").unwrap();
        config.processing.batch_size = 1;

        let err = run_pipeline(config.clone(), &NoProgress).await.unwrap_err();

        assert!(matches!(
            err.root_cause().downcast_ref::<Error>(),
            Some(Error::EmptyResult)
        ));
        assert!(!config.output.path.exists());
    }

    #[tokio::test]
    async fn test_run_pipeline_warns_once_per_failed_batch() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir, 1);
        // Second frame has no atoms and fails its batch
        std::fs::write(
            &config.input.path,
            "1\nLattice=\"4.0 0 0 0 4.0 0 0 0 4.0\" pbc=\"T T T\"\nCu 0 0 0\n0\n\n",
        )
        .unwrap();
        config.processing.batch_size = 1;

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();
        let stats = {
            let _guard = tracing::subscriber::set_default(subscriber);
            run_pipeline(config, &NoProgress).await.unwrap()
        };

        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.records_written, 1);

        let output = logs.contents();
        let per_batch: Vec<&str> = output.lines().filter(|l| l.contains("Batch 2 failed")).collect();
        assert_eq!(per_batch.len(), 1, "{output}");
        assert!(per_batch[0].contains("dropping structures 1..2"));
        assert_eq!(output.matches("1 of 2 batches failed").count(), 1, "{output}");
    }

    #[tokio::test]
    async fn test_run_pipeline_empty_input() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, 2);
        std::fs::write(&config.input.path, "").unwrap();

        let err = run_pipeline(config, &NoProgress).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyCollection(_))));
    }

    #[test]
    fn test_inspect_input() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, 1);

        let summary = inspect_input(&config).unwrap();
        assert_eq!(summary.num_structures, 3);
        assert_eq!(summary.first_atom_count, 2);
        assert_eq!(summary.max_atoms, 3);
        assert_eq!(summary.min_atoms, 1);
    }

    #[test]
    fn test_build_runtime() {
        let runtime = build_runtime(Some(2)).unwrap();
        assert_eq!(runtime.block_on(async { 1 + 1 }), 2);
    }
}
