//! Run counters and throughput summary.

use super::executor::{BatchProgress, ProgressSink};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one extraction run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Batches that produced records
    pub batches_completed: AtomicU64,

    /// Batches whose structures were dropped
    pub batches_failed: AtomicU64,

    /// Structures with a feature vector
    pub structures_encoded: AtomicU64,

    /// Structures lost to failed batches
    pub structures_dropped: AtomicU64,

    /// Size of the written container
    pub bytes_written: AtomicU64,

    start_time: Option<Instant>,

    /// Encoder time summed across workers (microseconds)
    pub encode_us: AtomicU64,

    /// Time spent writing the container (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_batch_completed(&self, structures: u64) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.structures_encoded.fetch_add(structures, Ordering::Relaxed);
    }

    pub fn add_batch_failed(&self, structures: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.structures_dropped.fetch_add(structures, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_encode_time(&self, duration: Duration) {
        self.encode_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Encoded structures per wall-clock second.
    pub fn structures_per_second(&self) -> f64 {
        let encoded = self.structures_encoded.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            encoded as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            structures_encoded: self.structures_encoded.load(Ordering::Relaxed),
            structures_dropped: self.structures_dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            structures_per_second: self.structures_per_second(),
            encode_secs: self.encode_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }

    /// Print a final summary to stdout.
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();

        println!("\n=== Extraction Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!(
            "Batches: {} completed, {} failed",
            snapshot.batches_completed, snapshot.batches_failed
        );
        println!("Structures encoded: {}", snapshot.structures_encoded);
        if snapshot.structures_dropped > 0 {
            println!("Structures dropped: {}", snapshot.structures_dropped);
        }
        println!("Processing rate: {:.1} structures/s", snapshot.structures_per_second);
        println!(
            "Data written: {:.2} MB",
            snapshot.bytes_written as f64 / (1024.0 * 1024.0)
        );

        let total_component = snapshot.encode_secs + snapshot.write_secs;
        if total_component > 0.0 {
            println!("\n--- Component Time Breakdown ---");
            println!(
                "Encode:  {:>7.1}s ({:>5.1}%)",
                snapshot.encode_secs,
                snapshot.encode_secs / total_component * 100.0
            );
            println!(
                "Write:   {:>7.1}s ({:>5.1}%)",
                snapshot.write_secs,
                snapshot.write_secs / total_component * 100.0
            );
        }
        println!("==========================\n");
    }
}

impl ProgressSink for Metrics {
    fn batch_completed(&self, progress: &BatchProgress) {
        if progress.failed {
            self.add_batch_failed(progress.dropped as u64);
        } else {
            self.add_batch_completed(progress.records as u64);
            self.add_encode_time(progress.elapsed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub structures_encoded: u64,
    pub structures_dropped: u64,
    pub bytes_written: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub structures_per_second: f64,
    /// Encoder CPU time (seconds, summed across workers)
    pub encode_secs: f64,
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batches: {} completed, {} failed | Structures: {} encoded, {} dropped | \
             Rate: {:.1} structures/s | Written: {:.2} MB | Elapsed: {:.1}s",
            self.batches_completed,
            self.batches_failed,
            self.structures_encoded,
            self.structures_dropped,
            self.structures_per_second,
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.elapsed.as_secs_f64(),
        )
    }
}
