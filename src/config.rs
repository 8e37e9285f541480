//! Configuration for a feature-extraction run.

use crate::encoder::RadialConfig;
use crate::io::DEFAULT_COMPRESSION_LEVEL;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Descriptor settings for the built-in encoder
    #[serde(default)]
    pub encoder: RadialConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Extended XYZ file holding every structure to encode
    #[serde(default)]
    pub path: PathBuf,
}

/// Output container configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination Parquet file
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Free-text description stored in the container metadata
    #[serde(default = "default_description")]
    pub description: String,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            description: default_description(),
            compression_level: default_compression_level(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Structures per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of concurrent batch workers (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Collect and print run metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            worker_threads: None,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Build a configuration for one input file with every other setting at its default.
    pub fn for_input(path: impl Into<PathBuf>) -> Self {
        Self {
            input: InputConfig { path: path.into() },
            ..Default::default()
        }
    }

    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match ext {
            "json" => Self::from_json(&contents)?,
            // YAML is a superset of JSON
            _ => Self::from_yaml(&contents)?,
        };
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.path.as_os_str().is_empty() {
            anyhow::bail!("Input path must be set (input.path or --input)");
        }
        if self.output.path.as_os_str().is_empty() {
            anyhow::bail!("Output path must not be empty");
        }
        if self.output.path.is_dir() {
            anyhow::bail!("Output path {} is a directory", self.output.path.display());
        }
        if !(1..=22).contains(&self.output.compression_level) {
            anyhow::bail!("Compression level must be 1-22 for zstd");
        }
        if self.processing.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.processing.workers == 0 {
            anyhow::bail!("Workers must be > 0");
        }
        if self.processing.worker_threads == Some(0) {
            anyhow::bail!("Worker threads must be > 0 when set");
        }
        if !(self.encoder.cutoff > 0.0 && self.encoder.cutoff.is_finite()) {
            anyhow::bail!("Encoder cutoff must be a positive distance");
        }
        if self.encoder.num_bins == 0 {
            anyhow::bail!("Encoder num_bins must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_output_path() -> PathBuf { PathBuf::from("features.parquet") }
fn default_description() -> String { "Radial structure features from extended XYZ file".to_string() }
fn default_compression_level() -> i32 { DEFAULT_COMPRESSION_LEVEL }
fn default_batch_size() -> usize { 32 }
fn default_workers() -> usize { 4 }
fn default_true() -> bool { true }
