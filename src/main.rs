//! Structure Features CLI
//!
//! Encode every structure of an extended XYZ file into a Parquet feature table.

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use structure_features::{
    build_runtime, inspect_input, run_pipeline, BatchProgress, Config, NoProgress, ProgressSink,
};

#[derive(Parser)]
#[command(name = "structure-features")]
#[command(about = "Extract fixed-length features from atomic structures", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extended XYZ input file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output Parquet file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Structures per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of parallel workers (1 = sequential)
    #[arg(long)]
    workers: Option<usize>,

    /// Load and validate the input, print a summary and exit
    #[arg(long)]
    validate_only: bool,

    /// Save run metrics as JSON
    #[arg(long)]
    metrics_output: Option<String>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

/// Progress bar advanced once per collected batch.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} batches [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn started(&self, total_batches: usize) {
        self.bar.set_length(total_batches as u64);
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        self.bar.inc(1);
        if progress.failed {
            self.bar.set_message(format!("batch {} failed", progress.batch_id));
        }
    }

    fn finished(&self) {
        self.bar.finish_and_clear();
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        return generate_config_command(output);
    }

    let config = load_config(&cli)?;

    if cli.validate_only {
        return validate_command(&config);
    }

    run_command(config, cli.quiet)
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(input) = &cli.input {
        config.input.path = input.clone();
    }
    if let Some(output) = &cli.output {
        config.output.path = output.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        config.processing.batch_size = batch_size;
    }
    if let Some(workers) = cli.workers {
        config.processing.workers = workers;
    }
    if let Some(path) = &cli.metrics_output {
        config.processing.metrics_output_path = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run_command(config: Config, quiet: bool) -> Result<()> {
    let runtime = build_runtime(config.processing.worker_threads)?;

    let stats = if quiet {
        runtime.block_on(run_pipeline(config, &NoProgress))?
    } else {
        let bar = BarProgress::new();
        runtime.block_on(run_pipeline(config, &bar))?
    };

    println!(
        "Wrote {} feature vectors ({} dropped) to {}",
        stats.records_written,
        stats.structures_dropped,
        stats.output.display()
    );

    Ok(())
}

fn validate_command(config: &Config) -> Result<()> {
    let summary = inspect_input(config)?;
    println!("{}", summary);
    println!("Input is valid");
    Ok(())
}

fn generate_config_command(output: &Path) -> Result<()> {
    let yaml = r#"# Structure Features Configuration

# === INPUT ===
input:
  # Extended XYZ file with every structure to encode
  path: "structures.xyz"

# === OUTPUT ===
output:
  # Parquet feature table (parent directories are created)
  path: "features.parquet"

  # Stored in the table metadata
  description: "Radial structure features from extended XYZ file"

  # Zstd compression level (1-22, higher = smaller but slower)
  compression_level: 22

# === PROCESSING ===
processing:
  # Structures per batch; a failed batch drops all of its structures
  batch_size: 32

  # Parallel batch workers (1 = sequential)
  workers: 4

  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8

  # Print a metrics summary at the end of the run
  enable_metrics: true

  # Save metrics as JSON
  # metrics_output_path: "metrics.json"

# === ENCODER: radial descriptor ===
encoder:
  # Neighbour cutoff in Angstrom
  cutoff: 6.0

  # Histogram bins over (0, cutoff]; vectors have num_bins + 3 values
  num_bins: 32
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
