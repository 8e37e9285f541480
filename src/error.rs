//! Error taxonomy for the extraction core.
//!
//! Load and validation errors abort before any batch is dispatched. Batch encode
//! failures never surface here: they are contained in
//! [`BatchOutcome::Failed`](crate::pipeline::BatchOutcome). Invariant violations
//! found after extraction (duplicate indices, inconsistent dimensionality, empty
//! output) abort the run before anything is persisted.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("failed to parse extended XYZ data: {details} (at line ~{line})")]
    Parse { line: usize, details: String },

    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    #[error("input file {} does not exist", .0.display())]
    MissingInput(PathBuf),

    #[error("no structures were loaded from {}; nothing to extract", .0.display())]
    EmptyCollection(PathBuf),

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("worker pool size must be at least one")]
    InvalidPoolSize,

    #[error("worker pool dispatch failed: {0}")]
    Dispatch(String),

    #[error("structure index {0} was produced by more than one batch")]
    DuplicateIndex(usize),

    #[error(
        "feature dimensionality mismatch for structure {structure_index}: expected {expected}, found {found}"
    )]
    DimensionMismatch {
        structure_index: usize,
        expected: usize,
        found: usize,
    },

    #[error("no feature records survived extraction; nothing to write")]
    EmptyResult,

    #[error("feature container error: {0}")]
    Container(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(line: usize, details: impl Into<String>) -> Self {
        Self::Parse {
            line,
            details: details.into(),
        }
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Container(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Container(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Error::parse(12, "invalid atom count");
        let display = err.to_string();
        assert!(display.contains("invalid atom count"));
        assert!(display.contains("12"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = Error::DimensionMismatch {
            structure_index: 3,
            expected: 16,
            found: 8,
        };
        let display = err.to_string();
        assert!(display.contains("structure 3"));
        assert!(display.contains("expected 16"));
        assert!(display.contains("found 8"));
    }

    #[test]
    fn test_missing_input_display() {
        let err = Error::MissingInput(PathBuf::from("/tmp/nope.xyz"));
        assert!(err.to_string().contains("/tmp/nope.xyz"));
    }
}
