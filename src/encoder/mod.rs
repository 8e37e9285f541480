//! Structure encoder capability.
//!
//! An encoder turns a slice of structures into one fixed-length vector per
//! structure, in input order. Encoders are not shared between workers: every
//! batch builds its own instance through an [`EncoderFactory`].

mod radial;

pub use radial::{RadialConfig, RadialDescriptorEncoder, RadialEncoderFactory};

use crate::structure::Structure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("structure at batch offset {offset} has no atoms")]
    EmptyStructure { offset: usize },

    #[error("structure at batch offset {offset} is periodic but its cell is singular")]
    DegenerateCell { offset: usize },

    #[error("encoder returned {found} feature vectors for {expected} structures")]
    OutputCount { expected: usize, found: usize },

    #[error("encoder emitted {found} values at batch offset {offset}, declared {expected}")]
    FeatureLength { offset: usize, expected: usize, found: usize },

    #[error("failed to construct encoder: {0}")]
    Construction(String),

    #[error("{0}")]
    Other(String),
}

/// Black-box transform from structures to fixed-length real vectors.
pub trait StructureEncoder {
    /// Length of every vector this encoder emits. A vector of any other length
    /// fails its batch.
    fn feature_dim(&self) -> usize;

    fn transform(&mut self, structures: &[Structure]) -> Result<Vec<Vec<f32>>, EncodeError>;
}

/// Builds a fresh encoder for each batch.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn StructureEncoder>, EncodeError>;

    fn name(&self) -> String {
        "custom encoder".to_string()
    }
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Result<Box<dyn StructureEncoder>, EncodeError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn StructureEncoder>, EncodeError> {
        self()
    }
}
