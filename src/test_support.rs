//! Fixtures shared by unit tests across modules.

use crate::encoder::{EncodeError, EncoderFactory, StructureEncoder};
use crate::structure::Structure;
use std::ops::Range;
use std::sync::Arc;

/// `n` hydrogen chains; structure `i` has `i % 5 + 1` atoms and its first atom at `x = i`.
pub fn indexed_structures(n: usize) -> Arc<[Structure]> {
    (0..n)
        .map(|i| {
            let atoms = i % 5 + 1;
            Structure::molecule(
                vec!["H".to_string(); atoms],
                (0..atoms).map(|k| [i as f64, k as f64 * 0.74, 0.0]).collect(),
            )
            .unwrap()
        })
        .collect::<Vec<_>>()
        .into()
}

/// Emits `[x; dim]` where `x` is the first coordinate of the first atom, so the
/// vector of an [`indexed_structures`] entry equals its index.
pub struct IndexEncoder {
    pub dim: usize,
    /// Structures whose index falls in this range make the whole call fail
    pub fail_on: Option<Range<usize>>,
}

impl StructureEncoder for IndexEncoder {
    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn transform(&mut self, structures: &[Structure]) -> Result<Vec<Vec<f32>>, EncodeError> {
        structures
            .iter()
            .map(|s| {
                let index = s.positions()[0][0] as usize;
                if self.fail_on.as_ref().is_some_and(|r| r.contains(&index)) {
                    return Err(EncodeError::Other(format!("cannot encode structure {index}")));
                }
                Ok(vec![index as f32; self.dim])
            })
            .collect()
    }
}

pub fn index_factory(dim: usize) -> Arc<dyn EncoderFactory> {
    Arc::new(move || -> Result<Box<dyn StructureEncoder>, EncodeError> {
        Ok(Box::new(IndexEncoder { dim, fail_on: None }))
    })
}

pub fn failing_factory(dim: usize, fail_on: Range<usize>) -> Arc<dyn EncoderFactory> {
    Arc::new(move || -> Result<Box<dyn StructureEncoder>, EncodeError> {
        Ok(Box::new(IndexEncoder {
            dim,
            fail_on: Some(fail_on.clone()),
        }))
    })
}
