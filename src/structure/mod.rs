//! Atomic structures and the extended XYZ source they are loaded from.

pub mod extxyz;
mod model;
mod source;

pub use model::Structure;
pub use source::{SourceSummary, StructureSet};

pub(crate) use model::determinant;
