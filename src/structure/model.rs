//! Immutable atomic-structure value type.

use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// A single atomic structure (one trajectory frame).
///
/// Cell rows are the lattice vectors `a`, `b`, `c` in Cartesian coordinates.
/// A non-periodic structure read without a lattice carries a zero cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    symbols: Vec<String>,
    positions: Vec<[f64; 3]>,
    cell: [[f64; 3]; 3],
    pbc: [bool; 3],
}

impl Structure {
    /// Create a structure, checking that every atom has both a symbol and a position.
    pub fn new(
        symbols: Vec<String>,
        positions: Vec<[f64; 3]>,
        cell: [[f64; 3]; 3],
        pbc: [bool; 3],
    ) -> Result<Self> {
        if symbols.len() != positions.len() {
            return Err(Error::InvalidStructure(format!(
                "{} symbols but {} positions",
                symbols.len(),
                positions.len()
            )));
        }
        Ok(Self {
            symbols,
            positions,
            cell,
            pbc,
        })
    }

    /// Create a non-periodic structure with a zero cell.
    pub fn molecule(symbols: Vec<String>, positions: Vec<[f64; 3]>) -> Result<Self> {
        Self::new(symbols, positions, [[0.0; 3]; 3], [false; 3])
    }

    pub fn atom_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    /// Distinct chemical species, sorted.
    pub fn species(&self) -> BTreeSet<&str> {
        self.symbols.iter().map(String::as_str).collect()
    }

    pub fn cell(&self) -> &[[f64; 3]; 3] {
        &self.cell
    }

    pub fn pbc(&self) -> [bool; 3] {
        self.pbc
    }

    /// True if any axis is periodic.
    pub fn is_periodic(&self) -> bool {
        self.pbc.iter().any(|&p| p)
    }

    /// Cell volume |a · (b × c)|.
    pub fn volume(&self) -> f64 {
        determinant(&self.cell).abs()
    }
}

pub(crate) fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
