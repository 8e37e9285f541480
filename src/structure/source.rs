//! Load and validate the ordered structure collection.

use super::extxyz;
use super::model::Structure;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered, read-only collection of structures loaded from one file.
///
/// Indices into the set are the authoritative structure identities used by every
/// later stage of the pipeline.
#[derive(Debug, Clone)]
pub struct StructureSet {
    origin: PathBuf,
    structures: Arc<[Structure]>,
}

impl StructureSet {
    /// Load all frames from an extended XYZ file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }

        let structures = extxyz::read_file(path)?;
        tracing::info!("Loaded {} structures from {}", structures.len(), path.display());

        Ok(Self {
            origin: path.to_path_buf(),
            structures: structures.into(),
        })
    }

    /// Wrap structures that were built in memory.
    pub fn from_structures(structures: Vec<Structure>) -> Self {
        Self {
            origin: PathBuf::from("<memory>"),
            structures: structures.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Structure> {
        self.structures.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Structure> {
        self.structures.iter()
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Shared handle to the underlying structures, used to build batches.
    pub fn shared(&self) -> Arc<[Structure]> {
        Arc::clone(&self.structures)
    }

    /// Check that there is something to extract and summarize the collection.
    pub fn validate(&self) -> Result<SourceSummary> {
        let first = self
            .structures
            .first()
            .ok_or_else(|| Error::EmptyCollection(self.origin.clone()))?;

        let (min_atoms, max_atoms) = self
            .structures
            .iter()
            .map(Structure::atom_count)
            .fold((usize::MAX, 0), |(lo, hi), n| (lo.min(n), hi.max(n)));

        let species = self
            .structures
            .iter()
            .flat_map(|s| s.symbols().iter().cloned())
            .collect();

        Ok(SourceSummary {
            num_structures: self.structures.len(),
            first_atom_count: first.atom_count(),
            first_species: first.species().into_iter().map(str::to_string).collect(),
            first_cell: *first.cell(),
            first_pbc: first.pbc(),
            min_atoms,
            max_atoms,
            species,
        })
    }
}

/// Summary reported by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub num_structures: usize,
    pub first_atom_count: usize,
    pub first_species: BTreeSet<String>,
    pub first_cell: [[f64; 3]; 3],
    pub first_pbc: [bool; 3],
    pub min_atoms: usize,
    pub max_atoms: usize,
    /// Union of species over every structure
    pub species: BTreeSet<String>,
}

impl fmt::Display for SourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(" ");
        writeln!(f, "Structures: {}", self.num_structures)?;
        writeln!(f, "First structure atoms: {}", self.first_atom_count)?;
        writeln!(f, "First structure species: {}", join(&self.first_species))?;
        writeln!(f, "First structure cell:")?;
        for row in &self.first_cell {
            writeln!(f, "  [{:>10.4} {:>10.4} {:>10.4}]", row[0], row[1], row[2])?;
        }
        writeln!(
            f,
            "First structure pbc: [{} {} {}]",
            self.first_pbc[0], self.first_pbc[1], self.first_pbc[2]
        )?;
        writeln!(f, "Atom count range: {} - {}", self.min_atoms, self.max_atoms)?;
        write!(f, "Species (all structures): {}", join(&self.species))
    }
}
