//! Radial-distribution structure descriptor.
//!
//! Layout of each vector (`num_bins + 3` values):
//!
//! ```text
//! [ pair-distance histogram (num_bins) | mean coordination | volume/atom | distinct species ]
//! ```
//!
//! Histogram counts are per atom, over distances in `(0, cutoff]`. Periodic axes
//! use the minimum-image convention, so cutoffs longer than half a cell length
//! undercount neighbours.

use super::{EncodeError, EncoderFactory, StructureEncoder};
use crate::structure::{determinant, Structure};
use serde::{Deserialize, Serialize};

/// Descriptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialConfig {
    /// Neighbour cutoff in Angstrom
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,

    /// Number of histogram bins over `(0, cutoff]`
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
}

impl Default for RadialConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            num_bins: default_num_bins(),
        }
    }
}

impl RadialConfig {
    pub fn feature_dim(&self) -> usize {
        self.num_bins + 3
    }
}

fn default_cutoff() -> f64 {
    6.0
}

fn default_num_bins() -> usize {
    32
}

/// Built-in encoder computing [`RadialConfig`] descriptors.
#[derive(Debug, Clone)]
pub struct RadialDescriptorEncoder {
    config: RadialConfig,
}

impl RadialDescriptorEncoder {
    pub fn new(config: RadialConfig) -> Result<Self, EncodeError> {
        if !(config.cutoff > 0.0 && config.cutoff.is_finite()) {
            return Err(EncodeError::Construction(format!(
                "cutoff must be a positive finite distance, got {}",
                config.cutoff
            )));
        }
        if config.num_bins == 0 {
            return Err(EncodeError::Construction(
                "num_bins must be greater than zero".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn describe(&self, structure: &Structure, offset: usize) -> Result<Vec<f32>, EncodeError> {
        let n = structure.atom_count();
        if n == 0 {
            return Err(EncodeError::EmptyStructure { offset });
        }

        let cell = structure.cell();
        let pbc = structure.pbc();
        let inverse = if structure.is_periodic() {
            Some(invert(cell).ok_or(EncodeError::DegenerateCell { offset })?)
        } else {
            None
        };

        let bins = self.config.num_bins;
        let width = self.config.cutoff / bins as f64;
        let mut histogram = vec![0.0f64; bins];

        let positions = structure.positions();
        for i in 0..n {
            for j in (i + 1)..n {
                let delta = sub(positions[j], positions[i]);
                let delta = match &inverse {
                    Some(inv) => minimum_image(delta, cell, inv, pbc),
                    None => delta,
                };
                let distance = norm(delta);
                if distance <= 0.0 || distance > self.config.cutoff {
                    continue;
                }
                let bin = ((distance / width) as usize).min(bins - 1);
                // Each pair is a neighbour of both atoms.
                histogram[bin] += 2.0;
            }
        }

        let atoms = n as f64;
        for count in histogram.iter_mut() {
            *count /= atoms;
        }
        let coordination: f64 = histogram.iter().sum();
        let volume_per_atom = if inverse.is_some() {
            structure.volume() / atoms
        } else {
            0.0
        };
        let distinct_species = structure.species().len() as f64;

        let mut features = Vec::with_capacity(self.config.feature_dim());
        features.extend(histogram.iter().map(|&v| v as f32));
        features.push(coordination as f32);
        features.push(volume_per_atom as f32);
        features.push(distinct_species as f32);
        Ok(features)
    }
}

impl StructureEncoder for RadialDescriptorEncoder {
    fn feature_dim(&self) -> usize {
        self.config.feature_dim()
    }

    fn transform(&mut self, structures: &[Structure]) -> Result<Vec<Vec<f32>>, EncodeError> {
        structures
            .iter()
            .enumerate()
            .map(|(offset, s)| self.describe(s, offset))
            .collect()
    }
}

/// Factory handing each batch its own [`RadialDescriptorEncoder`].
#[derive(Debug, Clone, Default)]
pub struct RadialEncoderFactory {
    config: RadialConfig,
}

impl RadialEncoderFactory {
    pub fn new(config: RadialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RadialConfig {
        &self.config
    }
}

impl EncoderFactory for RadialEncoderFactory {
    fn create(&self) -> Result<Box<dyn StructureEncoder>, EncodeError> {
        Ok(Box::new(RadialDescriptorEncoder::new(self.config.clone())?))
    }

    fn name(&self) -> String {
        format!(
            "radial descriptor (cutoff {:.2} A, {} bins)",
            self.config.cutoff, self.config.num_bins
        )
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Wrap a Cartesian displacement along periodic axes. Cartesian = fractional · cell.
fn minimum_image(
    delta: [f64; 3],
    cell: &[[f64; 3]; 3],
    inverse: &[[f64; 3]; 3],
    pbc: [bool; 3],
) -> [f64; 3] {
    let mut frac = row_times(delta, inverse);
    for axis in 0..3 {
        if pbc[axis] {
            frac[axis] -= frac[axis].round();
        }
    }
    row_times(frac, cell)
}

fn row_times(v: [f64; 3], m: &[[f64; 3]; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (col, slot) in out.iter_mut().enumerate() {
        *slot = v[0] * m[0][col] + v[1] * m[1][col] + v[2] * m[2][col];
    }
    out
}

fn invert(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = determinant(m);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(symbols: &[&str], positions: Vec<[f64; 3]>, a: f64) -> Structure {
        Structure::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            positions,
            [[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]],
            [true; 3],
        )
        .unwrap()
    }

    #[test]
    fn test_feature_dim() {
        let encoder = RadialDescriptorEncoder::new(RadialConfig::default()).unwrap();
        assert_eq!(encoder.feature_dim(), 35);
    }

    #[test]
    fn test_dimer_histogram() {
        let config = RadialConfig {
            cutoff: 4.0,
            num_bins: 4,
        };
        let mut encoder = RadialDescriptorEncoder::new(config).unwrap();
        let dimer = Structure::molecule(
            vec!["O".into(), "O".into()],
            vec![[0.0, 0.0, 0.0], [1.5, 0.0, 0.0]],
        )
        .unwrap();

        let out = encoder.transform(&[dimer]).unwrap();
        assert_eq!(out.len(), 1);
        let v = &out[0];
        assert_eq!(v.len(), 7);
        // 1.5 A falls in bin 1 ([1, 2)); one neighbour per atom.
        assert_eq!(&v[..4], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v[4], 1.0);
        assert_eq!(v[5], 0.0);
        assert_eq!(v[6], 1.0);
    }

    #[test]
    fn test_minimum_image_across_boundary() {
        let config = RadialConfig {
            cutoff: 2.0,
            num_bins: 2,
        };
        let mut encoder = RadialDescriptorEncoder::new(config).unwrap();
        // 9.5 A apart in Cartesian space, 0.5 A through the boundary.
        let s = cubic(&["Na", "Cl"], vec![[0.25, 0.0, 0.0], [9.75, 0.0, 0.0]], 10.0);

        let v = &encoder.transform(&[s]).unwrap()[0];
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 0.0);
        assert!((v[3] - 500.0).abs() < 1e-3);
        assert_eq!(v[4], 2.0);
    }

    #[test]
    fn test_transform_preserves_order() {
        let mut encoder = RadialDescriptorEncoder::new(RadialConfig::default()).unwrap();
        let one = Structure::molecule(vec!["H".into()], vec![[0.0; 3]]).unwrap();
        let two = Structure::molecule(
            vec!["H".into(), "He".into()],
            vec![[0.0; 3], [1.0, 0.0, 0.0]],
        )
        .unwrap();

        let out = encoder.transform(&[two, one]).unwrap();
        assert_eq!(out[0][34], 2.0);
        assert_eq!(out[1][34], 1.0);
    }

    #[test]
    fn test_empty_structure_errors() {
        let mut encoder = RadialDescriptorEncoder::new(RadialConfig::default()).unwrap();
        let ok = Structure::molecule(vec!["H".into()], vec![[0.0; 3]]).unwrap();
        let empty = Structure::molecule(vec![], vec![]).unwrap();

        let result = encoder.transform(&[ok, empty]);
        assert!(matches!(result, Err(EncodeError::EmptyStructure { offset: 1 })));
    }

    #[test]
    fn test_singular_periodic_cell_errors() {
        let mut encoder = RadialDescriptorEncoder::new(RadialConfig::default()).unwrap();
        let flat = Structure::new(
            vec!["C".into()],
            vec![[0.0; 3]],
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]],
            [true, true, false],
        )
        .unwrap();

        assert!(matches!(
            encoder.transform(&[flat]),
            Err(EncodeError::DegenerateCell { offset: 0 })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let factory = RadialEncoderFactory::new(RadialConfig {
            cutoff: -1.0,
            num_bins: 8,
        });
        assert!(matches!(factory.create(), Err(EncodeError::Construction(_))));

        let factory = RadialEncoderFactory::new(RadialConfig {
            cutoff: 5.0,
            num_bins: 0,
        });
        assert!(factory.create().is_err());
    }

    #[test]
    fn test_invert_roundtrip() {
        let m = [[2.0, 0.0, 0.0], [1.0, 3.0, 0.0], [0.5, 0.25, 4.0]];
        let inv = invert(&m).unwrap();
        let v = [0.3, -1.2, 2.5];
        let back = row_times(row_times(v, &m), &inv);
        for k in 0..3 {
            assert!((back[k] - v[k]).abs() < 1e-12);
        }
    }
}
