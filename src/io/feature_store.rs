//! Parquet feature container.
//!
//! One file per run, one row per structure:
//!
//! | column            | type                                   |
//! |-------------------|----------------------------------------|
//! | `structure_index` | `Int64`                                |
//! | `num_atoms`       | `Int64`                                |
//! | `features`        | `FixedSizeList<Float32, feature_dim>`  |
//!
//! The file's key/value metadata carries `num_structures`, `feature_dim` and
//! `description`, always in that order. No Arrow schema is embedded, so equal
//! tables always produce equal bytes. A reader sees `features` as a plain list.

use crate::error::{Error, Result};
use crate::pipeline::FeatureRecord;
use arrow::array::{Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, ListArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::{Array2, ArrayView1};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriterOptions;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

const META_NUM_STRUCTURES: &str = "num_structures";
const META_FEATURE_DIM: &str = "feature_dim";
const META_DESCRIPTION: &str = "description";

/// Default ZSTD level: maximum compression.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 22;

/// Dense feature matrix with per-row structure identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub num_structures: usize,
    pub feature_dim: usize,
    pub description: String,
    /// Ascending; row `i` belongs to `structure_indices[i]`
    pub structure_indices: Vec<usize>,
    pub num_atoms: Vec<usize>,
    /// Shape `(num_structures, feature_dim)`
    pub features: Array2<f32>,
}

impl FeatureTable {
    /// Build a table from reassembled records.
    ///
    /// Every vector must have the length of the first one.
    pub fn from_records(records: &[FeatureRecord], description: impl Into<String>) -> Result<Self> {
        let first = records.first().ok_or(Error::EmptyResult)?;
        let feature_dim = first.features.len();

        let mut flat = Vec::with_capacity(records.len() * feature_dim);
        for record in records {
            if record.features.len() != feature_dim {
                return Err(Error::DimensionMismatch {
                    structure_index: record.structure_index,
                    expected: feature_dim,
                    found: record.features.len(),
                });
            }
            flat.extend_from_slice(&record.features);
        }

        let features = Array2::from_shape_vec((records.len(), feature_dim), flat)
            .map_err(|e| Error::Container(format!("failed to shape feature matrix: {e}")))?;

        Ok(Self {
            num_structures: records.len(),
            feature_dim,
            description: description.into(),
            structure_indices: records.iter().map(|r| r.structure_index).collect(),
            num_atoms: records.iter().map(|r| r.num_atoms).collect(),
            features,
        })
    }

    pub fn row(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.num_structures).then(|| self.features.row(row))
    }

    /// Feature vector of the structure at input position `structure_index`.
    pub fn row_for_structure(&self, structure_index: usize) -> Option<ArrayView1<'_, f32>> {
        self.structure_indices
            .binary_search(&structure_index)
            .ok()
            .map(|row| self.features.row(row))
    }

    pub fn records(&self) -> Vec<FeatureRecord> {
        self.features
            .rows()
            .into_iter()
            .zip(&self.structure_indices)
            .zip(&self.num_atoms)
            .map(|((row, &structure_index), &num_atoms)| FeatureRecord {
                structure_index,
                features: row.to_vec(),
                num_atoms,
            })
            .collect()
    }

    /// Container metadata in its fixed on-disk order.
    fn key_value_metadata(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(META_NUM_STRUCTURES.to_string(), self.num_structures.to_string()),
            KeyValue::new(META_FEATURE_DIM.to_string(), self.feature_dim.to_string()),
            KeyValue::new(META_DESCRIPTION.to_string(), self.description.clone()),
        ]
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("structure_index", DataType::Int64, false),
            Field::new("num_atoms", DataType::Int64, false),
            Field::new(
                "features",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.feature_dim as i32,
                ),
                false,
            ),
        ])
    }

    fn to_record_batch(&self) -> Result<RecordBatch> {
        let indices: ArrayRef = Arc::new(Int64Array::from_iter_values(
            self.structure_indices.iter().map(|&i| i as i64),
        ));
        let atoms: ArrayRef = Arc::new(Int64Array::from_iter_values(
            self.num_atoms.iter().map(|&n| n as i64),
        ));

        let values = Float32Array::from_iter_values(self.features.iter().copied());
        let features: ArrayRef = Arc::new(FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, false)),
            self.feature_dim as i32,
            Arc::new(values),
            None,
        )?);

        Ok(RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![indices, atoms, features],
        )?)
    }
}

/// Writes and reads feature containers.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    compression_level: i32,
    description: String,
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            description: String::new(),
        }
    }
}

impl FeatureStore {
    pub fn new(compression_level: i32, description: impl Into<String>) -> Self {
        Self {
            compression_level,
            description: description.into(),
        }
    }

    /// Validate `records` and persist them to `path`.
    ///
    /// Nothing is created on disk if validation fails. The file is written next to
    /// its destination and renamed into place, so an interrupted write never leaves
    /// a partial container behind.
    pub fn write(&self, records: &[FeatureRecord], path: &Path) -> Result<FeatureTable> {
        let table = FeatureTable::from_records(records, self.description.clone())?;
        let batch = table.to_record_batch()?;

        let level = ZstdLevel::try_new(self.compression_level)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_key_value_metadata(Some(table.key_value_metadata()))
            .build();
        let options = ArrowWriterOptions::new()
            .with_properties(props)
            .with_skip_arrow_metadata(true);

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = ArrowWriter::try_new_with_options(tmp.as_file_mut(), batch.schema(), options)?;
            writer.write(&batch)?;
            writer.close()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::from(e.error))?;

        tracing::info!(
            "Wrote {} feature vectors (dim {}) to {}",
            table.num_structures,
            table.feature_dim,
            path.display()
        );

        Ok(table)
    }

    /// Load a container written by [`FeatureStore::write`].
    pub fn read(path: &Path) -> Result<FeatureTable> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let metadata: HashMap<String, String> = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .map(|entries| {
                entries
                    .iter()
                    .map(|kv| (kv.key.clone(), kv.value.clone().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        let reader = builder.build()?;

        let feature_dim: usize = parse_meta(&metadata, META_FEATURE_DIM)?;
        let expected_rows: usize = parse_meta(&metadata, META_NUM_STRUCTURES)?;
        let description = metadata.get(META_DESCRIPTION).cloned().unwrap_or_default();

        let mut structure_indices = Vec::with_capacity(expected_rows);
        let mut num_atoms = Vec::with_capacity(expected_rows);
        let mut flat = Vec::with_capacity(expected_rows * feature_dim);

        for batch in reader {
            let batch = batch?;

            let indices = int64_column(&batch, "structure_index")?;
            let atoms = int64_column(&batch, "num_atoms")?;
            let list = FeatureColumn::from_batch(&batch)?;

            for i in 0..batch.num_rows() {
                structure_indices.push(to_usize(indices.value(i), "structure_index")?);
                num_atoms.push(to_usize(atoms.value(i), "num_atoms")?);

                let row = list.row(i);
                if row.len() != feature_dim {
                    return Err(Error::Container(format!(
                        "row {} has {} feature values, metadata says {}",
                        i,
                        row.len(),
                        feature_dim
                    )));
                }
                let row = row
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| Error::Container("features must be Float32".into()))?;
                flat.extend(row.values().iter().copied());
            }
        }

        if structure_indices.len() != expected_rows {
            return Err(Error::Container(format!(
                "container holds {} rows, metadata says {}",
                structure_indices.len(),
                expected_rows
            )));
        }

        let features = Array2::from_shape_vec((expected_rows, feature_dim), flat)
            .map_err(|e| Error::Container(format!("failed to shape feature matrix: {e}")))?;

        tracing::debug!("Read {} feature vectors from {}", expected_rows, path.display());

        Ok(FeatureTable {
            num_structures: expected_rows,
            feature_dim,
            description,
            structure_indices,
            num_atoms,
            features,
        })
    }
}

/// The `features` column as read back: a plain list unless an Arrow schema was embedded.
enum FeatureColumn<'a> {
    Fixed(&'a FixedSizeListArray),
    Variable(&'a ListArray),
}

impl<'a> FeatureColumn<'a> {
    fn from_batch(batch: &'a RecordBatch) -> Result<Self> {
        let column = batch
            .column_by_name("features")
            .ok_or_else(|| Error::Container("missing features column".into()))?
            .as_any();
        if let Some(list) = column.downcast_ref::<FixedSizeListArray>() {
            Ok(Self::Fixed(list))
        } else if let Some(list) = column.downcast_ref::<ListArray>() {
            Ok(Self::Variable(list))
        } else {
            Err(Error::Container("features column must be a list".into()))
        }
    }

    fn row(&self, i: usize) -> ArrayRef {
        match self {
            Self::Fixed(list) => list.value(i),
            Self::Variable(list) => list.value(i),
        }
    }
}

fn parse_meta(metadata: &HashMap<String, String>, key: &str) -> Result<usize> {
    metadata
        .get(key)
        .ok_or_else(|| Error::Container(format!("missing `{key}` metadata")))?
        .parse()
        .map_err(|e| Error::Container(format!("invalid `{key}` metadata: {e}")))
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Container(format!("{name} column must be Int64")))
}

fn to_usize(value: i64, column: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::Container(format!("negative {column}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, features: Vec<f32>) -> FeatureRecord {
        FeatureRecord {
            structure_index: index,
            features,
            num_atoms: index + 1,
        }
    }

    #[test]
    fn test_from_records_layout() {
        let records = vec![record(0, vec![1.0, 2.0]), record(3, vec![3.0, 4.0])];
        let table = FeatureTable::from_records(&records, "test").unwrap();

        assert_eq!(table.num_structures, 2);
        assert_eq!(table.feature_dim, 2);
        assert_eq!(table.features.shape(), &[2, 2]);
        assert_eq!(table.row(1).unwrap().to_vec(), vec![3.0, 4.0]);
        assert!(table.row(2).is_none());
        assert_eq!(table.row_for_structure(3).unwrap().to_vec(), vec![3.0, 4.0]);
        assert!(table.row_for_structure(1).is_none());
        assert_eq!(table.records(), records);
    }

    #[test]
    fn test_from_records_empty() {
        assert!(matches!(
            FeatureTable::from_records(&[], "test"),
            Err(Error::EmptyResult)
        ));
    }

    #[test]
    fn test_from_records_dimension_mismatch() {
        let records = vec![record(0, vec![1.0, 2.0]), record(1, vec![1.0])];
        match FeatureTable::from_records(&records, "test") {
            Err(Error::DimensionMismatch {
                structure_index,
                expected,
                found,
            }) => {
                assert_eq!(structure_index, 1);
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_key_value_metadata_order() {
        let table = FeatureTable::from_records(&[record(0, vec![0.5; 4])], "radial").unwrap();

        let entries: Vec<(String, Option<String>)> = table
            .key_value_metadata()
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        assert_eq!(
            entries,
            vec![
                (META_NUM_STRUCTURES.to_string(), Some("1".to_string())),
                (META_FEATURE_DIM.to_string(), Some("4".to_string())),
                (META_DESCRIPTION.to_string(), Some("radial".to_string())),
            ]
        );

        let schema = table.schema();
        assert!(schema.metadata().is_empty());
        assert_eq!(schema.fields().len(), 3);
    }
}
