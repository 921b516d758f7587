//! Dataset loading (Arrow/Parquet)
//!
//! Datasets arrive as Parquet (`.parquet`) or comma-delimited text with a
//! header row. Both are read into Arrow record batches, then flattened into
//! row-major `f64` instances: numeric columns keep their value, every other
//! column becomes nominal with labels indexed in first-seen order. Missing
//! cells are `NaN`.

use crate::config::{EvaluationMode, TargetSelector};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use dashmap::DashMap;
use serde::Serialize;
use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A dataset column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Attribute {
    /// Real-valued column.
    Numeric {
        /// Column name.
        name: String,
    },
    /// Categorical column; values are indices into `values`.
    Nominal {
        /// Column name.
        name: String,
        /// Labels in first-seen order.
        values: Vec<String>,
    },
}

impl Attribute {
    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name } | Self::Nominal { name, .. } => name,
        }
    }

    /// True for categorical columns.
    #[must_use]
    pub const fn is_nominal(&self) -> bool {
        matches!(self, Self::Nominal { .. })
    }

    /// Number of labels (0 for numeric columns).
    #[must_use]
    pub fn num_values(&self) -> usize {
        match self {
            Self::Numeric { .. } => 0,
            Self::Nominal { values, .. } => values.len(),
        }
    }

    /// Render a stored value; missing renders as `?`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn format(&self, value: f64) -> String {
        if value.is_nan() {
            return "?".to_string();
        }
        match self {
            Self::Numeric { .. } => value.to_string(),
            Self::Nominal { values, .. } => values
                .get(value as usize)
                .cloned()
                .unwrap_or_else(|| "?".to_string()),
        }
    }
}

/// A loaded table: attributes plus row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    attributes: Vec<Attribute>,
    rows: Vec<Vec<f64>>,
}

impl Dataset {
    /// Build from parts. Every row must have one value per attribute.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dataset` on a ragged row.
    pub fn new(
        name: impl Into<String>,
        attributes: Vec<Attribute>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != attributes.len())
        {
            return Err(Error::Dataset(format!(
                "row {idx} has {} values, expected {}",
                row.len(),
                attributes.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            attributes,
            rows,
        })
    }

    /// Load a Parquet or delimited-text file.
    ///
    /// # Errors
    ///
    /// Returns `Error::DatasetNotFound` if the file is missing, or an
    /// Arrow/Parquet/Dataset error if it cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::DatasetNotFound(path.to_path_buf()));
        }
        let name = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());

        let (schema, batches) = if is_parquet(path) {
            read_parquet(path)?
        } else {
            read_csv(path)?
        };
        let batch = arrow::compute::concat_batches(&schema, &batches)?;
        let dataset = Self::from_batch(name, &batch)?;
        debug!(
            dataset = %path.display(),
            rows = dataset.num_rows(),
            columns = dataset.num_attributes(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    fn from_batch(name: String, batch: &RecordBatch) -> Result<Self> {
        let num_rows = batch.num_rows();
        let mut attributes = Vec::with_capacity(batch.num_columns());
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(batch.num_columns());

        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            let (attribute, values) = if field.data_type().is_numeric() {
                numeric_column(field.name(), column)?
            } else {
                nominal_column(field.name(), column)?
            };
            attributes.push(attribute);
            columns.push(values);
        }

        let rows = (0..num_rows)
            .map(|r| columns.iter().map(|c| c[r]).collect())
            .collect();
        Self::new(name, attributes, rows)
    }

    /// Relation name (file stem).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column descriptors.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Number of columns.
    #[must_use]
    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Select target and identifier columns, producing learner input.
    ///
    /// Rows with a missing target are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dataset` if the target cannot be resolved, its type
    /// does not suit `mode`, or the identifier column is out of range.
    pub fn instances(
        &self,
        target: TargetSelector,
        mode: EvaluationMode,
        id_column: Option<usize>,
    ) -> Result<Instances> {
        let target_idx = target.resolve(self.attributes.len())?;
        let target_attr = self.attributes[target_idx].clone();
        match (mode, target_attr.is_nominal()) {
            (EvaluationMode::Classification, false) => {
                return Err(Error::Dataset(format!(
                    "classification needs a nominal target, '{}' is numeric",
                    target_attr.name()
                )))
            }
            (EvaluationMode::Regression, true) => {
                return Err(Error::Dataset(format!(
                    "regression needs a numeric target, '{}' is nominal",
                    target_attr.name()
                )))
            }
            _ => {}
        }
        if let Some(id) = id_column {
            if id >= self.attributes.len() || id == target_idx {
                return Err(Error::Dataset(format!(
                    "identifier column {} unusable (target is column {})",
                    id + 1,
                    target_idx + 1
                )));
            }
        }

        let feature_idx: Vec<usize> = (0..self.attributes.len())
            .filter(|&i| i != target_idx && Some(i) != id_column)
            .collect();
        let attributes = feature_idx
            .iter()
            .map(|&i| self.attributes[i].clone())
            .collect();

        let rows = self
            .rows
            .iter()
            .filter(|row| !row[target_idx].is_nan())
            .map(|row| Instance {
                features: feature_idx.iter().map(|&i| row[i]).collect(),
                target: row[target_idx],
                id: id_column.map(|id| self.attributes[id].format(row[id])),
            })
            .collect();

        Ok(Instances {
            relation: self.name.clone(),
            attributes,
            target: target_attr,
            rows,
        })
    }
}

/// One learner-facing row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    /// Input attribute values (`NaN` = missing).
    pub features: Vec<f64>,
    /// Target value; a label index for nominal targets.
    pub target: f64,
    /// Identifier for provenance, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Learner input: feature attributes, the target attribute and rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instances {
    relation: String,
    attributes: Vec<Attribute>,
    target: Attribute,
    rows: Vec<Instance>,
}

impl Instances {
    /// Build directly (tests and embedding callers).
    #[must_use]
    pub fn new(
        relation: impl Into<String>,
        attributes: Vec<Attribute>,
        target: Attribute,
        rows: Vec<Instance>,
    ) -> Self {
        Self {
            relation: relation.into(),
            attributes,
            target,
            rows,
        }
    }

    /// Relation name.
    #[must_use]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Feature attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Target attribute.
    #[must_use]
    pub const fn target(&self) -> &Attribute {
        &self.target
    }

    /// Rows.
    #[must_use]
    pub fn rows(&self) -> &[Instance] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of target classes (0 for numeric targets).
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.target.num_values()
    }

    /// Rows at `indices`, in that order.
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            relation: self.relation.clone(),
            attributes: self.attributes.clone(),
            target: self.target.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Byte length of the JSON serialization.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// Concurrent cache of loaded datasets keyed by resolved path.
///
/// Units sharing a dataset on the same worker load it once.
#[derive(Debug, Default)]
pub struct DatasetCache {
    datasets: DashMap<PathBuf, Arc<Dataset>>,
}

impl DatasetCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached dataset or load it.
    ///
    /// # Errors
    ///
    /// Propagates [`Dataset::load`] errors; failures are not cached.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Dataset>> {
        if let Some(dataset) = self.datasets.get(path) {
            return Ok(Arc::clone(dataset.value()));
        }
        let loaded = Arc::new(Dataset::load(path)?);
        let entry = self
            .datasets
            .entry(path.to_path_buf())
            .or_insert(loaded);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of cached datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Column names of a dataset without reading its rows.
///
/// # Errors
///
/// Returns error if the file cannot be opened or its header parsed.
pub fn peek_columns(path: &Path) -> Result<Vec<String>> {
    let schema = if is_parquet(path) {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        let file = File::open(path)?;
        ParquetRecordBatchReaderBuilder::try_new(file)?.schema().clone()
    } else {
        let file = File::open(path)?;
        let (schema, _) = csv_format().infer_schema(file, Some(1))?;
        Arc::new(schema)
    };
    Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
}

fn csv_format() -> Format {
    Format::default().with_header(true).with_delimiter(b',')
}

fn read_csv(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let format = csv_format();
    let mut file = File::open(path)?;
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;

    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn read_parquet(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn numeric_column(name: &str, column: &ArrayRef) -> Result<(Attribute, Vec<f64>)> {
    let cast = arrow::compute::cast(column, &DataType::Float64)?;
    let values = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Dataset(format!("column '{name}' is not castable to f64")))?;
    let out = (0..values.len())
        .map(|i| if values.is_null(i) { f64::NAN } else { values.value(i) })
        .collect();
    Ok((
        Attribute::Numeric {
            name: name.to_string(),
        },
        out,
    ))
}

#[allow(clippy::cast_precision_loss)]
fn nominal_column(name: &str, column: &ArrayRef) -> Result<(Attribute, Vec<f64>)> {
    let cast = arrow::compute::cast(column, &DataType::Utf8)?;
    let labels = cast
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Dataset(format!("column '{name}' is not castable to text")))?;

    let mut values: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(labels.len());
    for i in 0..labels.len() {
        if labels.is_null(i) {
            out.push(f64::NAN);
            continue;
        }
        let label = labels.value(i);
        let idx = values.iter().position(|v| v == label).unwrap_or_else(|| {
            values.push(label.to_string());
            values.len() - 1
        });
        out.push(idx as f64);
    }
    Ok((
        Attribute::Nominal {
            name: name.to_string(),
            values,
        },
        out,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_csv_types() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "weather.csv", "temp,humid,play\n85,85,no\n80,90,no\n83,86,yes\n");
        let ds = Dataset::load(&path).unwrap();

        assert_eq!(ds.name(), "weather");
        assert_eq!(ds.num_rows(), 3);
        assert!(!ds.attributes()[0].is_nominal());
        assert_eq!(
            ds.attributes()[2],
            Attribute::Nominal {
                name: "play".to_string(),
                values: vec!["no".to_string(), "yes".to_string()],
            }
        );
    }

    #[test]
    fn test_instances_drop_missing_target() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "d.csv", "x,y\n1,a\n2,\n3,b\n");
        let ds = Dataset::load(&path).unwrap();
        let inst = ds
            .instances(TargetSelector::Last, EvaluationMode::Classification, None)
            .unwrap();
        assert_eq!(inst.len(), 2);
        assert_eq!(inst.num_classes(), 2);
    }

    #[test]
    fn test_instances_mode_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "d.csv", "x,y\n1,a\n2,b\n");
        let ds = Dataset::load(&path).unwrap();
        assert!(ds
            .instances(TargetSelector::Last, EvaluationMode::Regression, None)
            .is_err());
        assert!(ds
            .instances(TargetSelector::First, EvaluationMode::Classification, None)
            .is_err());
        assert!(ds
            .instances(TargetSelector::First, EvaluationMode::Regression, None)
            .is_ok());
    }

    #[test]
    fn test_identifier_column_excluded_from_features() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "d.csv", "id,x,y\nr1,1,a\nr2,2,b\n");
        let ds = Dataset::load(&path).unwrap();
        let inst = ds
            .instances(TargetSelector::Last, EvaluationMode::Classification, Some(0))
            .unwrap();
        assert_eq!(inst.attributes().len(), 1);
        assert_eq!(inst.rows()[1].id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_peek_columns_csv() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "d.csv", "a,b,c\n1,2,3\n");
        assert_eq!(peek_columns(&path).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Dataset::load("/no/such/file.csv").unwrap_err();
        assert!(matches!(err, Error::DatasetNotFound(_)));
    }

    #[test]
    fn test_cache_loads_once() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "d.csv", "x,y\n1,a\n");
        let cache = DatasetCache::new();
        let a = cache.get_or_load(&path).unwrap();
        let b = cache.get_or_load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let attrs = vec![Attribute::Numeric {
            name: "x".to_string(),
        }];
        assert!(Dataset::new("d", attrs, vec![vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_attribute_format() {
        let nominal = Attribute::Nominal {
            name: "c".to_string(),
            values: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(nominal.format(1.0), "b");
        assert_eq!(nominal.format(f64::NAN), "?");
        let numeric = Attribute::Numeric {
            name: "x".to_string(),
        };
        assert_eq!(numeric.format(2.5), "2.5");
    }
}
