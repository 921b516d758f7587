//! Report Finalizer
//!
//! Converts a reconciled [`ReportTable`] into an Arrow `RecordBatch` and
//! writes it as comma-delimited CSV (missing cells as `?`) or Parquet. The
//! paired readers turn either file back into a `ReportTable`.
//!
//! Column types follow the column names: key text and provenance are Utf8,
//! `Key_Run` and `Key_Fold` are Int64, everything else is nullable Float64.
//! Files are written to a staging path and renamed into place, so a failed
//! write never leaves a partial report behind.

use crate::record::{Cell, KEY_COLUMNS, MISSING, PROVENANCE_COLUMNS};
use crate::reconcile::Schema;
pub use crate::reconcile::ReportTable;
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Report container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Comma-delimited text.
    Csv,
    /// Typed columnar container.
    Parquet,
}

impl ReportFormat {
    /// Guess the format from a file extension; anything but `.parquet` is CSV.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => Self::Parquet,
            _ => Self::Csv,
        }
    }
}

/// Arrow type of a report column.
#[must_use]
pub fn column_type(name: &str) -> DataType {
    match name {
        "Key_Run" | "Key_Fold" => DataType::Int64,
        n if KEY_COLUMNS.contains(&n) || PROVENANCE_COLUMNS.contains(&n) => DataType::Utf8,
        _ => DataType::Float64,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn build_column(rows: &[Vec<Cell>], j: usize, data_type: &DataType) -> ArrayRef {
    let cells = rows.iter().map(|row| &row[j]);
    match data_type {
        DataType::Int64 => Arc::new(
            cells
                .map(|c| match c {
                    Cell::Integer(i) => Some(*i),
                    Cell::Number(n) => Some(*n as i64),
                    Cell::Text(t) => t.parse().ok(),
                    Cell::Missing => None,
                })
                .collect::<Int64Array>(),
        ),
        DataType::Utf8 => Arc::new(
            cells
                .map(|c| (!c.is_missing()).then(|| c.to_string()))
                .collect::<StringArray>(),
        ),
        _ => Arc::new(
            cells
                .map(|c| match c {
                    Cell::Number(n) => Some(*n),
                    Cell::Integer(i) => Some(*i as f64),
                    Cell::Text(t) => t.parse().ok(),
                    Cell::Missing => None,
                })
                .collect::<Float64Array>(),
        ),
    }
}

impl ReportTable {
    /// Typed Arrow view of the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Arrow` if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let names = self.schema().column_names();
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(n, column_type(n), true))
            .collect();
        let columns: Vec<ArrayRef> = fields
            .iter()
            .enumerate()
            .map(|(j, f)| build_column(self.rows(), j, f.data_type()))
            .collect();
        Ok(RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), columns)?)
    }

    /// Rebuild a table from a batch; Utf8 columns are cast to the report
    /// column types and `?` text is read as missing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the columns are not a report layout.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let arrow_schema = batch.schema();
        let names: Vec<String> = arrow_schema.fields().iter().map(|f| f.name().clone()).collect();
        let schema = Schema::from_columns(&names)?;

        let mut rows: Vec<Vec<Cell>> = vec![Vec::with_capacity(names.len()); batch.num_rows()];
        for (name, column) in names.iter().zip(batch.columns()) {
            let target = column_type(name);
            let column = if column.data_type() == &target {
                Arc::clone(column)
            } else {
                cast(column, &target)?
            };
            let key_text = KEY_COLUMNS.contains(&name.as_str());
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(cell_at(&*column, i, key_text)?);
            }
        }
        Self::from_parts(schema, rows)
    }

    /// Write comma-delimited text with a header row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Arrow` if writing fails.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let batch = self.to_record_batch()?;
        write_staged(path, |file| {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .with_delimiter(b',')
                .with_null(MISSING.to_string())
                .build(BufWriter::new(file));
            writer.write(&batch)?;
            writer.into_inner().flush()?;
            Ok(())
        })?;
        info!(path = %path.display(), rows = self.len(), "CSV report written");
        Ok(())
    }

    /// Write a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Parquet` if writing fails.
    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        let batch = self.to_record_batch()?;
        write_staged(path, |file| {
            let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None)?;
            writer.write(&batch)?;
            writer.close()?;
            Ok(())
        })?;
        info!(path = %path.display(), rows = self.len(), "Parquet report written");
        Ok(())
    }

    /// Write in `format`.
    ///
    /// # Errors
    ///
    /// See [`ReportTable::write_csv`] and [`ReportTable::write_parquet`].
    pub fn write(&self, path: &Path, format: ReportFormat) -> Result<()> {
        match format {
            ReportFormat::Csv => self.write_csv(path),
            ReportFormat::Parquet => self.write_parquet(path),
        }
    }

    /// Read a CSV report.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a report.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let format = arrow::csv::reader::Format::default()
            .with_header(true)
            .with_delimiter(b',');
        let (header, _) = format.infer_schema(&mut file, Some(0))?;
        file.rewind()?;

        // Everything as text; typing happens by column name.
        let schema = Arc::new(ArrowSchema::new(
            header
                .fields()
                .iter()
                .map(|f| Field::new(f.name(), DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ));
        let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
            .with_format(format)
            .build(file)?;
        let batches = reader.collect::<std::result::Result<Vec<_>, ArrowError>>()?;
        Self::from_record_batch(&concat_batches(&schema, &batches)?)
    }

    /// Read a Parquet report.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a report.
    pub fn read_parquet(path: &Path) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let schema = Arc::clone(builder.schema());
        let batches = builder
            .build()?
            .collect::<std::result::Result<Vec<_>, ArrowError>>()?;
        Self::from_record_batch(&concat_batches(&schema, &batches)?)
    }

    /// Read a report in `format`.
    ///
    /// # Errors
    ///
    /// See [`ReportTable::read_csv`] and [`ReportTable::read_parquet`].
    pub fn read(path: &Path, format: ReportFormat) -> Result<Self> {
        match format {
            ReportFormat::Csv => Self::read_csv(path),
            ReportFormat::Parquet => Self::read_parquet(path),
        }
    }
}

fn cell_at(column: &dyn Array, i: usize, key_text: bool) -> Result<Cell> {
    if column.is_null(i) {
        // Empty key text (e.g. no scheme options) reads back as null from CSV.
        return Ok(if key_text { Cell::Text(String::new()) } else { Cell::Missing });
    }
    let any = column.as_any();
    if let Some(a) = any.downcast_ref::<StringArray>() {
        let v = a.value(i);
        return Ok(if v == MISSING && !key_text {
            Cell::Missing
        } else {
            Cell::Text(v.to_string())
        });
    }
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        return Ok(Cell::Integer(a.value(i)));
    }
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        let v = a.value(i);
        return Ok(if v.is_nan() { Cell::Missing } else { Cell::Number(v) });
    }
    Err(Error::Schema(format!(
        "unsupported report column type {}",
        column.data_type()
    )))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_staged<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path);
    let outcome = File::create(&staging)
        .map_err(Error::from)
        .and_then(write)
        .and_then(|()| fs::rename(&staging, path).map_err(Error::from));
    if outcome.is_err() {
        let _ = fs::remove_file(&staging);
    }
    outcome
}
