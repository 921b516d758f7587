//! Schema Reconciler
//!
//! Records of one job share their fixed columns (key, statistics of the
//! job's mode, and provenance when any record carries it) but each learner
//! contributes its own dynamic measures. The reconciler computes the union:
//! fixed columns first, then every measure name in first-seen order across
//! the records, and aligns each record to it. Cells a record does not have
//! are missing. Column names are unique: a measure named like a fixed
//! column is left out of the report.

use crate::config::EvaluationMode;
use crate::record::{Cell, ResultRecord, KEY_COLUMNS, PROVENANCE_COLUMNS};
use crate::stats::columns;
use crate::{Error, Result};
use rustc_hash::FxHashSet;
use tracing::warn;

/// Unified column list of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    mode: Option<EvaluationMode>,
    provenance: bool,
    measures: Vec<String>,
}

impl Schema {
    /// Derive the schema of `records`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if records of both evaluation modes are mixed.
    pub fn of(records: &[ResultRecord]) -> Result<Self> {
        let mut mode = None;
        let mut provenance = false;
        let mut seen: FxHashSet<&str> = KEY_COLUMNS
            .iter()
            .chain(&PROVENANCE_COLUMNS)
            .copied()
            .collect();
        let mut shadowed = FxHashSet::default();
        let mut measures = Vec::new();

        for record in records {
            match mode {
                None => {
                    mode = Some(record.mode());
                    seen.extend(columns(record.mode()).iter().copied());
                }
                Some(m) if m != record.mode() => {
                    return Err(Error::Schema(format!(
                        "records mix {m} and {} statistics",
                        record.mode()
                    )))
                }
                Some(_) => {}
            }
            provenance |= record.provenance().is_some();
            for name in record.measures().keys() {
                if seen.insert(name.as_str()) {
                    measures.push(name.clone());
                } else if !measures.contains(name) && shadowed.insert(name.as_str()) {
                    warn!(
                        measure = %name,
                        "measure shares its name with a fixed column; left out of the report"
                    );
                }
            }
        }

        Ok(Self {
            mode,
            provenance,
            measures,
        })
    }

    /// Evaluation mode, `None` when there were no records.
    #[must_use]
    pub const fn mode(&self) -> Option<EvaluationMode> {
        self.mode
    }

    /// True when provenance columns are present.
    #[must_use]
    pub const fn has_provenance(&self) -> bool {
        self.provenance
    }

    /// Dynamic measure columns in first-seen order.
    #[must_use]
    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    /// Number of fixed (non-measure) columns.
    #[must_use]
    pub fn fixed_width(&self) -> usize {
        KEY_COLUMNS.len()
            + self.mode.map_or(0, |m| columns(m).len())
            + if self.provenance { PROVENANCE_COLUMNS.len() } else { 0 }
    }

    /// Rebuild a schema from a report header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the header does not start with the key
    /// columns or a fixed statistics block is truncated.
    pub fn from_columns(names: &[String]) -> Result<Self> {
        let starts_with = |at: usize, expected: &[&str]| {
            names.len() >= at + expected.len()
                && names[at..at + expected.len()]
                    .iter()
                    .zip(expected)
                    .all(|(a, b)| a == b)
        };
        if !starts_with(0, &KEY_COLUMNS) {
            return Err(Error::Schema(
                "report header does not start with the key columns".to_string(),
            ));
        }
        let mut pos = KEY_COLUMNS.len();
        let mode = [EvaluationMode::Classification, EvaluationMode::Regression]
            .into_iter()
            .find(|m| starts_with(pos, columns(*m)));
        match mode {
            Some(m) => pos += columns(m).len(),
            None if names.len() > pos => {
                return Err(Error::Schema(format!(
                    "column '{}' follows the key block; expected a statistics block",
                    names[pos]
                )))
            }
            None => {}
        }
        let provenance = starts_with(pos, &PROVENANCE_COLUMNS);
        if provenance {
            pos += PROVENANCE_COLUMNS.len();
        }
        let measures = names[pos..].to_vec();
        let mut seen: FxHashSet<&str> = names[..pos].iter().map(String::as_str).collect();
        seen.extend(KEY_COLUMNS.iter().chain(&PROVENANCE_COLUMNS).copied());
        if let Some(dup) = measures.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(Error::Schema(format!("duplicate column '{dup}'")));
        }
        Ok(Self {
            mode,
            provenance,
            measures,
        })
    }

    /// Every column name, fixed then dynamic.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = KEY_COLUMNS.iter().map(ToString::to_string).collect();
        if let Some(mode) = self.mode {
            names.extend(columns(mode).iter().map(ToString::to_string));
        }
        if self.provenance {
            names.extend(PROVENANCE_COLUMNS.iter().map(ToString::to_string));
        }
        names.extend(self.measures.iter().cloned());
        names
    }

    /// Total column count.
    #[must_use]
    pub fn width(&self) -> usize {
        self.fixed_width() + self.measures.len()
    }

    /// Align one record to this schema.
    #[must_use]
    pub fn align(&self, record: &ResultRecord) -> Vec<Cell> {
        let mut row = Vec::with_capacity(self.width());
        row.extend(record.fixed_cells());
        if self.provenance && record.provenance().is_none() {
            row.extend(std::iter::repeat(Cell::Missing).take(PROVENANCE_COLUMNS.len()));
        }
        row.extend(self.measures.iter().map(|name| record.measure_cell(name)));
        row
    }
}

/// A reconciled, rectangular report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    schema: Schema,
    rows: Vec<Vec<Cell>>,
}

impl ReportTable {
    /// Table schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Rows, each exactly `schema().width()` cells long.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
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
}

impl ReportTable {
    /// Assemble a table from aligned rows.
    pub(crate) fn from_parts(schema: Schema, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let width = schema.width();
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            return Err(Error::Schema(format!(
                "row {i} has {} cells, schema has {width} columns",
                rows[i].len()
            )));
        }
        Ok(Self { schema, rows })
    }
}

/// Reconcile `records` into one table, preserving record order.
///
/// # Errors
///
/// Returns `Error::Schema` for mixed evaluation modes.
pub fn reconcile(records: &[ResultRecord]) -> Result<ReportTable> {
    let schema = Schema::of(records)?;
    let rows = records.iter().map(|r| schema.align(r)).collect();
    Ok(ReportTable { schema, rows })
}
