//! Result records and their per-shard line encoding
//!
//! A record is a tagged shape: a fixed key block, a fixed statistics block
//! whose columns depend only on the evaluation mode, an ordered map of
//! dynamic measures whose names come from the classifier instance, and
//! optional row-level provenance.
//!
//! Shard output stores each record as two tab-delimited lines, the data line
//! followed by its header line, so a consumer needs nothing but the file to
//! rebuild the record.

use crate::config::EvaluationMode;
use crate::stats::{self, StatsBlock};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};

/// Missing-value marker in every textual format
pub const MISSING: &str = "?";

/// Field delimiter of the shard output lines
pub const RECORD_DELIMITER: char = '\t';

/// Key block columns, in record order
pub const KEY_COLUMNS: [&str; 7] = [
    "Key_Dataset",
    "Key_Run",
    "Key_Fold",
    "Key_Scheme",
    "Key_Scheme_options",
    "Key_Scheme_version_ID",
    "Date_time",
];

/// Provenance columns, present when row identifiers or predictions were
/// requested
pub const PROVENANCE_COLUMNS: [&str; 3] = ["Instance_IDs", "Predictions", "Targets"];

/// Separator inside provenance strings
pub const PROVENANCE_SEPARATOR: &str = ";";

/// One table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Number(f64),
    /// Missing value.
    Missing,
}

impl Cell {
    /// True for [`Cell::Missing`].
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    fn from_number(value: Option<f64>) -> Self {
        match value {
            Some(v) if !v.is_nan() => Self::Number(v),
            _ => Self::Missing,
        }
    }

    fn from_text(value: Option<&str>) -> Self {
        value.map_or(Self::Missing, |v| Self::Text(v.to_string()))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Missing => f.write_str(MISSING),
        }
    }
}

/// Identity of the evaluated combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBlock {
    /// Dataset (relation) name.
    pub dataset: String,
    /// Repetition index.
    pub run: u32,
    /// Fold index.
    pub fold: u32,
    /// Scheme name.
    pub scheme: String,
    /// Scheme options joined by spaces.
    pub scheme_options: String,
    /// Scheme version identifier.
    pub scheme_version: String,
    /// Evaluation timestamp (RFC 3339).
    pub timestamp: String,
}

impl KeyBlock {
    fn cells(&self) -> [Cell; 7] {
        [
            Cell::Text(self.dataset.clone()),
            Cell::Integer(i64::from(self.run)),
            Cell::Integer(i64::from(self.fold)),
            Cell::Text(self.scheme.clone()),
            Cell::Text(self.scheme_options.clone()),
            Cell::Text(self.scheme_version.clone()),
            Cell::Text(self.timestamp.clone()),
        ]
    }
}

/// Row-level identifiers, predictions and targets, each joined with
/// [`PROVENANCE_SEPARATOR`] in test order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Identifier column values.
    pub instance_ids: Option<String>,
    /// Predicted labels or values.
    pub predictions: Option<String>,
    /// Actual labels or values.
    pub targets: Option<String>,
}

impl Provenance {
    fn cells(&self) -> [Cell; 3] {
        [
            Cell::from_text(self.instance_ids.as_deref()),
            Cell::from_text(self.predictions.as_deref()),
            Cell::from_text(self.targets.as_deref()),
        ]
    }
}

/// Dynamic measures in the order the classifier reported them.
pub type Measures = IndexMap<String, Option<f64>>;

/// The result of one successfully evaluated work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    key: KeyBlock,
    stats: StatsBlock,
    measures: Measures,
    provenance: Option<Provenance>,
}

impl ResultRecord {
    /// Assemble a record.
    #[must_use]
    pub const fn new(
        key: KeyBlock,
        stats: StatsBlock,
        measures: Measures,
        provenance: Option<Provenance>,
    ) -> Self {
        Self {
            key,
            stats,
            measures,
            provenance,
        }
    }

    /// Key block.
    #[must_use]
    pub const fn key(&self) -> &KeyBlock {
        &self.key
    }

    /// Statistics block.
    #[must_use]
    pub const fn stats(&self) -> &StatsBlock {
        &self.stats
    }

    /// Evaluation mode of the statistics block.
    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        self.stats.mode()
    }

    /// Dynamic measures.
    #[must_use]
    pub const fn measures(&self) -> &Measures {
        &self.measures
    }

    /// Provenance, when requested.
    #[must_use]
    pub const fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// Key, statistics and (when present) provenance columns.
    #[must_use]
    pub fn fixed_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = KEY_COLUMNS.to_vec();
        columns.extend_from_slice(self.stats.columns());
        if self.provenance.is_some() {
            columns.extend_from_slice(&PROVENANCE_COLUMNS);
        }
        columns
    }

    /// Cells aligned with [`ResultRecord::fixed_columns`].
    #[must_use]
    pub fn fixed_cells(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self.key.cells().into();
        cells.extend(self.stats.values().iter().map(|v| Cell::from_number(*v)));
        if let Some(provenance) = &self.provenance {
            cells.extend(provenance.cells());
        }
        cells
    }

    /// Cell for a dynamic measure; missing if absent or unavailable.
    #[must_use]
    pub fn measure_cell(&self, name: &str) -> Cell {
        Cell::from_number(self.measures.get(name).copied().flatten())
    }

    /// Header line: every column this record carries.
    #[must_use]
    pub fn header_line(&self) -> String {
        let mut fields: Vec<String> = self
            .fixed_columns()
            .into_iter()
            .map(sanitize)
            .collect();
        fields.extend(self.measures.keys().map(|k| sanitize(k)));
        fields.join(&RECORD_DELIMITER.to_string())
    }

    /// Data line aligned with [`ResultRecord::header_line`].
    #[must_use]
    pub fn data_line(&self) -> String {
        let mut fields: Vec<String> = self
            .fixed_cells()
            .iter()
            .map(|c| sanitize(&c.to_string()))
            .collect();
        fields.extend(
            self.measures
                .values()
                .map(|v| Cell::from_number(*v).to_string()),
        );
        fields.join(&RECORD_DELIMITER.to_string())
    }

    /// Rebuild a record from a data line and its header line.
    ///
    /// # Errors
    ///
    /// Returns `Error::WireFormat` if the lines disagree in width, the key
    /// block is malformed, or the statistics columns match neither mode.
    pub fn from_lines(data: &str, header: &str) -> Result<Self> {
        let values: Vec<&str> = data.split(RECORD_DELIMITER).collect();
        let names: Vec<&str> = header.split(RECORD_DELIMITER).collect();
        if values.len() != names.len() {
            return Err(Error::WireFormat(format!(
                "data line has {} fields but header has {}",
                values.len(),
                names.len()
            )));
        }
        if names.len() < KEY_COLUMNS.len() || names[..KEY_COLUMNS.len()] != KEY_COLUMNS {
            return Err(Error::WireFormat(format!(
                "header does not start with the key block: {header:?}"
            )));
        }

        let key = KeyBlock {
            dataset: values[0].to_string(),
            run: parse_index(values[1], "Key_Run")?,
            fold: parse_index(values[2], "Key_Fold")?,
            scheme: values[3].to_string(),
            scheme_options: values[4].to_string(),
            scheme_version: values[5].to_string(),
            timestamp: values[6].to_string(),
        };

        let mut pos = KEY_COLUMNS.len();
        let mode = [EvaluationMode::Classification, EvaluationMode::Regression]
            .into_iter()
            .find(|m| {
                let cols = stats::columns(*m);
                names.len() >= pos + cols.len() && names[pos..pos + cols.len()] == *cols
            })
            .ok_or_else(|| {
                Error::WireFormat("statistics columns match no evaluation mode".to_string())
            })?;
        let stat_len = stats::columns(mode).len();
        let stat_values = values[pos..pos + stat_len]
            .iter()
            .map(|v| parse_number(v))
            .collect::<Result<Vec<_>>>()?;
        let stats = StatsBlock::from_values(mode, stat_values)
            .ok_or_else(|| Error::WireFormat("statistics block width".to_string()))?;
        pos += stat_len;

        let provenance = if names.len() >= pos + PROVENANCE_COLUMNS.len()
            && names[pos..pos + PROVENANCE_COLUMNS.len()] == PROVENANCE_COLUMNS
        {
            let text = |v: &str| (v != MISSING).then(|| v.to_string());
            let p = Provenance {
                instance_ids: text(values[pos]),
                predictions: text(values[pos + 1]),
                targets: text(values[pos + 2]),
            };
            pos += PROVENANCE_COLUMNS.len();
            Some(p)
        } else {
            None
        };

        let mut measures = Measures::new();
        for (name, value) in names[pos..].iter().zip(&values[pos..]) {
            measures.insert((*name).to_string(), parse_number(value)?);
        }

        Ok(Self {
            key,
            stats,
            measures,
            provenance,
        })
    }

    /// Append the data/header pair for this record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if writing fails.
    pub fn write_pair<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "{}", self.data_line())?;
        writeln!(out, "{}", self.header_line())?;
        Ok(())
    }
}

/// Read every data/header pair from `input`.
///
/// # Errors
///
/// Returns `Error::WireFormat` for a trailing unpaired line or a malformed
/// pair, and `Error::Io` if reading fails.
pub fn read_pairs<R: BufRead>(input: R) -> Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    let mut lines = input.lines().filter(|l| !matches!(l, Ok(s) if s.is_empty()));
    while let Some(data) = lines.next() {
        let data = data?;
        let header = lines.next().ok_or_else(|| {
            Error::WireFormat("data line without a header line (unpaired output)".to_string())
        })??;
        records.push(ResultRecord::from_lines(&data, &header)?);
    }
    Ok(records)
}

fn sanitize(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

fn parse_index(value: &str, column: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|e| Error::WireFormat(format!("bad {column} value '{value}': {e}")))
}

fn parse_number(value: &str) -> Result<Option<f64>> {
    if value == MISSING {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|e| Error::WireFormat(format!("bad numeric value '{value}': {e}")))
}
