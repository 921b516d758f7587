//! Work units and their line-oriented wire format
//!
//! One unit per line, seven tab-separated fields:
//!
//! ```text
//! classifier  repetition  dataset  fold/folds  target  mode  cluster-config
//! ```
//!
//! The fold field carries the fold count alongside the index (`3/10`) so a
//! worker can rebuild the partition from the line alone. An absent cluster
//! config is written as `-`.

use crate::config::{EvaluationMode, TargetSelector};
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Field delimiter of the work-unit line
pub const UNIT_DELIMITER: char = '\t';

/// Placeholder for an absent cluster config path
const NO_CLUSTER_CONFIG: &str = "-";

const UNIT_FIELDS: usize = 7;

/// One (classifier, repetition, dataset, fold) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    classifier: String,
    repetition: u32,
    dataset: PathBuf,
    fold: u32,
    folds: u32,
    target: TargetSelector,
    mode: EvaluationMode,
    cluster_config: Option<PathBuf>,
}

impl WorkUnit {
    /// Create a unit. `fold` must be below `folds` and `repetition` >= 1.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the indices are out of range.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: impl Into<String>,
        repetition: u32,
        dataset: impl Into<PathBuf>,
        fold: u32,
        folds: u32,
        target: TargetSelector,
        mode: EvaluationMode,
        cluster_config: Option<PathBuf>,
    ) -> Result<Self> {
        if repetition == 0 {
            return Err(Error::InvalidConfig(
                "repetition index is 1-based".to_string(),
            ));
        }
        if fold >= folds {
            return Err(Error::InvalidConfig(format!(
                "fold index {fold} out of range for {folds} folds"
            )));
        }
        Ok(Self {
            classifier: classifier.into(),
            repetition,
            dataset: dataset.into(),
            fold,
            folds,
            target,
            mode,
            cluster_config,
        })
    }

    /// Classifier specification.
    #[must_use]
    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    /// Repetition index in `[1, R]`; also the shuffle seed.
    #[must_use]
    pub const fn repetition(&self) -> u32 {
        self.repetition
    }

    /// Dataset reference as given by the caller.
    #[must_use]
    pub fn dataset(&self) -> &Path {
        &self.dataset
    }

    /// Fold index in `[0, F)`.
    #[must_use]
    pub const fn fold(&self) -> u32 {
        self.fold
    }

    /// Fold count F.
    #[must_use]
    pub const fn folds(&self) -> u32 {
        self.folds
    }

    /// Target column selector.
    #[must_use]
    pub const fn target(&self) -> TargetSelector {
        self.target
    }

    /// Evaluation mode.
    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Cluster config location.
    #[must_use]
    pub fn cluster_config(&self) -> Option<&Path> {
        self.cluster_config.as_deref()
    }

    /// Identity of this unit for logs and failure reports.
    #[must_use]
    pub fn key(&self) -> UnitKey {
        UnitKey {
            dataset: self.dataset.to_string_lossy().into_owned(),
            repetition: self.repetition,
            fold: self.fold,
            classifier: self.classifier.clone(),
        }
    }

    /// Encode as one wire line (no trailing newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        let cluster = self
            .cluster_config
            .as_ref()
            .map_or_else(|| NO_CLUSTER_CONFIG.to_string(), |p| p.to_string_lossy().into_owned());
        [
            self.classifier.clone(),
            self.repetition.to_string(),
            self.dataset.to_string_lossy().into_owned(),
            format!("{}/{}", self.fold, self.folds),
            self.target.to_string(),
            self.mode.as_str().to_string(),
            cluster,
        ]
        .join(&UNIT_DELIMITER.to_string())
    }

    /// Parse one wire line.
    ///
    /// # Errors
    ///
    /// Returns `Error::WireFormat` if the field count or any field is invalid.
    pub fn from_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split(UNIT_DELIMITER).collect();
        if fields.len() != UNIT_FIELDS {
            return Err(Error::WireFormat(format!(
                "work unit line has {} fields, expected {UNIT_FIELDS}: {line:?}",
                fields.len()
            )));
        }

        let repetition = fields[1]
            .parse::<u32>()
            .map_err(|e| Error::WireFormat(format!("bad repetition '{}': {e}", fields[1])))?;
        let (fold, folds) = fields[3]
            .split_once('/')
            .ok_or_else(|| Error::WireFormat(format!("bad fold field '{}'", fields[3])))?;
        let fold = fold
            .parse::<u32>()
            .map_err(|e| Error::WireFormat(format!("bad fold index '{fold}': {e}")))?;
        let folds = folds
            .parse::<u32>()
            .map_err(|e| Error::WireFormat(format!("bad fold count '{folds}': {e}")))?;
        let target = fields[4]
            .parse::<TargetSelector>()
            .map_err(|e| Error::WireFormat(e.to_string()))?;
        let mode = fields[5]
            .parse::<EvaluationMode>()
            .map_err(|e| Error::WireFormat(e.to_string()))?;
        let cluster_config = match fields[6] {
            NO_CLUSTER_CONFIG | "" => None,
            path => Some(PathBuf::from(path)),
        };

        Self::new(
            fields[0],
            repetition,
            fields[2],
            fold,
            folds,
            target,
            mode,
            cluster_config,
        )
        .map_err(|e| Error::WireFormat(e.to_string()))
    }
}

/// Identity of a unit: the part of the key block known before evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UnitKey {
    /// Dataset reference.
    pub dataset: String,
    /// Repetition index.
    pub repetition: u32,
    /// Fold index.
    pub fold: u32,
    /// Classifier specification.
    pub classifier: String,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dataset={} run={} fold={} scheme='{}'",
            self.dataset, self.repetition, self.fold, self.classifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> WorkUnit {
        WorkUnit::new(
            "knn -K 3",
            2,
            "data/iris.csv",
            4,
            10,
            TargetSelector::Last,
            EvaluationMode::Classification,
            Some(PathBuf::from("/etc/xval/cluster.json")),
        )
        .unwrap()
    }

    #[test]
    fn test_line_field_order() {
        let line = unit().to_line();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(
            fields,
            vec![
                "knn -K 3",
                "2",
                "data/iris.csv",
                "4/10",
                "last",
                "classification",
                "/etc/xval/cluster.json"
            ]
        );
    }

    #[test]
    fn test_line_parse() {
        let parsed = WorkUnit::from_line(&unit().to_line()).unwrap();
        assert_eq!(parsed, unit());
    }

    #[test]
    fn test_missing_cluster_config_placeholder() {
        let u = WorkUnit::new(
            "zero_r",
            1,
            "a.csv",
            0,
            2,
            TargetSelector::Index(0),
            EvaluationMode::Regression,
            None,
        )
        .unwrap();
        let line = u.to_line();
        assert!(line.ends_with("\t-"));
        assert!(WorkUnit::from_line(&line).unwrap().cluster_config().is_none());
    }

    #[test]
    fn test_parse_rejects_short_line() {
        let err = WorkUnit::from_line("zero_r\t1\ta.csv").unwrap_err();
        assert!(err.to_string().contains("3 fields"));
    }

    #[test]
    fn test_parse_rejects_fold_out_of_range() {
        let err =
            WorkUnit::from_line("zero_r\t1\ta.csv\t5/5\tlast\tclassification\t-").unwrap_err();
        assert!(matches!(err, Error::WireFormat(_)));
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        assert!(WorkUnit::from_line("zero_r\t1\ta.csv\t0/5\tlast\tclustering\t-").is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            unit().key().to_string(),
            "dataset=data/iris.csv run=2 fold=4 scheme='knn -K 3'"
        );
    }
}
