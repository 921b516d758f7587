//! Experiment and cluster configuration
//!
//! `ExperimentSpec` is built once from caller input and never mutated
//! afterwards. `ClusterConfig` is the JSON document whose location travels
//! with every work unit, so a worker can rebuild its view of the cluster
//! without talking to the driver.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a trained model is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Nominal target; accuracy, kappa, IR and ROC figures.
    Classification,
    /// Numeric target; error and correlation figures.
    Regression,
}

impl EvaluationMode {
    /// Wire flag for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" | "c" => Ok(Self::Classification),
            "regression" | "r" => Ok(Self::Regression),
            other => Err(Error::InvalidConfig(format!(
                "unknown evaluation mode '{other}' (expected classification or regression)"
            ))),
        }
    }
}

/// Which dataset column holds the target.
///
/// Explicit indices are 0-based in memory and 1-based in their textual form,
/// so `"3"` selects the third column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetSelector {
    /// First column.
    First,
    /// Last column.
    Last,
    /// Explicit 0-based column index.
    Index(usize),
    /// Whatever the dataset declares; delimited and Parquet files declare
    /// nothing, so this falls back to the last column.
    #[default]
    Default,
}

impl TargetSelector {
    /// Resolve against a dataset with `num_columns` columns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dataset` if the dataset has no columns or an explicit
    /// index is out of range.
    pub fn resolve(self, num_columns: usize) -> Result<usize> {
        if num_columns == 0 {
            return Err(Error::Dataset("dataset has no columns".to_string()));
        }
        match self {
            Self::First => Ok(0),
            Self::Last | Self::Default => Ok(num_columns - 1),
            Self::Index(idx) if idx < num_columns => Ok(idx),
            Self::Index(idx) => Err(Error::Dataset(format!(
                "target column {} out of range (dataset has {num_columns} columns)",
                idx + 1
            ))),
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Last => f.write_str("last"),
            Self::Default => f.write_str("default"),
            Self::Index(idx) => write!(f, "{}", idx + 1),
        }
    }
}

impl FromStr for TargetSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "default" | "" => Ok(Self::Default),
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(Self::Index(n - 1)),
                _ => Err(Error::InvalidConfig(format!(
                    "invalid target selector '{other}' (expected first, last, default or a 1-based index)"
                ))),
            },
        }
    }
}

/// Immutable experiment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSpec {
    classifiers: Vec<String>,
    datasets: Vec<PathBuf>,
    repetitions: u32,
    folds: u32,
    mode: EvaluationMode,
    target: TargetSelector,
    id_column: Option<usize>,
    predictions: bool,
    cluster_config: Option<PathBuf>,
}

impl ExperimentSpec {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ExperimentSpecBuilder {
        ExperimentSpecBuilder::default()
    }

    /// Classifier specifications, in caller order.
    #[must_use]
    pub fn classifiers(&self) -> &[String] {
        &self.classifiers
    }

    /// Dataset references, in caller order.
    #[must_use]
    pub fn datasets(&self) -> &[PathBuf] {
        &self.datasets
    }

    /// Repetition count R.
    #[must_use]
    pub const fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Fold count F.
    #[must_use]
    pub const fn folds(&self) -> u32 {
        self.folds
    }

    /// Evaluation mode.
    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Target column selector.
    #[must_use]
    pub const fn target(&self) -> TargetSelector {
        self.target
    }

    /// 0-based identifier column, when row-level provenance is wanted.
    #[must_use]
    pub const fn id_column(&self) -> Option<usize> {
        self.id_column
    }

    /// Whether per-row predictions and targets are attached to records.
    #[must_use]
    pub const fn predictions(&self) -> bool {
        self.predictions
    }

    /// Cluster configuration location forwarded to workers.
    #[must_use]
    pub fn cluster_config(&self) -> Option<&Path> {
        self.cluster_config.as_deref()
    }

    /// Total number of work units this spec expands to.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.classifiers.len()
            * self.repetitions as usize
            * self.datasets.len()
            * self.folds as usize
    }
}

/// Builder for `ExperimentSpec`.
#[derive(Debug, Default)]
pub struct ExperimentSpecBuilder {
    classifiers: Vec<String>,
    datasets: Vec<PathBuf>,
    repetitions: Option<u32>,
    folds: Option<u32>,
    mode: Option<EvaluationMode>,
    target: TargetSelector,
    id_column: Option<usize>,
    predictions: bool,
    cluster_config: Option<PathBuf>,
}

impl ExperimentSpecBuilder {
    /// Append a classifier specification (`"knn -K 3"`).
    #[must_use]
    pub fn classifier(mut self, spec: impl Into<String>) -> Self {
        self.classifiers.push(spec.into());
        self
    }

    /// Append several classifier specifications.
    #[must_use]
    pub fn classifiers<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifiers.extend(specs.into_iter().map(Into::into));
        self
    }

    /// Append a dataset reference.
    #[must_use]
    pub fn dataset(mut self, path: impl Into<PathBuf>) -> Self {
        self.datasets.push(path.into());
        self
    }

    /// Append several dataset references.
    #[must_use]
    pub fn datasets<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.datasets.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Repetition count (default 1).
    #[must_use]
    pub const fn repetitions(mut self, runs: u32) -> Self {
        self.repetitions = Some(runs);
        self
    }

    /// Fold count (default 10).
    #[must_use]
    pub const fn folds(mut self, folds: u32) -> Self {
        self.folds = Some(folds);
        self
    }

    /// Evaluation mode (default classification).
    #[must_use]
    pub const fn mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Target column selector.
    #[must_use]
    pub const fn target(mut self, target: TargetSelector) -> Self {
        self.target = target;
        self
    }

    /// 0-based identifier column.
    #[must_use]
    pub const fn id_column(mut self, column: Option<usize>) -> Self {
        self.id_column = column;
        self
    }

    /// Attach per-row predictions and targets.
    #[must_use]
    pub const fn predictions(mut self, enabled: bool) -> Self {
        self.predictions = enabled;
        self
    }

    /// Cluster configuration location.
    #[must_use]
    pub fn cluster_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.cluster_config = Some(path.into());
        self
    }

    /// Validate and build the spec.
    ///
    /// Dataset existence is checked by the generator, not here.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for empty classifier or dataset lists,
    /// zero repetitions or folds, or text fields that would break the
    /// tab-delimited work-unit line.
    pub fn build(self) -> Result<ExperimentSpec> {
        let repetitions = self.repetitions.unwrap_or(1);
        let folds = self.folds.unwrap_or(10);

        if self.classifiers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one classifier specification is required".to_string(),
            ));
        }
        if self.datasets.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one dataset is required".to_string(),
            ));
        }
        if repetitions == 0 {
            return Err(Error::InvalidConfig("run count must be >= 1".to_string()));
        }
        if folds == 0 {
            return Err(Error::InvalidConfig("fold count must be >= 1".to_string()));
        }
        for spec in &self.classifiers {
            if spec.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "empty classifier specification".to_string(),
                ));
            }
            ensure_wire_safe("classifier specification", spec)?;
        }
        for path in &self.datasets {
            ensure_wire_safe("dataset path", &path.to_string_lossy())?;
        }
        if let Some(path) = &self.cluster_config {
            ensure_wire_safe("cluster config path", &path.to_string_lossy())?;
        }

        Ok(ExperimentSpec {
            classifiers: self.classifiers,
            datasets: self.datasets,
            repetitions,
            folds,
            mode: self.mode.unwrap_or(EvaluationMode::Classification),
            target: self.target,
            id_column: self.id_column,
            predictions: self.predictions,
            cluster_config: self.cluster_config,
        })
    }
}

fn ensure_wire_safe(what: &str, value: &str) -> Result<()> {
    if value.contains(['\t', '\n', '\r']) {
        return Err(Error::InvalidConfig(format!(
            "{what} must not contain tabs or line breaks: {value:?}"
        )));
    }
    Ok(())
}

/// Execution substrate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstrateKind {
    /// Sequential, in-process.
    Local,
    /// Rayon work-stealing pool.
    Rayon,
    /// Tokio blocking pool with a bounded output channel.
    Tokio,
}

impl Default for SubstrateKind {
    fn default() -> Self {
        if cfg!(feature = "rayon") {
            Self::Rayon
        } else {
            Self::Local
        }
    }
}

impl FromStr for SubstrateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "rayon" => Ok(Self::Rayon),
            "tokio" => Ok(Self::Tokio),
            other => Err(Error::InvalidConfig(format!(
                "unknown substrate '{other}' (expected local, rayon or tokio)"
            ))),
        }
    }
}

/// Default bounded capacity for in-flight shard outputs
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2;

/// Cluster configuration (JSON).
///
/// ```json
/// { "substrate": "rayon", "workers": 8, "work_dir": "/scratch/xval" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Which substrate executes shards.
    pub substrate: SubstrateKind,
    /// Worker threads; `None` lets the substrate decide.
    pub workers: Option<usize>,
    /// Root directory for per-job workspaces.
    pub work_dir: PathBuf,
    /// Base directory for relative dataset references.
    pub data_root: Option<PathBuf>,
    /// Bounded in-flight shard outputs (tokio substrate).
    pub channel_capacity: usize,
    /// Keep the job workspace after a successful finalization.
    pub keep_intermediate: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            substrate: SubstrateKind::default(),
            workers: None,
            work_dir: std::env::temp_dir().join("trueno-xval"),
            data_root: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            keep_intermediate: false,
        }
    }
}

impl ClusterConfig {
    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if it sets
    /// zero workers or a zero channel capacity.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "cannot read cluster config {}: {e}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidConfig(format!(
                "cannot parse cluster config {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise defaults.
    ///
    /// # Errors
    ///
    /// See [`ClusterConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` on zero workers or zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::InvalidConfig("workers must be >= 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel_capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a dataset reference against `data_root`.
    #[must_use]
    pub fn resolve_dataset(&self, reference: &Path) -> PathBuf {
        match &self.data_root {
            Some(root) if reference.is_relative() => root.join(reference),
            _ => reference.to_path_buf(),
        }
    }
}
