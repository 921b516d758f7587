//! Error types for trueno-xval
//!
//! Configuration errors surface before any shard is dispatched. Evaluation
//! errors are recovered per unit by the evaluator; everything else aborts the
//! phase it occurs in.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-xval error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment or cluster configuration rejected before dispatch
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dataset reference does not resolve to an existing file
    #[error("Dataset not found: {}\nCheck the path or the cluster config data_root", .0.display())]
    DatasetNotFound(PathBuf),

    /// Dataset could not be parsed or is unusable for the requested mode
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Classifier specification could not be resolved or instantiated
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Training or evaluation of a single work unit failed
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Malformed work-unit line or shard output
    #[error("Wire format error: {0}")]
    WireFormat(String),

    /// Result records cannot be reconciled into one table
    #[error("Schema error: {0}")]
    Schema(String),

    /// Execution substrate failed (worker crash, join failure)
    #[error("Substrate error: {0}\nThe job was aborted and its intermediate artifacts discarded")]
    Substrate(String),

    /// Job workspace could not be created, read or committed
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Job was cancelled before its map phase completed
    #[error("Job cancelled\nThe job was aborted and its intermediate artifacts discarded")]
    Cancelled,
}
