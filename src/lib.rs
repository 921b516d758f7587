//! # Trueno-XVal: Parallel Cross-Validation Experiments
//!
//! **Version**: 0.1.0
//!
//! Trueno-XVal evaluates every (classifier, dataset, repetition, fold)
//! combination of an experiment as an independent work unit on a pluggable
//! parallel substrate, then reconciles the heterogeneous result records into
//! one report.
//!
//! ## Pipeline
//!
//! ```text
//! generator -> planner -> evaluator (parallel) -> collector -> reconcile -> report
//! ```
//!
//! - **Deterministic splits**: every fold of a repetition shares one
//!   shuffle, seeded by the repetition index
//! - **Unit isolation**: a failing unit is logged and contributes no row;
//!   the job carries on
//! - **Resumable finalization**: once the map phase completes, the report
//!   can be (re)written from the job workspace
//! - **Cancellation**: a cancelled job stops between units and discards its
//!   workspace
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_xval::config::{ClusterConfig, ExperimentSpec};
//! use trueno_xval::runner::{ExperimentRunner, ReportTargets};
//!
//! let spec = ExperimentSpec::builder()
//!     .classifier("zero_r")
//!     .classifier("knn -K 3")
//!     .dataset("data/iris.csv")
//!     .repetitions(10)
//!     .folds(10)
//!     .build()?;
//!
//! let runner = ExperimentRunner::new(spec, ClusterConfig::default());
//! let summary = runner.run(&ReportTargets::csv("iris-report.csv"))?;
//! println!("{} rows, {} failed units", summary.records, summary.failed_units);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod classifier;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod planner;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod runner;
pub mod split;
pub mod stats;
pub mod substrate;
pub mod unit;
pub mod workspace;

pub use error::{Error, Result};
