//! Experiment Runner
//!
//! Drives one job through its phases:
//!
//! 1. generate work units (configuration errors are fatal here, before any
//!    workspace exists)
//! 2. plan shards and write them into a fresh job workspace
//! 3. run every shard on the configured substrate
//! 4. record the map phase as complete (`_MAPPED`)
//! 5. collect, reconcile and write the report
//!
//! Phases 1-4 and phase 5 are independently resumable: a job whose report
//! could not be written keeps its mapped workspace, and
//! [`ExperimentRunner::finalize`] can be run against it later.
//!
//! Cancelling the runner's token during phases 2-4 stops the substrate at
//! the next unit boundary; the run fails with `Error::Cancelled` and the
//! unmapped workspace is discarded.

use crate::classifier::ClassifierRegistry;
use crate::collector::collect;
use crate::config::{ClusterConfig, ExperimentSpec};
use crate::evaluator::{EvaluatorOptions, UnitEvaluator};
use crate::generator::generate;
use crate::planner::ShardPlan;
use crate::reconcile::reconcile;
use crate::report::ReportFormat;
use crate::substrate::{self, ShardTask};
use crate::workspace::{default_job_name, JobWorkspace};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where the report goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportTargets {
    /// Comma-delimited report.
    pub csv: PathBuf,
    /// Optional Parquet copy.
    pub parquet: Option<PathBuf>,
}

impl ReportTargets {
    /// CSV only.
    #[must_use]
    pub fn csv(path: impl Into<PathBuf>) -> Self {
        Self {
            csv: path.into(),
            parquet: None,
        }
    }

    /// Also write a Parquet copy.
    #[must_use]
    pub fn with_parquet(mut self, path: impl Into<PathBuf>) -> Self {
        self.parquet = Some(path.into());
        self
    }
}

/// Outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    /// Job workspace directory.
    pub job_dir: PathBuf,
    /// Units generated; for a resumed finalization, records plus failures.
    pub units: usize,
    /// Units per shard, when this run planned the job.
    pub shard_size: Option<usize>,
    /// Shards completed.
    pub shards: usize,
    /// Report rows.
    pub records: usize,
    /// Units that produced no record.
    pub failed_units: usize,
    /// Files written.
    pub reports: ReportTargets,
    /// True if the workspace was left on disk.
    pub workspace_kept: bool,
    /// Wall-clock seconds.
    pub elapsed_secs: f64,
}

/// Runs experiments end to end.
#[derive(Debug)]
pub struct ExperimentRunner {
    spec: ExperimentSpec,
    cluster: ClusterConfig,
    evaluator: Arc<UnitEvaluator>,
    job_name: Option<String>,
    cancel: CancellationToken,
}

impl ExperimentRunner {
    /// Runner with the built-in classifiers.
    #[must_use]
    pub fn new(spec: ExperimentSpec, cluster: ClusterConfig) -> Self {
        Self::with_registry(spec, cluster, ClassifierRegistry::with_builtins())
    }

    /// Runner resolving classifiers through `registry`.
    #[must_use]
    pub fn with_registry(spec: ExperimentSpec, cluster: ClusterConfig, registry: ClassifierRegistry) -> Self {
        let options = EvaluatorOptions {
            id_column: spec.id_column(),
            predictions: spec.predictions(),
        };
        let evaluator = UnitEvaluator::new(registry, options).with_cluster(cluster.clone());
        Self {
            spec,
            cluster,
            evaluator: Arc::new(evaluator),
            job_name: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the job when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this runner's jobs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Name the job directory instead of deriving one from the clock.
    #[must_use]
    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    /// Experiment being run.
    #[must_use]
    pub const fn spec(&self) -> &ExperimentSpec {
        &self.spec
    }

    /// Cluster configuration in effect.
    #[must_use]
    pub const fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Run every phase.
    ///
    /// # Errors
    ///
    /// Configuration errors abort before any work is dispatched. Substrate
    /// errors and `Error::Cancelled` abort and discard the workspace.
    /// Finalization errors keep the mapped workspace for
    /// [`ExperimentRunner::finalize`].
    pub fn run(&self, targets: &ReportTargets) -> Result<JobSummary> {
        let started = Instant::now();
        let units = generate(&self.spec, &self.cluster)?;
        let plan = ShardPlan::new(&units);
        info!(
            units = units.len(),
            shard_size = plan.shard_size(),
            shards = plan.len(),
            "job planned"
        );

        let job_name = self.job_name.clone().unwrap_or_else(default_job_name);
        let mut workspace = JobWorkspace::create(&self.cluster.work_dir, &job_name)?;
        let inputs = workspace.write_shards(&plan)?;

        let substrate = substrate::build(&self.cluster)?;
        let task: Arc<dyn ShardTask> = Arc::clone(&self.evaluator) as Arc<dyn ShardTask>;
        let outputs = substrate.submit(inputs, task, &self.cancel).map_err(|e| {
            error!(error = %e, "distributed phase failed");
            e
        })?;
        if self.cancel.is_cancelled() {
            warn!("job cancelled after its last shard; discarding workspace");
            return Err(Error::Cancelled);
        }
        workspace.mark_mapped(&outputs)?;

        let evaluated: usize = outputs.iter().map(|o| o.summary.units).sum();
        info!(shards = outputs.len(), units = evaluated, "distributed phase complete");

        let mut summary = finish(workspace, targets, self.cluster.keep_intermediate, started)?;
        summary.units = units.len();
        summary.shard_size = Some(plan.shard_size());
        Ok(summary)
    }

    /// Finalize a mapped job directory left by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns `Error::Workspace` if `job_dir` was never mapped, or any
    /// collection, reconciliation or report-writing error.
    pub fn finalize(job_dir: &Path, targets: &ReportTargets, keep_intermediate: bool) -> Result<JobSummary> {
        let started = Instant::now();
        let workspace = JobWorkspace::open(job_dir)?;
        info!(dir = %job_dir.display(), "resuming finalization");
        finish(workspace, targets, keep_intermediate, started)
    }
}

fn finish(
    workspace: JobWorkspace,
    targets: &ReportTargets,
    keep_intermediate: bool,
    started: Instant,
) -> Result<JobSummary> {
    let job_dir = workspace.root().to_path_buf();
    let result = write_reports(&workspace, targets);
    let (shards, records, failed_units) = match result {
        Ok(counts) => counts,
        Err(e) => {
            error!(
                error = %e,
                dir = %job_dir.display(),
                "finalization failed; the mapped workspace is kept for a later finalize"
            );
            return Err(e);
        }
    };

    let workspace_kept = keep_intermediate;
    if !keep_intermediate {
        if let Err(e) = workspace.remove() {
            warn!(error = %e, dir = %job_dir.display(), "cannot remove job workspace");
        }
    }

    let summary = JobSummary {
        job_dir,
        units: records + failed_units,
        shard_size: None,
        shards,
        records,
        failed_units,
        reports: targets.clone(),
        workspace_kept,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    info!(
        records = summary.records,
        failed_units = summary.failed_units,
        report = %summary.reports.csv.display(),
        "job complete"
    );
    Ok(summary)
}

fn write_reports(workspace: &JobWorkspace, targets: &ReportTargets) -> Result<(usize, usize, usize)> {
    let shards = workspace.completed_shards()?.len();
    let collected = collect(workspace)?;
    if collected.records.is_empty() && !collected.failures.is_empty() {
        return Err(Error::Evaluation(format!(
            "all {} units failed; see {}/failures",
            collected.failures.len(),
            workspace.root().display()
        )));
    }
    for failure in &collected.failures {
        warn!(key = %failure.key, error = %failure.error, "unit has no report row");
    }

    let table = reconcile(&collected.records)?;
    table.write(&targets.csv, ReportFormat::Csv)?;
    if let Some(parquet) = &targets.parquet {
        table.write(parquet, ReportFormat::Parquet)?;
    }
    Ok((shards, collected.records.len(), collected.failures.len()))
}
