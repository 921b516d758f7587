//! `xval` - cross-validation experiment runner
//!
//! ## Commands
//!
//! - `run`: evaluate every (classifier, dataset, repetition, fold) unit and
//!   write the reconciled report
//! - `finalize`: write the report of a job whose map phase completed earlier
//! - `plan`: print the work units and shard layout without running anything
//! - `convert`: convert a report between CSV and Parquet

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trueno_xval::config::{ClusterConfig, EvaluationMode, ExperimentSpec, SubstrateKind, TargetSelector};
use trueno_xval::generator::generate;
use trueno_xval::planner::ShardPlan;
use trueno_xval::report::{ReportFormat, ReportTable};
use trueno_xval::runner::{ExperimentRunner, JobSummary, ReportTargets};

#[derive(Parser)]
#[command(name = "xval")]
#[command(author = "Pragmatic AI Labs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parallel k-fold cross-validation with reconciled reports", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and a JSON summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full experiment
    Run {
        #[command(flatten)]
        experiment: ExperimentArgs,

        #[command(flatten)]
        cluster: ClusterArgs,

        /// Report path (comma-delimited)
        #[arg(short, long)]
        output: PathBuf,

        /// Also write a Parquet copy of the report
        #[arg(long)]
        parquet: Option<PathBuf>,

        /// Job directory name under the work directory
        #[arg(long)]
        job_name: Option<String>,
    },

    /// Write the report of a job directory whose map phase completed
    Finalize {
        /// Job directory (contains `_MAPPED`)
        #[arg(long)]
        job_dir: PathBuf,

        /// Report path (comma-delimited)
        #[arg(short, long)]
        output: PathBuf,

        /// Also write a Parquet copy of the report
        #[arg(long)]
        parquet: Option<PathBuf>,

        /// Keep the job directory afterwards
        #[arg(long)]
        keep_intermediate: bool,
    },

    /// Print work units and shard layout
    Plan {
        #[command(flatten)]
        experiment: ExperimentArgs,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Convert a report; formats follow the file extensions
    Convert {
        /// Report to read
        input: PathBuf,

        /// Report to write
        output: PathBuf,
    },
}

#[derive(Args)]
struct ExperimentArgs {
    /// Classifier specification, e.g. "knn -K 3" (repeatable)
    #[arg(short, long = "classifier", required = true)]
    classifiers: Vec<String>,

    /// Dataset file, CSV or Parquet (repeatable)
    #[arg(short, long = "dataset", required = true)]
    datasets: Vec<PathBuf>,

    /// Repetitions (runs)
    #[arg(short, long, default_value = "1")]
    runs: u32,

    /// Folds per repetition
    #[arg(short, long, default_value = "10")]
    folds: u32,

    /// classification or regression
    #[arg(short, long, default_value = "classification")]
    mode: EvaluationMode,

    /// Target column: first, last, default, or a 1-based index
    #[arg(short, long, default_value = "default")]
    target: TargetSelector,

    /// 1-based identifier column reported per test row
    #[arg(long)]
    id_column: Option<usize>,

    /// Report per-row predictions and targets
    #[arg(long)]
    predictions: bool,
}

#[derive(Args)]
struct ClusterArgs {
    /// Cluster configuration (JSON)
    #[arg(long, env = "XVAL_CLUSTER_CONFIG")]
    cluster_config: Option<PathBuf>,

    /// Substrate override: local, rayon or tokio
    #[arg(long)]
    substrate: Option<SubstrateKind>,

    /// Worker count override
    #[arg(short, long)]
    workers: Option<usize>,

    /// Work directory override
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep the job directory after a successful run
    #[arg(long)]
    keep_intermediate: bool,
}

impl ClusterArgs {
    fn load(&self) -> Result<ClusterConfig> {
        let mut config = ClusterConfig::load_or_default(self.cluster_config.as_deref())
            .context("Failed to load cluster configuration")?;
        if let Some(substrate) = self.substrate {
            config.substrate = substrate;
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        config.keep_intermediate |= self.keep_intermediate;
        config.validate()?;
        Ok(config)
    }
}

impl ExperimentArgs {
    fn spec(&self, cluster_config: Option<&Path>) -> Result<ExperimentSpec> {
        let id_column = match self.id_column {
            Some(0) => bail!("--id-column is 1-based"),
            other => other.map(|c| c - 1),
        };
        let mut builder = ExperimentSpec::builder()
            .classifiers(self.classifiers.iter().cloned())
            .datasets(self.datasets.iter().cloned())
            .repetitions(self.runs)
            .folds(self.folds)
            .mode(self.mode)
            .target(self.target)
            .id_column(id_column)
            .predictions(self.predictions);
        if let Some(path) = cluster_config {
            builder = builder.cluster_config(path);
        }
        Ok(builder.build()?)
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel `token` on the first Ctrl+C. The listener owns a single-threaded
/// runtime on a dedicated thread.
fn cancel_on_ctrl_c(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;
    std::thread::Builder::new()
        .name("xval-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Ctrl+C received; cancelling job and discarding its workspace");
                        token.cancel();
                    }
                    Err(e) => warn!(error = %e, "cannot listen for Ctrl+C"),
                }
            });
        })
        .context("Failed to spawn signal listener")?;
    Ok(())
}

fn print_summary(summary: &JobSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Report:       {}", summary.reports.csv.display());
    if let Some(parquet) = &summary.reports.parquet {
        println!("Parquet:      {}", parquet.display());
    }
    println!("Units:        {}", summary.units);
    if let Some(size) = summary.shard_size {
        println!("Shard size:   {size}");
    }
    println!("Shards:       {}", summary.shards);
    println!("Records:      {}", summary.records);
    println!("Failed units: {}", summary.failed_units);
    if summary.workspace_kept {
        println!("Job dir:      {}", summary.job_dir.display());
    }
    println!("Elapsed:      {:.2}s", summary.elapsed_secs);
    Ok(())
}

fn targets(output: PathBuf, parquet: Option<PathBuf>) -> ReportTargets {
    let targets = ReportTargets::csv(output);
    match parquet {
        Some(path) => targets.with_parquet(path),
        None => targets,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Run {
            experiment,
            cluster,
            output,
            parquet,
            job_name,
        } => {
            let config = cluster.load()?;
            let spec = experiment.spec(cluster.cluster_config.as_deref())?;
            let mut runner = ExperimentRunner::new(spec, config);
            if let Some(name) = job_name {
                runner = runner.job_name(name);
            }
            cancel_on_ctrl_c(runner.cancellation_token())?;
            let summary = runner
                .run(&targets(output, parquet))
                .context("Experiment failed")?;
            print_summary(&summary, cli.json)?;
        }

        Commands::Finalize {
            job_dir,
            output,
            parquet,
            keep_intermediate,
        } => {
            let summary =
                ExperimentRunner::finalize(&job_dir, &targets(output, parquet), keep_intermediate)
                    .with_context(|| format!("Failed to finalize {}", job_dir.display()))?;
            print_summary(&summary, cli.json)?;
        }

        Commands::Plan { experiment, cluster } => {
            let config = cluster.load()?;
            let spec = experiment.spec(cluster.cluster_config.as_deref())?;
            let units = generate(&spec, &config)?;
            let plan = ShardPlan::new(&units);
            info!(units = units.len(), shards = plan.len(), "plan computed");
            println!("# units={} shard_size={} shards={}", units.len(), plan.shard_size(), plan.len());
            for unit in &units {
                println!("{}", unit.to_line());
            }
        }

        Commands::Convert { input, output } => {
            let table = ReportTable::read(&input, ReportFormat::from_path(&input))
                .with_context(|| format!("Failed to read report {}", input.display()))?;
            table
                .write(&output, ReportFormat::from_path(&output))
                .with_context(|| format!("Failed to write report {}", output.display()))?;
            println!("Converted {} rows to {}", table.len(), output.display());
        }
    }

    Ok(())
}
