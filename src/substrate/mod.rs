//! Parallel execution substrate
//!
//! A substrate runs one shard task per shard, with as many shards in
//! flight as it has workers, and hands back the per-shard outputs in the
//! order they completed. Any shard error aborts the job.
//!
//! Every submission carries a `CancellationToken`. Once it is cancelled no
//! further shard starts, running shards stop at their next unit boundary,
//! and `submit` returns `Error::Cancelled`.
//!
//! Implementations:
//! - [`LocalSubstrate`]: sequential, in the calling thread (tests, debugging)
//! - `RayonSubstrate`: dedicated rayon thread pool (feature `rayon`)
//! - `TokioSubstrate`: tokio runtime with blocking workers and a bounded
//!   result channel (feature `tokio`)

#[cfg(feature = "rayon")]
mod rayon_pool;
#[cfg(feature = "tokio")]
mod tokio_pool;

#[cfg(feature = "rayon")]
pub use rayon_pool::RayonSubstrate;
#[cfg(feature = "tokio")]
pub use tokio_pool::TokioSubstrate;

use crate::config::{ClusterConfig, SubstrateKind};
use crate::evaluator::ShardSummary;
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Files belonging to one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInput {
    /// Shard index in plan order.
    pub index: usize,
    /// Unit lines to evaluate.
    pub units: PathBuf,
    /// Destination for data/header line pairs.
    pub results: PathBuf,
    /// Destination for failure records.
    pub failures: PathBuf,
}

/// Completed shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutput {
    /// Shard that produced this output.
    pub input: ShardInput,
    /// Unit tallies.
    pub summary: ShardSummary,
}

/// Work run once per shard.
pub trait ShardTask: Send + Sync {
    /// Process one shard.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole job. Implementations should return
    /// `Error::Cancelled` promptly once `cancel` fires.
    fn run(&self, shard: &ShardInput, cancel: &CancellationToken) -> Result<ShardSummary>;
}

/// Runs shard tasks.
pub trait Substrate: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Worker count.
    fn workers(&self) -> usize;

    /// Run `task` over every shard; outputs are in completion order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Substrate` if any shard fails, or `Error::Cancelled`
    /// if `cancel` fired before every shard completed.
    fn submit(
        &self,
        shards: Vec<ShardInput>,
        task: Arc<dyn ShardTask>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShardOutput>>;
}

/// Sequential substrate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSubstrate;

impl Substrate for LocalSubstrate {
    fn name(&self) -> &'static str {
        "local"
    }

    fn workers(&self) -> usize {
        1
    }

    fn submit(
        &self,
        shards: Vec<ShardInput>,
        task: Arc<dyn ShardTask>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShardOutput>> {
        let mut outputs = Vec::with_capacity(shards.len());
        for input in shards {
            let summary = run_shard(task.as_ref(), &input, cancel)?;
            outputs.push(ShardOutput { input, summary });
        }
        Ok(outputs)
    }
}

/// Run one shard, tagging any error other than cancellation with the shard
/// index.
pub(crate) fn run_shard(
    task: &dyn ShardTask,
    input: &ShardInput,
    cancel: &CancellationToken,
) -> Result<ShardSummary> {
    if cancel.is_cancelled() {
        debug!(shard = input.index, "shard skipped; job cancelled");
        return Err(Error::Cancelled);
    }
    debug!(shard = input.index, "shard started");
    let summary = task.run(input, cancel).map_err(|e| match e {
        Error::Cancelled => Error::Cancelled,
        other => Error::Substrate(format!("shard {} failed: {other}", input.index)),
    })?;
    debug!(
        shard = input.index,
        records = summary.records,
        failures = summary.failures,
        "shard finished"
    );
    Ok(summary)
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Build the substrate named by `config`.
///
/// # Errors
///
/// Returns `Error::Substrate` if the worker pool cannot be created, or
/// `Error::InvalidConfig` if the requested kind was compiled out.
pub fn build(config: &ClusterConfig) -> Result<Box<dyn Substrate>> {
    let workers = config.workers.unwrap_or_else(default_workers).max(1);
    let substrate: Box<dyn Substrate> = match config.substrate {
        SubstrateKind::Local => Box::new(LocalSubstrate),
        #[cfg(feature = "rayon")]
        SubstrateKind::Rayon => Box::new(RayonSubstrate::new(workers)?),
        #[cfg(feature = "tokio")]
        SubstrateKind::Tokio => Box::new(TokioSubstrate::new(workers, config.channel_capacity)?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(Error::InvalidConfig(format!(
                "substrate '{other:?}' is not compiled into this build"
            )))
        }
    };
    info!(substrate = substrate.name(), workers = substrate.workers(), "substrate ready");
    Ok(substrate)
}
