//! Rayon thread-pool substrate.

use super::{run_shard, ShardInput, ShardOutput, ShardTask, Substrate};
use crate::{Error, Result};
use std::sync::mpsc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs shards on a dedicated rayon pool, one task per shard.
#[derive(Debug)]
pub struct RayonSubstrate {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl RayonSubstrate {
    /// Pool with `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns `Error::Substrate` if the pool cannot be built.
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("xval-worker-{i}"))
            .build()
            .map_err(|e| Error::Substrate(format!("cannot start rayon pool: {e}")))?;
        Ok(Self { pool, workers })
    }
}

impl Substrate for RayonSubstrate {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn submit(
        &self,
        shards: Vec<ShardInput>,
        task: Arc<dyn ShardTask>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShardOutput>> {
        let expected = shards.len();
        let (tx, rx) = mpsc::channel();

        self.pool.scope(|scope| {
            for input in shards {
                let tx = tx.clone();
                let task = Arc::clone(&task);
                scope.spawn(move |_| {
                    let result = run_shard(task.as_ref(), &input, cancel)
                        .map(|summary| ShardOutput { input, summary });
                    // Receiver outlives the scope.
                    let _ = tx.send(result);
                });
            }
        });
        drop(tx);

        let mut outputs = Vec::with_capacity(expected);
        for result in rx {
            outputs.push(result?);
        }
        Ok(outputs)
    }
}
