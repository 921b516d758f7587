//! Tokio substrate: shard tasks on the blocking pool, gated by a semaphore,
//! reporting through a bounded channel.

use super::{run_shard, ShardInput, ShardOutput, ShardTask, Substrate};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Tokio-backed substrate owning its runtime.
#[derive(Debug)]
pub struct TokioSubstrate {
    runtime: Runtime,
    workers: usize,
    capacity: usize,
}

impl TokioSubstrate {
    /// Runtime allowing `workers` concurrent shards and `capacity`
    /// undelivered outputs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Substrate` if the runtime cannot be built.
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.clamp(1, 4))
            .max_blocking_threads(workers.max(1))
            .thread_name("xval-tokio")
            .enable_all()
            .build()
            .map_err(|e| Error::Substrate(format!("cannot start tokio runtime: {e}")))?;
        Ok(Self {
            runtime,
            workers: workers.max(1),
            capacity: capacity.max(1),
        })
    }
}

impl Substrate for TokioSubstrate {
    fn name(&self) -> &'static str {
        "tokio"
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
        let workers = self.workers;
        let capacity = self.capacity;
        let cancel = cancel.clone();

        self.runtime.block_on(async move {
            let (tx, mut rx) = mpsc::channel::<Result<ShardOutput>>(capacity);
            let permits = Arc::new(Semaphore::new(workers));

            let dispatch_cancel = cancel.clone();
            let dispatcher = tokio::spawn(async move {
                for input in shards {
                    let permit = tokio::select! {
                        () = dispatch_cancel.cancelled() => break,
                        permit = Arc::clone(&permits).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    let tx = tx.clone();
                    let task = Arc::clone(&task);
                    let cancel = dispatch_cancel.clone();
                    tokio::spawn(async move {
                        let index = input.index;
                        let joined = tokio::task::spawn_blocking(move || {
                            run_shard(task.as_ref(), &input, &cancel)
                                .map(|summary| ShardOutput { input, summary })
                        })
                        .await;
                        let result = joined.unwrap_or_else(|e| {
                            Err(Error::Substrate(format!("shard {index} worker died: {e}")))
                        });
                        if tx.send(result).await.is_err() {
                            warn!(shard = index, "result channel closed");
                        }
                        drop(permit);
                    });
                }
            });

            let mut outputs = Vec::with_capacity(expected);
            let mut failure = None;
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(output) => outputs.push(output),
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }
            dispatcher
                .await
                .map_err(|e| Error::Substrate(format!("dispatcher died: {e}")))?;
            if let Some(e) = failure {
                return Err(e);
            }
            // Shards left undispatched after a cancellation report nothing.
            if cancel.is_cancelled() && outputs.len() < expected {
                return Err(Error::Cancelled);
            }
            Ok(outputs)
        })
    }
}
