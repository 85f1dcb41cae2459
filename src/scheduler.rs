//! Drives the indexing pipeline from a tokio runtime.
//!
//! Each invocation runs on the blocking pool. When an invocation runs out
//! of time with work left, the worker enqueues a continuation on its own
//! channel instead of looping inside the blocking task.

use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, mpsc};

use crate::{
    embedding_service::EmbeddingService,
    error::{Error, Result},
    indexer::{IndexingPipeline, IndexingStats, Invocation, PipelineOptions},
    store::RecordStore,
    vector_index::VectorIndex,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Everything one indexing invocation needs, shareable across threads.
pub struct IndexingJob {
    pub store: Arc<RecordStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub options: PipelineOptions,
}

impl IndexingJob {
    fn pipeline(&self) -> IndexingPipeline<'_> {
        IndexingPipeline::new(
            &self.store,
            self.index.as_ref(),
            self.embedder.as_ref(),
            self.options,
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    cursor: u64,
    attempt: u32,
}

/// Runs indexing passes one at a time.
pub struct IndexingScheduler {
    max_attempts: u32,
    backoff: Duration,
    worker: Mutex<()>,
}

impl Default for IndexingScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF)
    }
}

impl IndexingScheduler {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            worker: Mutex::new(()),
        }
    }

    /// Process unindexed documents until none remain.
    ///
    /// Retryable failures are retried from the same cursor up to
    /// `max_attempts` times with a fixed backoff; other failures surface
    /// immediately. Concurrent calls queue behind the running pass.
    pub async fn run_until_idle(&self, job: Arc<IndexingJob>) -> Result<IndexingStats> {
        let _worker = self.worker.lock().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        enqueue(&tx, Scheduled { cursor: 0, attempt: 1 })?;

        let mut total = IndexingStats::default();
        while let Some(scheduled) = rx.recv().await {
            let pass = Arc::clone(&job);
            let result = tokio::task::spawn_blocking(move || {
                pass.pipeline().run_invocation(scheduled.cursor)
            })
            .await
            .map_err(|e| Error::Config(format!("indexing task failed: {e}")))?;

            match result {
                Ok(Invocation::Idle(stats)) => {
                    total.absorb(stats);
                    break;
                }
                Ok(Invocation::Continue { stats, cursor }) => {
                    total.absorb(stats);
                    tracing::debug!(cursor, "scheduling indexing continuation");
                    enqueue(&tx, Scheduled { cursor, attempt: 1 })?;
                }
                Err(e) if e.is_retryable() && scheduled.attempt < self.max_attempts => {
                    tracing::warn!(
                        attempt = scheduled.attempt,
                        max_attempts = self.max_attempts,
                        "indexing invocation failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.backoff).await;
                    enqueue(
                        &tx,
                        Scheduled {
                            cursor: scheduled.cursor,
                            attempt: scheduled.attempt + 1,
                        },
                    )?;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            documents = total.documents,
            links = total.token_links,
            embeddings = total.embeddings_created,
            "indexing complete"
        );
        Ok(total)
    }
}

fn enqueue(tx: &mpsc::UnboundedSender<Scheduled>, scheduled: Scheduled) -> Result<()> {
    tx.send(scheduled)
        .map_err(|_| Error::Config("indexing queue closed".to_string()))
}

/// Run the scheduler to completion on a fresh multi-threaded runtime.
pub fn run_blocking(
    scheduler: &IndexingScheduler,
    job: &Arc<IndexingJob>,
) -> Result<IndexingStats> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))?;
    runtime.block_on(scheduler.run_until_idle(Arc::clone(job)))
}
