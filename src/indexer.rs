//! Indexing pipeline: drains the backlog of unembedded messages in bounded
//! batches and commits vectors atomically. Driven by the nightly schedule
//! and the manual sync command.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::embeddings::Embedder;
use crate::error::CoreResult;
use crate::models::ChatMessage;
use crate::store::Store;

/// Pause between batches to respect external rate caps.
const BATCH_PAUSE: Duration = Duration::from_millis(100);

pub struct SyncJob {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_messages: usize,
}

impl SyncJob {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        max_messages: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size,
            max_messages,
        }
    }

    /// One bounded run: at most `max_messages` rows, oldest first. A batch
    /// whose embedding call fails is skipped; the run continues with the
    /// next batch. Returns the number of rows actually indexed.
    pub async fn run(&self) -> CoreResult<usize> {
        let started = std::time::Instant::now();

        let backlog = self.store.drain_unindexed(self.max_messages).await?;
        if backlog.is_empty() {
            info!("no unindexed messages found");
            return Ok(0);
        }

        info!(count = backlog.len(), "found unindexed messages, starting sync");

        let mut total_indexed = 0usize;
        let mut first = true;
        for batch in backlog.chunks(self.batch_size) {
            if !first {
                sleep(BATCH_PAUSE).await;
            }
            first = false;

            match self.process_batch(batch).await {
                Ok(indexed) => total_indexed += indexed,
                Err(e) => {
                    error!(batch_size = batch.len(), error = %e, "batch failed, continuing with next");
                }
            }
        }

        info!(
            total_indexed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync run completed"
        );
        Ok(total_indexed)
    }

    async fn process_batch(&self, batch: &[ChatMessage]) -> CoreResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        let texts: Vec<String> = batch.iter().map(|m| m.body.clone()).collect();

        let embeddings = self.embedder.embed_many(&texts).await?;
        let updated = self.store.attach_embeddings_batch(&ids, &embeddings).await?;

        if updated != ids.len() {
            warn!(
                expected = ids.len(),
                updated, "batch attach updated fewer rows than expected"
            );
        }

        Ok(updated)
    }
}
