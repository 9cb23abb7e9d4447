//! Store facade. The backing service is a relational store with an
//! ANN-capable vector column, reached over HTTP; everything else in the
//! core sees only this trait.

pub mod postgrest;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::CoreResult;
use crate::models::{
    ChatMessage, DailyDigest, NewMessage, QuotaUsage, RequestLog, SearchHit, Tier,
    UserMessageCount,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Connectivity probe used at startup. Unreachable store is fatal.
    async fn ping(&self) -> CoreResult<()>;

    /// Persists one message. Idempotent on (chat_scope_id, message_id):
    /// duplicates are silently absorbed.
    async fn record_message(&self, msg: &NewMessage) -> CoreResult<()>;

    /// Unindexed rows, oldest first, capped at `limit`.
    async fn drain_unindexed(&self, limit: usize) -> CoreResult<Vec<ChatMessage>>;

    /// Atomically sets the embedding, the indexed flag and indexed_at.
    async fn attach_embedding(&self, row_id: i64, embedding: &[f32]) -> CoreResult<()>;

    /// Attaches each (id, vector) pair independently; returns the number of
    /// rows actually updated so partial success is visible to the caller.
    async fn attach_embeddings_batch(
        &self,
        row_ids: &[i64],
        embeddings: &[Vec<f32>],
    ) -> CoreResult<usize>;

    /// Approximate nearest-neighbour search scoped to one chat, filtered to
    /// cosine similarity >= floor, ordered by decreasing similarity.
    async fn search(
        &self,
        query: &[f32],
        floor: f64,
        k: usize,
        chat_scope_id: i64,
    ) -> CoreResult<Vec<SearchHit>>;

    /// All messages whose civil day in the configured zone equals `date`,
    /// ordered by created_at ascending.
    async fn messages_for_civil_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Vec<ChatMessage>>;

    /// Author with the most messages that day; ties break to the smallest
    /// author id.
    async fn most_active_for_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Option<UserMessageCount>>;

    /// Counters for (author, date); missing row reads as zeros.
    async fn quota_get(&self, author_id: i64, date: NaiveDate) -> CoreResult<QuotaUsage>;

    /// Atomic insert-or-bump of the named tier counter.
    async fn quota_increment(&self, author_id: i64, date: NaiveDate, tier: Tier) -> CoreResult<()>;

    /// Upsert on (chat_scope_id, civil_date); regeneration overwrites.
    async fn digest_upsert(&self, digest: &DailyDigest) -> CoreResult<()>;

    async fn digest_exists(&self, chat_scope_id: i64, date: NaiveDate) -> CoreResult<bool>;

    /// Appends one request-log row.
    async fn log_request(&self, entry: &RequestLog) -> CoreResult<()>;

    /// All-time request count for one author (stats command).
    async fn count_requests(&self, author_id: i64) -> CoreResult<i64>;
}

const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(500), Duration::from_secs(1)];

/// Runs `attempt` up to three times, sleeping 500 ms and 1 s between tries.
/// Only transient failures are retried.
pub(crate) async fn with_retry<T, Fut, F>(operation: &str, mut attempt: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    for (tries, backoff) in RETRY_BACKOFF.iter().enumerate() {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(operation, attempt = tries + 1, error = %e, "retrying store operation");
                tokio::time::sleep(*backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
    match attempt().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(operation, error = %e, "store operation failed after retries");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::Transient("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_conflicts() {
        let calls = AtomicUsize::new(0);
        let result: CoreResult<()> = with_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Conflict("duplicate".into())) }
        })
        .await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicUsize::new(0);
        let result: CoreResult<()> = with_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(CoreError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
