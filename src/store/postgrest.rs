//! PostgREST-backed store client: plain table reads/writes under
//! `/rest/v1/<table>` and stored procedures under `/rest/v1/rpc/<fn>`.

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::civil;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ChatMessage, DailyDigest, NewMessage, QuotaUsage, RequestLog, SearchHit, Tier,
    UserMessageCount,
};
use crate::store::{with_retry, Store};

pub struct PostgrestStore {
    http: reqwest::Client,
    base_url: String,
    timezone: Tz,
}

impl PostgrestStore {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64, timezone: Tz) -> CoreResult<Self> {
        let mut headers = HeaderMap::new();
        let key_value = HeaderValue::from_str(api_key)
            .map_err(|_| CoreError::Config("store key contains invalid characters".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CoreError::Config("store key contains invalid characters".into()))?;
        headers.insert("apikey", key_value);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build store client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timezone,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.base_url)
    }

    async fn rpc<R: DeserializeOwned>(
        &self,
        function: &str,
        params: serde_json::Value,
    ) -> CoreResult<R> {
        let response = self
            .http
            .post(self.rpc_url(function))
            .json(&params)
            .send()
            .await
            .map_err(map_request_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| CoreError::Protocol(format!("rpc {function}: malformed response: {e}")))
    }

    async fn insert(
        &self,
        table: &str,
        row: serde_json::Value,
        prefer: &str,
        query: &[(&str, &str)],
    ) -> CoreResult<()> {
        let response = self
            .http
            .post(self.table_url(table))
            .header("Prefer", prefer)
            .query(query)
            .json(&row)
            .send()
            .await
            .map_err(map_request_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn try_record_message(&self, msg: &NewMessage) -> CoreResult<()> {
        let row = serde_json::to_value(msg)
            .map_err(|e| CoreError::InvalidArgument(format!("unserializable message: {e}")))?;
        match self.insert("messages", row, "return=minimal", &[]).await {
            // Duplicate (chat_scope_id, message_id): already captured.
            Err(CoreError::Conflict(_)) => {
                debug!(
                    message_id = msg.message_id,
                    chat_scope_id = msg.chat_scope_id,
                    "message already recorded, skipping"
                );
                Ok(())
            }
            other => other,
        }
    }

    async fn try_attach_embedding(&self, row_id: i64, embedding: &[f32]) -> CoreResult<()> {
        let updated: serde_json::Value = self
            .rpc(
                "attach_embedding",
                json!({ "p_row_id": row_id, "p_embedding": embedding }),
            )
            .await?;
        if rpc_row_found(&updated) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("message row {row_id}")))
        }
    }

    async fn fetch_day_rows(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Vec<ChatMessage>> {
        let (start, end) = civil::day_bounds_utc(date, self.timezone);
        let response = self
            .http
            .get(self.table_url("messages"))
            .query(&[
                ("chat_scope_id", format!("eq.{chat_scope_id}")),
                ("created_at", format!("gte.{}", start.to_rfc3339())),
                ("created_at", format!("lt.{}", end.to_rfc3339())),
                ("order", "created_at.asc".to_string()),
                (
                    "select",
                    "id,message_id,author_id,author_handle,author_first_name,chat_scope_id,body,indexed,created_at,indexed_at"
                        .to_string(),
                ),
            ])
            .send()
            .await
            .map_err(map_request_error)?;

        let response = check_status(response).await?;
        let rows: Vec<ChatMessage> = response
            .json()
            .await
            .map_err(|e| CoreError::Protocol(format!("messages: malformed response: {e}")))?;

        // The UTC window over-covers around DST shifts; keep only rows whose
        // civil day in the configured zone matches.
        let tz = self.timezone;
        Ok(rows
            .into_iter()
            .filter(|m| civil::civil_date(m.created_at, tz) == date)
            .collect())
    }
}

#[async_trait]
impl Store for PostgrestStore {
    async fn ping(&self) -> CoreResult<()> {
        let response = self
            .http
            .get(self.table_url("request_logs"))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
            .map_err(map_request_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn record_message(&self, msg: &NewMessage) -> CoreResult<()> {
        with_retry("record_message", || self.try_record_message(msg)).await
    }

    async fn drain_unindexed(&self, limit: usize) -> CoreResult<Vec<ChatMessage>> {
        with_retry("drain_unindexed", || {
            self.rpc("drain_unindexed", json!({ "batch_size": limit }))
        })
        .await
    }

    async fn attach_embedding(&self, row_id: i64, embedding: &[f32]) -> CoreResult<()> {
        with_retry("attach_embedding", || {
            self.try_attach_embedding(row_id, embedding)
        })
        .await
    }

    async fn attach_embeddings_batch(
        &self,
        row_ids: &[i64],
        embeddings: &[Vec<f32>],
    ) -> CoreResult<usize> {
        if row_ids.len() != embeddings.len() {
            return Err(CoreError::InvalidArgument(format!(
                "row ids and embeddings must have the same length ({} vs {})",
                row_ids.len(),
                embeddings.len()
            )));
        }
        let value: serde_json::Value = with_retry("attach_embeddings_batch", || {
            self.rpc(
                "attach_embeddings_batch",
                json!({ "p_row_ids": row_ids, "p_embeddings": embeddings }),
            )
        })
        .await?;
        parse_rows_updated(&value)
    }

    async fn search(
        &self,
        query: &[f32],
        floor: f64,
        k: usize,
        chat_scope_id: i64,
    ) -> CoreResult<Vec<SearchHit>> {
        with_retry("search_similar", || {
            self.rpc(
                "search_similar",
                json!({
                    "query_embedding": query,
                    "similarity_floor": floor,
                    "match_count": k,
                    "target_chat_id": chat_scope_id,
                }),
            )
        })
        .await
    }

    async fn messages_for_civil_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Vec<ChatMessage>> {
        with_retry("messages_for_civil_day", || {
            self.fetch_day_rows(chat_scope_id, date)
        })
        .await
    }

    async fn most_active_for_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Option<UserMessageCount>> {
        let messages = self.messages_for_civil_day(chat_scope_id, date).await?;
        Ok(most_active(&messages))
    }

    async fn quota_get(&self, author_id: i64, date: NaiveDate) -> CoreResult<QuotaUsage> {
        let rows: Vec<QuotaUsage> = with_retry("quota_get", || {
            self.rpc(
                "quota_get",
                json!({ "p_author_id": author_id, "p_date": date.to_string() }),
            )
        })
        .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn quota_increment(&self, author_id: i64, date: NaiveDate, tier: Tier) -> CoreResult<()> {
        let _: serde_json::Value = with_retry("quota_increment", || {
            self.rpc(
                "quota_increment",
                json!({
                    "p_author_id": author_id,
                    "p_date": date.to_string(),
                    "p_tier": tier.wire_name(),
                }),
            )
        })
        .await?;
        Ok(())
    }

    async fn digest_upsert(&self, digest: &DailyDigest) -> CoreResult<()> {
        let row = serde_json::to_value(digest)
            .map_err(|e| CoreError::InvalidArgument(format!("unserializable digest: {e}")))?;
        with_retry("digest_upsert", || {
            self.insert(
                "digests",
                row.clone(),
                "return=minimal,resolution=merge-duplicates",
                &[("on_conflict", "chat_scope_id,civil_date")],
            )
        })
        .await
    }

    async fn digest_exists(&self, chat_scope_id: i64, date: NaiveDate) -> CoreResult<bool> {
        #[derive(Deserialize)]
        struct IdRow {
            #[allow(dead_code)]
            id: i64,
        }

        let rows: Vec<IdRow> = with_retry("digest_exists", || async {
            let response = self
                .http
                .get(self.table_url("digests"))
                .query(&[
                    ("chat_scope_id", format!("eq.{chat_scope_id}")),
                    ("civil_date", format!("eq.{date}")),
                    ("select", "id".to_string()),
                    ("limit", "1".to_string()),
                ])
                .send()
                .await
                .map_err(map_request_error)?;
            let response = check_status(response).await?;
            response
                .json()
                .await
                .map_err(|e| CoreError::Protocol(format!("digests: malformed response: {e}")))
        })
        .await?;
        Ok(!rows.is_empty())
    }

    async fn log_request(&self, entry: &RequestLog) -> CoreResult<()> {
        let row = serde_json::to_value(entry)
            .map_err(|e| CoreError::InvalidArgument(format!("unserializable log row: {e}")))?;
        with_retry("log_request", || {
            self.insert("request_logs", row.clone(), "return=minimal", &[])
        })
        .await
    }

    async fn count_requests(&self, author_id: i64) -> CoreResult<i64> {
        let response = self
            .http
            .get(self.table_url("request_logs"))
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .query(&[
                ("author_id", format!("eq.{author_id}")),
                ("select", "id".to_string()),
            ])
            .send()
            .await
            .map_err(map_request_error)?;

        let response = check_status(response).await?;
        let header = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        parse_content_range_total(header)
            .ok_or_else(|| CoreError::Protocol(format!("bad content-range header: {header:?}")))
    }
}

fn map_request_error(e: reqwest::Error) -> CoreError {
    if e.is_timeout() || e.is_connect() {
        CoreError::Transient(format!("store request failed: {e}"))
    } else {
        CoreError::Store(format!("store request failed: {e}"))
    }
}

async fn check_status(response: Response) -> CoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> CoreError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return CoreError::Transient(format!("store returned {status}: {body}"));
    }
    if status == StatusCode::CONFLICT || body.contains("23505") || body.contains("duplicate") {
        return CoreError::Conflict(format!("store returned {status}: {body}"));
    }
    if status == StatusCode::NOT_FOUND {
        return CoreError::NotFound(format!("store returned {status}: {body}"));
    }
    if status == StatusCode::BAD_REQUEST {
        return CoreError::InvalidArgument(format!("store returned {status}: {body}"));
    }
    CoreError::Store(format!("store returned {status}: {body}"))
}

/// The batch procedure reports through a one-row table:
/// `[{"rows_updated": n}]`. Anything else is a protocol violation.
fn parse_rows_updated(value: &serde_json::Value) -> CoreResult<usize> {
    let rows = value
        .as_array()
        .ok_or_else(|| CoreError::Protocol(format!("expected rows_updated table, got {value}")))?;
    let first = rows
        .first()
        .ok_or_else(|| CoreError::Protocol("empty rows_updated table".into()))?;
    first
        .get("rows_updated")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| CoreError::Protocol(format!("missing rows_updated in {first}")))
}

/// A row-targeted procedure signals "found" with a truthy scalar or a
/// non-empty result set.
fn rpc_row_found(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) > 0,
        serde_json::Value::Array(rows) => !rows.is_empty(),
        serde_json::Value::Null => false,
        _ => true,
    }
}

/// `content-range: 0-0/42` (or `*/42`) -> 42.
fn parse_content_range_total(header: &str) -> Option<i64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

/// Max count wins; ties break to the smallest author id.
fn most_active(messages: &[ChatMessage]) -> Option<UserMessageCount> {
    let mut counts: HashMap<i64, UserMessageCount> = HashMap::new();
    for msg in messages {
        counts
            .entry(msg.author_id)
            .and_modify(|c| c.message_count += 1)
            .or_insert_with(|| UserMessageCount {
                author_id: msg.author_id,
                author_handle: msg.author_handle.clone(),
                author_first_name: msg.author_first_name.clone(),
                message_count: 1,
            });
    }
    counts.into_values().max_by(|a, b| {
        a.message_count
            .cmp(&b.message_count)
            .then(b.author_id.cmp(&a.author_id))
    })
}
