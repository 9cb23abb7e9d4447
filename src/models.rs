use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Generation tier. Tier A is the higher-quality profile and is always
/// preferred while the author has remaining daily capacity; tier B is the
/// faster fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    A,
    B,
}

impl Tier {
    /// Wire name used by the store's quota procedures and the request log.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Tier::A => "tier_a",
            Tier::B => "tier_b",
        }
    }
}

/// A persisted chat message row. `indexed` is true iff `embedding` is set;
/// `created_at` is the platform send time, never the ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: i64,
    pub message_id: i64,
    pub author_id: i64,
    #[serde(default)]
    pub author_handle: Option<String>,
    #[serde(default)]
    pub author_first_name: Option<String>,
    pub chat_scope_id: i64,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub indexed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Capture-time message record, before the store assigns a row id.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub message_id: i64,
    pub author_id: i64,
    pub author_handle: Option<String>,
    pub author_first_name: Option<String>,
    pub chat_scope_id: i64,
    pub body: String,
    pub indexed: bool,
    pub created_at: DateTime<Utc>,
}

/// One nearest-neighbour search result. `similarity` is cosine similarity
/// (`1 - cosine_distance`), already floored and ordered by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub message_id: i64,
    pub author_id: i64,
    #[serde(default)]
    pub author_handle: Option<String>,
    #[serde(default)]
    pub author_first_name: Option<String>,
    pub chat_scope_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub similarity: f64,
}

impl SearchHit {
    /// Display name precedence: first name, then `@handle`, then `User_<id>`.
    pub fn author_label(&self) -> String {
        if let Some(name) = self.author_first_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(handle) = self.author_handle.as_deref().filter(|h| !h.is_empty()) {
            return format!("@{handle}");
        }
        format!("User_{}", self.author_id)
    }
}

/// Per-author daily counters, one row per (author, civil date).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct QuotaUsage {
    #[serde(default)]
    pub tier_a_count: u32,
    #[serde(default)]
    pub tier_b_count: u32,
}

/// Outcome of a quota check.
#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Allowed { tier: Tier, usage: QuotaUsage },
    Denied { hours_until_reset: i64, usage: QuotaUsage },
}

/// Per-author view served by the stats command.
#[derive(Debug, Clone)]
pub struct UserStats {
    pub usage: QuotaUsage,
    pub tier_a_limit: u32,
    pub tier_b_limit: u32,
    pub total_requests: i64,
    pub resets_in_hours: i64,
}

/// Append-only log row, one per handled user question. `response` is empty
/// on failure, `error_message` empty on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub author_id: i64,
    #[serde(default)]
    pub author_handle: Option<String>,
    #[serde(default)]
    pub author_first_name: Option<String>,
    pub chat_scope_id: i64,
    pub request: String,
    pub response: String,
    pub tier: String,
    pub response_length: usize,
    pub execution_time_ms: i64,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// Daily topic digest for one chat and one civil day. Upserted, so a forced
/// regeneration overwrites the previous row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyDigest {
    pub chat_scope_id: i64,
    pub civil_date: NaiveDate,
    pub body: String,
    #[serde(default)]
    pub most_active_author_id: Option<i64>,
    #[serde(default)]
    pub most_active_handle: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Message-count statistics for one author on one civil day.
#[derive(Debug, Clone)]
pub struct UserMessageCount {
    pub author_id: i64,
    pub author_handle: Option<String>,
    pub author_first_name: Option<String>,
    pub message_count: usize,
}

impl UserMessageCount {
    pub fn display_name(&self) -> String {
        if let Some(handle) = self.author_handle.as_deref().filter(|h| !h.is_empty()) {
            return handle.to_string();
        }
        if let Some(name) = self.author_first_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        format!("User{}", self.author_id)
    }
}
