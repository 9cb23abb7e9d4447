//! Narrow types for the consumed update stream, plus the text-position and
//! id-normalization contracts the rest of the core relies on.

pub mod api;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    /// Platform-supplied send time, unix seconds.
    pub date: i64,
    /// Live updates carry `text` as a plain string; chat exports carry an
    /// array of string/object fragments. Both flatten to one string here,
    /// and empty results are dropped.
    #[serde(default, deserialize_with = "flexible_text")]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Typed span inside a message. Offsets and lengths are in UTF-16 code
/// units of the message text.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub user: Option<User>,
}

/// Maps a raw chat id to the routable form the core persists and compares.
/// Group exports carry positive ids; the bot interface addresses the same
/// group as `-(10^12 + raw)`. Already-negative ids pass through unchanged.
pub fn normalize_chat_id(raw: i64) -> i64 {
    if raw < 0 {
        return raw;
    }
    if raw > 1_000_000_000 {
        return -1_000_000_000_000 - raw;
    }
    raw
}

/// Extracts the substring addressed by a UTF-16 (offset, length) span.
/// BMP characters count as one unit, supplementary-plane characters as two.
/// Returns `None` for out-of-range or empty spans.
pub fn entity_text(text: &str, offset: usize, length: usize) -> Option<&str> {
    let target_start = offset;
    let target_end = offset.checked_add(length)?;

    let mut units = 0usize;
    let mut start_byte = None;
    let mut end_byte = None;

    for (byte_idx, ch) in text.char_indices() {
        if start_byte.is_none() && units >= target_start {
            start_byte = Some(byte_idx);
        }
        if start_byte.is_some() && end_byte.is_none() && units >= target_end {
            end_byte = Some(byte_idx);
            break;
        }
        units += ch.len_utf16();
    }

    let start = match start_byte {
        Some(b) => b,
        None if units == target_start => text.len(),
        None => return None,
    };
    let end = end_byte.unwrap_or(text.len());

    if start >= end {
        return None;
    }
    text.get(start..end)
}

fn flexible_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .map(flatten_text)
        .filter(|text| !text.is_empty()))
}

/// Flattens the duck-typed `text` field: either a plain string, or an array
/// whose elements are strings or `{"text": ...}` objects. Anything else
/// contributes nothing.
fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.as_str(),
                Value::Object(map) => map.get("text").and_then(Value::as_str).unwrap_or(""),
                _ => "",
            })
            .collect(),
        _ => String::new(),
    }
}
