//! Mention detection and question extraction. Entity offsets arrive in
//! UTF-16 code units and are translated before any substring comparison.

use crate::telegram::{entity_text, Message};

/// True when the message addresses the assistant: a `mention` entity whose
/// span equals `@handle`, a `text_mention` entity carrying the assistant's
/// user record, or (when the platform did not tag entities) a plain
/// case-insensitive occurrence of `@handle` in the text.
pub fn is_mentioned(message: &Message, handle: &str) -> bool {
    let Some(text) = message.text.as_deref() else {
        return false;
    };
    let needle = format!("@{handle}");

    for entity in &message.entities {
        match entity.kind.as_str() {
            "mention" => {
                if let Some(span) = entity_text(text, entity.offset, entity.length) {
                    if span.eq_ignore_ascii_case(&needle) {
                        return true;
                    }
                }
            }
            "text_mention" => {
                if let Some(user) = &entity.user {
                    if user
                        .username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(handle))
                    {
                        return true;
                    }
                }
            }
            _ => {}
        }
    }

    // Fallback for clients that omit entity tags.
    text.to_lowercase().contains(&needle.to_lowercase())
}

/// Strips every occurrence of `@handle` (case-insensitive) and trims the
/// remainder; the result is the question to answer.
pub fn extract_question(text: &str, handle: &str) -> String {
    let needle = format!("@{}", handle.to_ascii_lowercase());
    // ASCII lowercasing preserves byte offsets, so positions found in the
    // lowered copy index the original directly.
    let lowered = text.to_ascii_lowercase();

    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(found) = lowered[pos..].find(&needle) {
        let start = pos + found;
        out.push_str(&text[pos..start]);
        pos = start + needle.len();
    }
    out.push_str(&text[pos..]);
    out.trim().to_string()
}
