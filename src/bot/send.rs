//! Outbound delivery with graceful degradation: markup send first, escaped
//! markup second, plain text last.

use tracing::{error, warn};

use crate::error::CoreResult;
use crate::telegram::api::{ChatSender, ParseMode};

/// Hard platform limit on message length, in characters.
const MAX_OUTBOUND_CHARS: usize = 4096;

/// Escapes every markup-sensitive character for the strict markup mode.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Sends `text` to the chat, degrading through the fallback chain. Only
/// when all three attempts fail does the error surface to the caller.
pub async fn send_with_fallback(
    sender: &dyn ChatSender,
    chat_id: i64,
    text: &str,
) -> CoreResult<()> {
    let text = clamp_outbound(text);

    let first = sender.send(chat_id, &text, ParseMode::Markdown).await;
    let Err(e) = first else { return Ok(()) };
    warn!(chat_id, error = %e, "markup send rejected, retrying with escaped markup");

    let second = sender
        .send(chat_id, &escape_markdown(&text), ParseMode::MarkdownV2)
        .await;
    let Err(e) = second else { return Ok(()) };
    warn!(chat_id, error = %e, "escaped markup rejected, sending as plain text");

    sender
        .send(chat_id, &text, ParseMode::Plain)
        .await
        .map_err(|e| {
            error!(chat_id, error = %e, "failed to send message even as plain text");
            e
        })
}

fn clamp_outbound(text: &str) -> String {
    if text.chars().count() <= MAX_OUTBOUND_CHARS {
        return text.to_string();
    }
    warn!(length = text.chars().count(), "message too long for the platform, clamping");
    let mut clamped: String = text.chars().take(MAX_OUTBOUND_CHARS - 3).collect();
    clamped.push_str("...");
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::CoreError;

    /// Rejects the listed modes, records every accepted send.
    struct FussySender {
        reject: Vec<ParseMode>,
        delivered: Mutex<Vec<(ParseMode, String)>>,
    }

    impl FussySender {
        fn rejecting(reject: Vec<ParseMode>) -> Self {
            Self {
                reject,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatSender for FussySender {
        async fn send(&self, _chat_id: i64, text: &str, mode: ParseMode) -> CoreResult<()> {
            if self.reject.contains(&mode) {
                return Err(CoreError::Store("can't parse entities".into()));
            }
            self.delivered.lock().unwrap().push((mode, text.to_string()));
            Ok(())
        }

        async fn send_typing(&self, _chat_id: i64) {}
    }

    #[test]
    fn escape_covers_the_strict_set() {
        assert_eq!(escape_markdown("a_b*c[d]"), "a\\_b\\*c\\[d\\]");
        assert_eq!(escape_markdown("1. hi!"), "1\\. hi\\!");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[tokio::test]
    async fn happy_path_sends_markup_once() {
        let sender = FussySender::rejecting(vec![]);
        send_with_fallback(&sender, 1, "hello *world*").await.unwrap();

        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, ParseMode::Markdown);
    }

    #[tokio::test]
    async fn falls_back_to_escaped_markup() {
        let sender = FussySender::rejecting(vec![ParseMode::Markdown]);
        send_with_fallback(&sender, 1, "broken_markup_").await.unwrap();

        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, ParseMode::MarkdownV2);
        assert_eq!(delivered[0].1, "broken\\_markup\\_");
    }

    #[tokio::test]
    async fn falls_back_to_plain_text_last() {
        let sender =
            FussySender::rejecting(vec![ParseMode::Markdown, ParseMode::MarkdownV2]);
        send_with_fallback(&sender, 1, "text").await.unwrap();

        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, ParseMode::Plain);
        assert_eq!(delivered[0].1, "text");
    }

    #[tokio::test]
    async fn surfaces_error_when_all_modes_fail() {
        let sender = FussySender::rejecting(vec![
            ParseMode::Markdown,
            ParseMode::MarkdownV2,
            ParseMode::Plain,
        ]);
        assert!(send_with_fallback(&sender, 1, "text").await.is_err());
    }

    #[tokio::test]
    async fn clamps_overlong_messages() {
        let sender = FussySender::rejecting(vec![]);
        let text = "x".repeat(MAX_OUTBOUND_CHARS + 100);
        send_with_fallback(&sender, 1, &text).await.unwrap();

        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(delivered[0].1.chars().count(), MAX_OUTBOUND_CHARS);
        assert!(delivered[0].1.ends_with("..."));
    }
}
