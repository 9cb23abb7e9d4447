//! Daily digest generation: asks the generator for 5-7 topic lines over one
//! civil day of messages, parses them defensively, and formats the digest
//! message posted to the chat.

use chrono::NaiveDate;
use chrono_tz::Tz;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoreResult;
use crate::llm::Generator;
use crate::locale::Locale;
use crate::models::{ChatMessage, UserMessageCount};

/// Above this many messages, the prompt carries only the first and last
/// [`TRIM_EDGE`] messages plus a note; the digest still reports the full
/// count.
const MAX_MESSAGES_IN_PROMPT: usize = 500;
const TRIM_EDGE: usize = 250;
const MAX_TOPICS: usize = 7;

pub struct DigestGenerator {
    generator: Arc<dyn Generator>,
    model: String,
    timezone: Tz,
    locale: &'static Locale,
}

impl DigestGenerator {
    pub fn new(
        generator: Arc<dyn Generator>,
        model: String,
        timezone: Tz,
        locale: &'static Locale,
    ) -> Self {
        Self {
            generator,
            model,
            timezone,
            locale,
        }
    }

    /// Topic lines for one day of messages, at most seven.
    pub async fn topics(
        &self,
        messages: &[ChatMessage],
        date: NaiveDate,
    ) -> CoreResult<Vec<String>> {
        if messages.is_empty() {
            debug!(%date, "no messages to summarize");
            return Ok(Vec::new());
        }

        let prompt = build_digest_prompt(messages, date, self.timezone, self.locale);
        debug!(
            %date,
            message_count = messages.len(),
            prompt_length = prompt.len(),
            "requesting topic extraction"
        );

        let response = self.generator.generate(&self.model, &prompt).await?;
        let topics = parse_topics(&response);

        info!(%date, topic_count = topics.len(), "digest topics generated");
        Ok(topics)
    }

    /// The final digest message: date header, topic lines (or the fallback)
    /// and the most-active footer.
    pub fn format_message(
        &self,
        date: NaiveDate,
        topics: &[String],
        most_active: Option<&UserMessageCount>,
    ) -> String {
        let mut message = self.locale.digest_header(date);

        if topics.is_empty() {
            message.push_str(self.locale.digest_no_topics);
        } else {
            message.push_str(self.locale.digest_topics_header);
            for topic in topics {
                message.push_str(topic);
                message.push('\n');
            }
        }

        if let Some(user) = most_active {
            let name = escape_markup(&user.display_name());
            message.push_str(&self.locale.digest_most_active(&name, user.message_count));
        }

        message
    }
}

fn build_digest_prompt(
    messages: &[ChatMessage],
    date: NaiveDate,
    tz: Tz,
    locale: &Locale,
) -> String {
    let mut prompt = format!(
        "Analyze the following group chat messages from {date} and extract the 5-7 main \
         discussion topics.\n\n\
         IMPORTANT:\n\
         1. Each topic must be short (at most 5-7 words)\n\
         2. Start each topic with a fitting emoji\n\
         3. Output one topic per line\n\
         4. Do NOT number the topics, only emoji and text\n\
         5. Focus on the most discussed and most important topics\n\
         6. If there are fewer than 5 topics, output only those\n\n\
         Messages:\n\n"
    );

    let trimmed: Vec<&ChatMessage> = if messages.len() > MAX_MESSAGES_IN_PROMPT {
        prompt.push_str(&locale.digest_trim_note(messages.len()));
        messages
            .iter()
            .take(TRIM_EDGE)
            .chain(messages.iter().skip(messages.len() - TRIM_EDGE))
            .collect()
    } else {
        messages.iter().collect()
    };

    for msg in trimmed {
        let timestamp = msg.created_at.with_timezone(&tz).format("%H:%M");
        let author = prompt_author(msg);
        let _ = writeln!(prompt, "[{timestamp}] {author}: {}", msg.body);
    }

    prompt.push_str(
        "\n\nNow extract the 5-7 main topics in this format:\n\
         🎮 Topic one\n\
         💻 Topic two\n\
         and so on...\n\n\
         Topics:",
    );

    prompt
}

fn prompt_author(msg: &ChatMessage) -> String {
    if let Some(handle) = msg.author_handle.as_deref().filter(|h| !h.is_empty()) {
        return handle.to_string();
    }
    if let Some(name) = msg.author_first_name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    format!("User{}", msg.author_id)
}

/// Extracts topic lines from the generator response: trims, drops empties
/// and header-ish lines, accepts emoji-bearing or sensibly sized lines,
/// strips leading enumerators, caps at seven.
fn parse_topics(text: &str) -> Vec<String> {
    let mut topics = Vec::with_capacity(MAX_TOPICS);

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_lowercase();
        if lower.starts_with("topics:")
            || lower.starts_with("main topics")
            || lower.starts_with("here")
        {
            continue;
        }

        let has_emoji = line.chars().any(|c| c as u32 > 0x1F000);
        let char_count = line.chars().count();
        if !has_emoji && !(3 < char_count && char_count < 100) {
            continue;
        }

        let cleaned = strip_enumerator(line);
        if cleaned.is_empty() {
            continue;
        }

        topics.push(cleaned);
        if topics.len() >= MAX_TOPICS {
            break;
        }
    }

    topics
}

/// "1. Topic" / "2) Topic" / "- Topic" -> "Topic".
fn strip_enumerator(line: &str) -> String {
    let line = line.strip_prefix("- ").unwrap_or(line);

    let digits: usize = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim().to_string();
        }
    }

    line.trim().to_string()
}

/// Escapes markup-sensitive characters in user-supplied names.
fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
