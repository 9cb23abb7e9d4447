//! Single localization table for every user-visible string: context
//! rendering, relative times, digest formatting, command replies. Keeping
//! them in one place keeps the wording and plural rules consistent.

use chrono::{DateTime, NaiveDate, Utc};

pub struct Locale {
    pub context_header: &'static str,
    pub just_now: &'static str,
    pub ask_prompt: &'static str,
    pub generation_failed: &'static str,
    pub quota_check_failed: &'static str,
    pub stats_failed: &'static str,
    pub response_truncated_marker: &'static str,
    pub digest_topics_header: &'static str,
    pub digest_no_topics: &'static str,
    pub sync_started: &'static str,
    pub sync_done: &'static str,
    pub sync_failed: &'static str,
    pub digest_generating: &'static str,
    pub digest_failed: &'static str,
    pub chat_not_allowed: &'static str,
    pub unknown_command: &'static str,
    pub tier_a_label: &'static str,
    pub tier_b_label: &'static str,
    months: [&'static str; 12],
}

pub static EN: Locale = Locale {
    context_header: "RELEVANT CHAT HISTORY:\n\n",
    just_now: "just now",
    ask_prompt: "❓ Please ask a question after mentioning me.",
    generation_failed:
        "❌ Sorry, something went wrong while processing your request. Please try again later.",
    quota_check_failed: "❌ Failed to check your quota",
    stats_failed: "❌ Failed to fetch your statistics",
    response_truncated_marker: "\n\n...[reply truncated to fit the message limit]",
    digest_topics_header: "*Main discussion topics:*\n",
    digest_no_topics: "*No notable discussion this day*\n",
    sync_started: "🔄 Starting index sync...\n\nThis may take a few minutes.",
    sync_done: "✅ Index sync completed successfully!",
    sync_failed: "❌ Index sync failed. Please try again later.",
    digest_generating: "⏳ Generating the digest for yesterday...",
    digest_failed: "❌ Failed to generate the digest. Please try again later.",
    chat_not_allowed: "❌ This command is only available in allowed chats.",
    unknown_command: "❓ Unknown command. Use /help for the list of commands.",
    tier_a_label: "Smart model",
    tier_b_label: "Fast model",
    months: [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ],
};

impl Locale {
    /// "1 minute" / "3 minutes".
    pub fn plural<'a>(&self, n: i64, one: &'a str, many: &'a str) -> &'a str {
        if n == 1 {
            one
        } else {
            many
        }
    }

    /// Relative time from `then` to `now`, coarsest sensible unit.
    pub fn time_ago(&self, then: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let diff = now - then;
        let minutes = diff.num_minutes();
        let hours = diff.num_hours();
        let days = diff.num_days();

        if minutes < 1 {
            return self.just_now.to_string();
        }
        if hours < 1 {
            return format!("{minutes} {} ago", self.plural(minutes, "minute", "minutes"));
        }
        if days < 1 {
            return format!("{hours} {} ago", self.plural(hours, "hour", "hours"));
        }
        if days < 7 {
            return format!("{days} {} ago", self.plural(days, "day", "days"));
        }
        if days < 30 {
            let weeks = days / 7;
            return format!("{weeks} {} ago", self.plural(weeks, "week", "weeks"));
        }
        if days < 365 {
            let months = days / 30;
            return format!("{months} {} ago", self.plural(months, "month", "months"));
        }
        let years = days / 365;
        format!("{years} {} ago", self.plural(years, "year", "years"))
    }

    /// One retrieval context line: `1. Ada (2 days ago, relevance: 0.89): "text"`.
    pub fn context_line(
        &self,
        index: usize,
        author: &str,
        time_ago: &str,
        similarity: f64,
        body: &str,
    ) -> String {
        format!("{index}. {author} ({time_ago}, relevance: {similarity:.2}): \"{body}\"\n")
    }

    /// Trailer appended when the context budget cuts the result list short.
    pub fn context_omitted(&self, omitted: usize) -> String {
        format!("\n[... {omitted} more relevant {} not shown due to the length limit]\n",
            self.plural(omitted as i64, "message", "messages"))
    }

    /// "20 November" (no year; digests are about yesterday).
    pub fn date_display(&self, date: NaiveDate) -> String {
        use chrono::Datelike;
        format!("{} {}", date.day(), self.months[date.month0() as usize])
    }

    pub fn digest_header(&self, date: NaiveDate) -> String {
        format!("📊 *Digest for {}*\n\n", self.date_display(date))
    }

    pub fn digest_most_active(&self, name: &str, count: usize) -> String {
        format!(
            "\n*Most active yesterday:* @{name} ({count} {})",
            self.plural(count as i64, "message", "messages")
        )
    }

    /// Note injected into the digest prompt when the day is trimmed.
    pub fn digest_trim_note(&self, total: usize) -> String {
        format!("[Showing the first 250 and the last 250 of {total} messages]\n\n")
    }

    pub fn question_truncated(&self, limit: usize) -> String {
        format!(
            "⚠️ Your question was truncated to {limit} characters. Please keep questions shorter."
        )
    }

    pub fn quota_denied(
        &self,
        hours_until_reset: i64,
        tier_a_used: u32,
        tier_a_limit: u32,
        tier_b_used: u32,
        tier_b_limit: u32,
    ) -> String {
        format!(
            "🚫 You have used up today's request quota.\n\n\
             Quota resets in {hours_until_reset} {}.\n\
             {}: {tier_a_used}/{tier_a_limit}\n\
             {}: {tier_b_used}/{tier_b_limit}",
            self.plural(hours_until_reset, "hour", "hours"),
            self.tier_a_label,
            self.tier_b_label,
        )
    }

    pub fn answer_footer(&self, tier_emoji: &str, model: &str, execution_time_ms: i64) -> String {
        format!("\n\n---\n{tier_emoji} _Model: {model} | Time: {execution_time_ms}ms_")
    }

    pub fn stats_message(
        &self,
        first_name: &str,
        tier_a_used: u32,
        tier_a_limit: u32,
        tier_b_used: u32,
        tier_b_limit: u32,
        total_requests: i64,
        resets_in_hours: i64,
    ) -> String {
        format!(
            "📊 *Stats for {first_name}*\n\n\
             🤖 *{}:*\n   Used: {tier_a_used}/{tier_a_limit}\n   Remaining: {}\n\n\
             ⚡ *{}:*\n   Used: {tier_b_used}/{tier_b_limit}\n   Remaining: {}\n\n\
             📈 *Total requests:* {total_requests}\n\
             ⏰ *Quota resets in:* {resets_in_hours} h",
            self.tier_a_label,
            tier_a_limit.saturating_sub(tier_a_used),
            self.tier_b_label,
            tier_b_limit.saturating_sub(tier_b_used),
        )
    }

    pub fn help_message(&self, handle: &str, tier_a_limit: u32, tier_b_limit: u32) -> String {
        format!(
            "👋 *Hi! I am the group assistant*\n\n\
             *How to use:*\nJust mention me (@{handle}) and ask a question!\n\n\
             *Commands:*\n\
             /stats - Show your usage\n\
             /digest - Generate yesterday's digest\n\
             /sync - Run index sync (embed new messages)\n\
             /help - Show this message\n\n\
             *Daily limits:*\n\
             • {}: {tier_a_limit} requests/day\n\
             • {}: {tier_b_limit} requests/day\n\n\
             The smart model is used first, then the fast one.\n\
             Limits reset at local midnight.\n\n\
             *Scheduled jobs:*\n\
             • 03:00 - Index sync\n\
             • 07:00 - Daily digest",
            self.tier_a_label, self.tier_b_label,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn time_ago_units() {
        let now = now();
        assert_eq!(EN.time_ago(now - Duration::seconds(30), now), "just now");
        assert_eq!(EN.time_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(EN.time_ago(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(EN.time_ago(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(EN.time_ago(now - Duration::days(2), now), "2 days ago");
        assert_eq!(EN.time_ago(now - Duration::days(14), now), "2 weeks ago");
        assert_eq!(EN.time_ago(now - Duration::days(90), now), "3 months ago");
        assert_eq!(EN.time_ago(now - Duration::days(800), now), "2 years ago");
    }

    #[test]
    fn date_display_uses_month_table() {
        let date = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
        assert_eq!(EN.date_display(date), "20 November");
    }

    #[test]
    fn quota_denied_pluralizes_hours() {
        let one = EN.quota_denied(1, 5, 5, 25, 25);
        assert!(one.contains("resets in 1 hour."), "{one}");
        let many = EN.quota_denied(7, 5, 5, 25, 25);
        assert!(many.contains("resets in 7 hours."), "{many}");
    }

    #[test]
    fn context_line_format() {
        let line = EN.context_line(1, "Ada", "2 days ago", 0.894, "VS Code is great");
        assert_eq!(line, "1. Ada (2 days ago, relevance: 0.89): \"VS Code is great\"\n");
    }
}
