//! Request orchestrator: consumes the update stream, captures messages,
//! routes commands, and runs the mention answer path
//! (capture -> quota -> retrieval -> generation -> logging -> commit).

pub mod mention;
pub mod send;

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::indexer::SyncJob;
use crate::llm::{self, prompts, Generator};
use crate::locale::Locale;
use crate::models::{NewMessage, QuotaDecision, RequestLog, Tier};
use crate::quota::QuotaGovernor;
use crate::retrieval::Retriever;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::telegram::api::{ChatSender, UpdateSource};
use crate::telegram::{normalize_chat_id, Message};
use send::send_with_fallback;

pub struct Bot {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
    retriever: Arc<Retriever>,
    quota: Arc<QuotaGovernor>,
    sync_job: Arc<SyncJob>,
    scheduler: Arc<Scheduler>,
    sender: Arc<dyn ChatSender>,
    locale: &'static Locale,
}

impl Bot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        generator: Arc<dyn Generator>,
        retriever: Arc<Retriever>,
        quota: Arc<QuotaGovernor>,
        sync_job: Arc<SyncJob>,
        scheduler: Arc<Scheduler>,
        sender: Arc<dyn ChatSender>,
        locale: &'static Locale,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            retriever,
            quota,
            sync_job,
            scheduler,
            sender,
            locale,
        }
    }

    /// Consumes updates until shutdown, spawning one handler task per
    /// message. On shutdown, stops polling and waits for in-flight
    /// handlers up to the configured grace.
    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn UpdateSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("bot started, waiting for updates");
        let mut offset = 0i64;
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished handlers so the set stays bounded.
            while handlers.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.changed() => break,
                batch = source.next_updates(offset) => match batch {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            let Some(message) = update.message else { continue };
                            let bot = self.clone();
                            handlers.spawn(async move { bot.handle_message(message).await });
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to fetch updates, backing off");
                        tokio::time::sleep(Duration::from_secs(3)).await;
                    }
                },
            }
        }

        info!("shutting down, waiting for active handlers");
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(?grace, "shutdown grace expired, aborting remaining handlers");
            handlers.abort_all();
        }
        info!("all handlers completed");
    }

    pub async fn handle_message(&self, message: Message) {
        let Some(text) = message.text.clone().filter(|t| !t.trim().is_empty()) else {
            return;
        };

        if text.starts_with('/') {
            self.handle_command(&message, &text).await;
            return;
        }

        let chat_scope_id = normalize_chat_id(message.chat.id);
        if !self.config.is_allowed_chat(chat_scope_id) {
            debug!(chat_scope_id, "ignoring message from non-allowed chat");
            return;
        }

        // Write path: persist every qualifying message, without blocking
        // the answer path.
        if let Some(record) = capture_record(&message, chat_scope_id) {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.record_message(&record).await {
                    error!(
                        message_id = record.message_id,
                        chat_scope_id = record.chat_scope_id,
                        error = %e,
                        "failed to record message"
                    );
                }
            });
        }

        if mention::is_mentioned(&message, &self.config.bot_handle) {
            self.handle_mention(&message, &text, chat_scope_id).await;
        }
    }

    async fn handle_mention(&self, message: &Message, text: &str, chat_scope_id: i64) {
        let author_id = message.from.as_ref().map(|u| u.id).unwrap_or(0);
        let author_handle = message.from.as_ref().and_then(|u| u.username.clone());
        let author_first_name = message.from.as_ref().and_then(|u| u.first_name.clone());

        let mut question = mention::extract_question(text, &self.config.bot_handle);
        if question.is_empty() {
            self.reply(chat_scope_id, self.locale.ask_prompt).await;
            return;
        }

        let limit = self.config.max_question_chars;
        if question.chars().count() > limit {
            warn!(
                author_id,
                length = question.chars().count(),
                "question too long, truncating"
            );
            question = question.chars().take(limit).collect();
            self.reply(chat_scope_id, &self.locale.question_truncated(limit))
                .await;
        }

        info!(author_id, chat_scope_id, "processing mention");
        self.sender.send_typing(chat_scope_id).await;

        let decision = match self.quota.check(author_id).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(author_id, error = %e, "quota check failed");
                self.reply(chat_scope_id, self.locale.quota_check_failed).await;
                return;
            }
        };

        let tier = match decision {
            QuotaDecision::Allowed { tier, .. } => tier,
            QuotaDecision::Denied {
                hours_until_reset,
                usage,
            } => {
                let (cap_a, cap_b) = self.quota.limits();
                let deny = self.locale.quota_denied(
                    hours_until_reset,
                    usage.tier_a_count,
                    cap_a,
                    usage.tier_b_count,
                    cap_b,
                );
                self.reply(chat_scope_id, &deny).await;
                return;
            }
        };

        // Retrieval failures degrade to an empty context; the question is
        // still answered.
        let context = match self.retriever.search(&question, chat_scope_id).await {
            Ok(outcome) => {
                info!(author_id, results = outcome.count, "retrieval succeeded");
                outcome.context
            }
            Err(e) => {
                warn!(author_id, error = %e, "retrieval failed, continuing without context");
                String::new()
            }
        };

        let prompt = if context.is_empty() {
            prompts::answer_prompt(&question)
        } else {
            prompts::answer_prompt_with_context(&context, &question)
        };

        let model = self.model_for(tier);
        let started = Instant::now();
        let generated = self.generator.generate(model, &prompt).await;
        let execution_time_ms = started.elapsed().as_millis() as i64;

        let log_base = RequestLog {
            author_id,
            author_handle,
            author_first_name,
            chat_scope_id,
            request: question.clone(),
            response: String::new(),
            tier: tier.wire_name().to_string(),
            response_length: 0,
            execution_time_ms,
            error_message: String::new(),
            created_at: Utc::now(),
        };

        match generated {
            Err(e) => {
                error!(author_id, model, error = %e, "generation failed");
                self.reply(chat_scope_id, self.locale.generation_failed).await;
                // A failed generation never commits quota.
                self.log(RequestLog {
                    error_message: e.to_string(),
                    ..log_base
                })
                .await;
            }
            Ok(answer) => {
                let answer = llm::enforce_response_cap(answer, self.locale);

                if let Err(e) = self.quota.commit(author_id, tier).await {
                    // The answer was already generated; deliver it anyway.
                    error!(author_id, error = %e, "failed to commit quota");
                }

                self.log(RequestLog {
                    response: answer.clone(),
                    response_length: answer.chars().count(),
                    ..log_base
                })
                .await;

                let footer =
                    self.locale
                        .answer_footer(tier_emoji(tier), model, execution_time_ms);
                self.reply(chat_scope_id, &format!("{answer}{footer}")).await;
            }
        }
    }

    async fn handle_command(&self, message: &Message, text: &str) {
        let chat_scope_id = normalize_chat_id(message.chat.id);
        let (command, _args) = parse_command(text);

        info!(
            command,
            chat_scope_id,
            author_id = message.from.as_ref().map(|u| u.id).unwrap_or(0),
            "received command"
        );

        match command {
            "start" | "help" => {
                let (cap_a, cap_b) = self.quota.limits();
                let help = self
                    .locale
                    .help_message(&self.config.bot_handle, cap_a, cap_b);
                self.reply(chat_scope_id, &help).await;
            }
            "stats" => self.handle_stats(message, chat_scope_id).await,
            "sync" => self.handle_sync(chat_scope_id).await,
            "digest" => self.handle_digest(chat_scope_id).await,
            _ => {
                self.reply(chat_scope_id, self.locale.unknown_command).await;
            }
        }
    }

    async fn handle_stats(&self, message: &Message, chat_scope_id: i64) {
        let author_id = message.from.as_ref().map(|u| u.id).unwrap_or(0);
        let first_name = message
            .from
            .as_ref()
            .and_then(|u| u.first_name.clone())
            .unwrap_or_else(|| format!("User{author_id}"));

        match self.quota.stats(author_id).await {
            Ok(stats) => {
                let text = self.locale.stats_message(
                    &first_name,
                    stats.usage.tier_a_count,
                    stats.tier_a_limit,
                    stats.usage.tier_b_count,
                    stats.tier_b_limit,
                    stats.total_requests,
                    stats.resets_in_hours,
                );
                self.reply(chat_scope_id, &text).await;
            }
            Err(e) => {
                error!(author_id, error = %e, "failed to fetch stats");
                self.reply(chat_scope_id, self.locale.stats_failed).await;
            }
        }
    }

    /// Manual index sync: runs on its own task so the handler returns
    /// immediately; completion is reported back into the chat.
    async fn handle_sync(&self, chat_scope_id: i64) {
        if !self.config.is_allowed_chat(chat_scope_id) {
            self.reply(chat_scope_id, self.locale.chat_not_allowed).await;
            return;
        }

        self.reply(chat_scope_id, self.locale.sync_started).await;

        let sync_job = self.sync_job.clone();
        let sender = self.sender.clone();
        let locale = self.locale;
        tokio::spawn(async move {
            let outcome = match sync_job.run().await {
                Ok(indexed) => {
                    info!(indexed, "manual sync completed");
                    locale.sync_done
                }
                Err(e) => {
                    error!(error = %e, "manual sync failed");
                    locale.sync_failed
                }
            };
            if let Err(e) = send_with_fallback(sender.as_ref(), chat_scope_id, outcome).await {
                error!(chat_scope_id, error = %e, "failed to report sync outcome");
            }
        });
    }

    async fn handle_digest(&self, chat_scope_id: i64) {
        if !self.config.is_allowed_chat(chat_scope_id) {
            self.reply(chat_scope_id, self.locale.chat_not_allowed).await;
            return;
        }

        self.reply(chat_scope_id, self.locale.digest_generating).await;

        if let Err(e) = self.scheduler.digest_yesterday(chat_scope_id).await {
            error!(chat_scope_id, error = %e, "manual digest failed");
            self.reply(chat_scope_id, self.locale.digest_failed).await;
        }
    }

    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::A => &self.config.tier_a_model,
            Tier::B => &self.config.tier_b_model,
        }
    }

    async fn log(&self, entry: RequestLog) {
        // A failed log write must not fail the user request.
        if let Err(e) = self.store.log_request(&entry).await {
            error!(author_id = entry.author_id, error = %e, "failed to write request log");
        }
    }

    async fn reply(&self, chat_scope_id: i64, text: &str) {
        if let Err(e) = send_with_fallback(self.sender.as_ref(), chat_scope_id, text).await {
            error!(chat_scope_id, error = %e, "failed to send reply");
        }
    }
}

fn tier_emoji(tier: Tier) -> &'static str {
    match tier {
        Tier::A => "🤖",
        Tier::B => "⚡",
    }
}

/// Builds the capture record for a textual message. Messages without an
/// author keep id 0, matching historical imports.
fn capture_record(message: &Message, chat_scope_id: i64) -> Option<NewMessage> {
    let body = message.text.as_deref()?.to_string();
    if body.is_empty() {
        return None;
    }
    let created_at = Utc.timestamp_opt(message.date, 0).single()?;

    Some(NewMessage {
        message_id: message.message_id,
        author_id: message.from.as_ref().map(|u| u.id).unwrap_or(0),
        author_handle: message.from.as_ref().and_then(|u| u.username.clone()),
        author_first_name: message.from.as_ref().and_then(|u| u.first_name.clone()),
        chat_scope_id,
        body,
        indexed: false,
        created_at,
    })
}

/// "/stats@my_bot quick" -> ("stats", "quick").
fn parse_command(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let without_slash = text.strip_prefix('/').unwrap_or(text);
    let (word, args) = match without_slash.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (without_slash, ""),
    };
    let command = word.split('@').next().unwrap_or(word);
    (command, args)
}
