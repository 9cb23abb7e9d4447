//! Cooperative scheduler: the index-sync job at 03:00 and the daily-digest
//! job at 07:00, both on the configured zone's wall clock. First fire at
//! the next occurrence, then a 24 h cadence. Shutdown is signalled through
//! a watch channel and every sleep is cancellation-aware.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::bot::send::send_with_fallback;
use crate::civil;
use crate::digest::DigestGenerator;
use crate::error::CoreResult;
use crate::indexer::SyncJob;
use crate::models::DailyDigest;
use crate::store::Store;
use crate::telegram::api::ChatSender;

const INDEX_HOUR: u32 = 3;
const DIGEST_HOUR: u32 = 7;

pub struct Scheduler {
    store: Arc<dyn Store>,
    sync_job: Arc<SyncJob>,
    digester: Arc<DigestGenerator>,
    sender: Arc<dyn ChatSender>,
    allowed_chat_ids: Vec<i64>,
    timezone: Tz,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        sync_job: Arc<SyncJob>,
        digester: Arc<DigestGenerator>,
        sender: Arc<dyn ChatSender>,
        allowed_chat_ids: Vec<i64>,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            sync_job,
            digester,
            sender,
            allowed_chat_ids,
            timezone,
        }
    }

    /// Runs both job loops until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("scheduler starting");
        let index = self.clone().index_loop(shutdown.clone());
        let digest = self.clone().digest_loop(shutdown);
        tokio::join!(index, digest);
        info!("scheduler stopped");
    }

    async fn index_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut next = civil::next_occurrence(Utc::now(), self.timezone, INDEX_HOUR, 0);
        info!(next_run = %next, "index sync scheduled");

        loop {
            if !wait_until(next, &mut shutdown).await {
                return;
            }
            info!("starting scheduled index sync");
            match self.sync_job.run().await {
                Ok(indexed) => info!(indexed, "scheduled index sync completed"),
                Err(e) => error!(error = %e, "scheduled index sync failed"),
            }
            next += ChronoDuration::hours(24);
        }
    }

    async fn digest_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut next = civil::next_occurrence(Utc::now(), self.timezone, DIGEST_HOUR, 0);
        info!(next_run = %next, "daily digest scheduled");

        loop {
            if !wait_until(next, &mut shutdown).await {
                return;
            }
            self.clone().run_daily_digests();
            next += ChronoDuration::hours(24);
        }
    }

    /// Produces yesterday's digest for every allowed chat, each on its own
    /// task so one chat's failure cannot abort its siblings.
    fn run_daily_digests(self: Arc<Self>) {
        let yesterday = match civil::civil_date(Utc::now(), self.timezone).pred_opt() {
            Some(date) => date,
            None => return,
        };

        info!(
            date = %yesterday,
            chat_count = self.allowed_chat_ids.len(),
            "generating digests for yesterday"
        );

        for chat_id in self.allowed_chat_ids.clone() {
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.digest_for_chat(chat_id, yesterday, false).await {
                    error!(chat_id, date = %yesterday, error = %e, "digest failed");
                }
            });
        }
    }

    /// Generates, stores and posts the digest for one chat and date.
    /// Non-forced runs skip (chat, date) pairs that already have a digest;
    /// force bypasses the guard and upserts.
    pub async fn digest_for_chat(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
        force: bool,
    ) -> CoreResult<()> {
        if !force && self.store.digest_exists(chat_scope_id, date).await? {
            info!(chat_scope_id, %date, "digest already exists, skipping");
            return Ok(());
        }

        let messages = self.store.messages_for_civil_day(chat_scope_id, date).await?;
        if messages.is_empty() {
            info!(chat_scope_id, %date, "no messages for this date, skipping digest");
            return Ok(());
        }

        let most_active = self.store.most_active_for_day(chat_scope_id, date).await?;
        let topics = self.digester.topics(&messages, date).await?;
        let body = self
            .digester
            .format_message(date, &topics, most_active.as_ref());

        let digest = DailyDigest {
            chat_scope_id,
            civil_date: date,
            body: body.clone(),
            most_active_author_id: most_active.as_ref().map(|u| u.author_id),
            most_active_handle: most_active.as_ref().and_then(|u| u.author_handle.clone()),
            message_count: messages.len(),
            created_at: Utc::now(),
        };
        self.store.digest_upsert(&digest).await?;

        send_with_fallback(self.sender.as_ref(), chat_scope_id, &body).await?;

        info!(
            chat_scope_id,
            %date,
            topic_count = topics.len(),
            message_count = messages.len(),
            "daily digest completed"
        );
        Ok(())
    }

    /// Manual trigger: forced digest for yesterday in the configured zone.
    pub async fn digest_yesterday(&self, chat_scope_id: i64) -> CoreResult<()> {
        let today = civil::civil_date(Utc::now(), self.timezone);
        let yesterday = today
            .pred_opt()
            .unwrap_or(today);
        info!(chat_scope_id, date = %yesterday, "manual digest requested");
        self.digest_for_chat(chat_scope_id, yesterday, true).await
    }
}

/// Sleeps until `at`, returning false if shutdown fires first.
async fn wait_until(at: DateTime<Utc>, shutdown: &mut watch::Receiver<bool>) -> bool {
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = shutdown.changed() => false,
    }
}
