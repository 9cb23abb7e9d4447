//! Two-tier daily quota governor, anchored to the configured civil
//! timezone. The check/commit pair is deliberately not atomic across
//! in-flight requests; the per-row increment is atomic in the store.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

use crate::civil;
use crate::error::CoreResult;
use crate::models::{QuotaDecision, QuotaUsage, Tier, UserStats};
use crate::store::Store;

pub struct QuotaGovernor {
    store: Arc<dyn Store>,
    timezone: Tz,
    tier_a_limit: u32,
    tier_b_limit: u32,
}

impl QuotaGovernor {
    pub fn new(store: Arc<dyn Store>, timezone: Tz, tier_a_limit: u32, tier_b_limit: u32) -> Self {
        Self {
            store,
            timezone,
            tier_a_limit,
            tier_b_limit,
        }
    }

    pub fn limits(&self) -> (u32, u32) {
        (self.tier_a_limit, self.tier_b_limit)
    }

    /// Admits the request on the highest-priority tier with remaining
    /// capacity, or denies with the hours until the local midnight reset.
    pub async fn check(&self, author_id: i64) -> CoreResult<QuotaDecision> {
        self.check_at(author_id, Utc::now()).await
    }

    pub async fn check_at(&self, author_id: i64, now: DateTime<Utc>) -> CoreResult<QuotaDecision> {
        let today = civil::civil_date(now, self.timezone);
        let usage = self.store.quota_get(author_id, today).await?;

        debug!(
            author_id,
            tier_a_used = usage.tier_a_count,
            tier_b_used = usage.tier_b_count,
            "checking quota"
        );

        let decision = decide(usage, self.tier_a_limit, self.tier_b_limit, || {
            civil::hours_until_midnight(now, self.timezone)
        });
        Ok(decision)
    }

    /// Records one successful generation on the chosen tier. Must only be
    /// called after the generation succeeded.
    pub async fn commit(&self, author_id: i64, tier: Tier) -> CoreResult<()> {
        let today = civil::civil_date(Utc::now(), self.timezone);
        self.store.quota_increment(author_id, today, tier).await?;
        debug!(author_id, tier = tier.wire_name(), %today, "quota committed");
        Ok(())
    }

    /// Per-user view for the stats command.
    pub async fn stats(&self, author_id: i64) -> CoreResult<UserStats> {
        let now = Utc::now();
        let today = civil::civil_date(now, self.timezone);
        let usage = self.store.quota_get(author_id, today).await?;
        let total_requests = self.store.count_requests(author_id).await.unwrap_or(0);

        Ok(UserStats {
            usage,
            tier_a_limit: self.tier_a_limit,
            tier_b_limit: self.tier_b_limit,
            total_requests,
            resets_in_hours: civil::hours_until_midnight(now, self.timezone),
        })
    }
}

fn decide(
    usage: QuotaUsage,
    tier_a_limit: u32,
    tier_b_limit: u32,
    hours_until_reset: impl FnOnce() -> i64,
) -> QuotaDecision {
    if usage.tier_a_count < tier_a_limit {
        QuotaDecision::Allowed { tier: Tier::A, usage }
    } else if usage.tier_b_count < tier_b_limit {
        QuotaDecision::Allowed { tier: Tier::B, usage }
    } else {
        QuotaDecision::Denied {
            hours_until_reset: hours_until_reset(),
            usage,
        }
    }
}
