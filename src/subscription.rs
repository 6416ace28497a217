//! Subscription rows and the status state machine
//!
//! A subscription is created `Pending`, promoted to `Active` by a successful
//! first charge, bounced between `Active` and `Suspended` by the renewal and
//! retry sweeps, and terminated as `Cancelled` (explicit) or `Expired`
//! (retries exhausted). Rows are never hard-deleted; terminal rows stay for
//! audit and revenue history.

use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Created, first charge not yet settled.
    Pending,
    /// Paid through `current_period_end`.
    Active,
    /// A charge failed; awaiting retry.
    Suspended,
    /// Explicitly cancelled by the holder.
    Cancelled,
    /// Retries exhausted; terminal.
    Expired,
}

impl SubscriptionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// One user's entitlement to one tier, plus its billing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub user_id: String,
    /// Foreign reference, not a value copy: renewal re-reads the current
    /// tier price.
    pub tier_id: String,
    /// Denormalized tier owner, for access and revenue queries.
    pub provider_id: String,
    /// Payment-rail address charges are drawn from.
    pub payer_address: String,
    pub status: SubscriptionStatus,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub auto_renew: bool,
    pub last_payment_ref: Option<String>,
    pub last_payment_at: Option<i64>,
    /// Consecutive failures; resets to 0 on any successful payment.
    pub payment_failure_count: u32,
    /// Set only while suspended awaiting retry.
    pub next_retry_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    /// Optimistic-concurrency column; bumped by every stored update.
    pub version: u64,
}

impl Subscription {
    /// Create a `Pending` row with a fresh period window starting now.
    pub fn pending(
        user_id: impl Into<String>,
        tier: &Tier,
        payer_address: impl Into<String>,
        auto_renew: bool,
        now: i64,
        period_secs: i64,
    ) -> Self {
        Self {
            subscription_id: format!("sub_{}", uuid::Uuid::new_v4()),
            user_id: user_id.into(),
            tier_id: tier.tier_id.clone(),
            provider_id: tier.provider_id.clone(),
            payer_address: payer_address.into(),
            status: SubscriptionStatus::Pending,
            current_period_start: now,
            current_period_end: now + period_secs,
            auto_renew,
            last_payment_ref: None,
            last_payment_at: None,
            payment_failure_count: 0,
            next_retry_at: None,
            cancelled_at: None,
            created_at: now,
            version: 0,
        }
    }

    /// Active with a period that has not yet lapsed.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Active && self.current_period_end > now
    }

    /// Slide the window to `[now, now + period]`.
    ///
    /// Anchored at now, not at the old period end, so missed sweeps do not
    /// compound drift.
    pub fn slide_period(&mut self, now: i64, period_secs: i64) {
        self.current_period_start = now;
        self.current_period_end = now + period_secs;
    }

    /// Apply a successful charge: activate, clear the failure counter.
    pub fn record_payment(&mut self, settlement_ref: impl Into<String>, now: i64) {
        self.status = SubscriptionStatus::Active;
        self.last_payment_ref = Some(settlement_ref.into());
        self.last_payment_at = Some(now);
        self.payment_failure_count = 0;
        self.next_retry_at = None;
    }

    /// Apply a failed charge: suspend and schedule the next retry.
    pub fn record_failure(&mut self, now: i64, retry_backoff_secs: i64) {
        self.status = SubscriptionStatus::Suspended;
        self.payment_failure_count += 1;
        self.next_retry_at = Some(now + retry_backoff_secs);
    }

    /// Renewal sweep predicate: active, auto-renewing, period lapsed.
    pub fn due_for_renewal(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Active
            && self.auto_renew
            && self.current_period_end <= now
    }

    /// Notice sweep predicate: active, auto-renewing, period ends within
    /// the window but has not lapsed yet.
    pub fn within_notice_window(&self, now: i64, window_secs: i64) -> bool {
        self.status == SubscriptionStatus::Active
            && self.auto_renew
            && self.current_period_end > now
            && self.current_period_end <= now + window_secs
    }

    /// Retry sweep predicate: suspended with an elapsed retry deadline.
    pub fn due_for_retry(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Suspended
            && self.next_retry_at.is_some_and(|at| at <= now)
    }
}
