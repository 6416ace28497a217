//! Subscription lifecycle operations
//!
//! The one writer of subscription rows outside the scheduler. Interactive
//! operations surface their errors synchronously: the user must see why a
//! subscribe, cancel, or tier change failed. Payment failures during
//! `subscribe` and `change_tier` are the only ones a caller ever observes
//! directly; scheduler failures become state transitions instead.

use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::gateway::{PaymentGateway, SettlementExecutor};
use crate::proration;
use crate::storage::BillingStorage;
use crate::subscription::{Subscription, SubscriptionStatus};
use crate::tier::Tier;
use crate::{BillingError, Result};
use std::sync::Arc;

pub struct LifecycleManager {
    storage: Arc<dyn BillingStorage>,
    executor: SettlementExecutor,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
}

impl LifecycleManager {
    pub fn new(
        storage: Arc<dyn BillingStorage>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        let executor = SettlementExecutor::new(
            gateway,
            config.platform_address.clone(),
            config.gateway_timeout,
        );
        Self {
            storage,
            executor,
            clock,
            config,
        }
    }

    /// Subscribe `user_id` to a tier, charging the first period up front.
    ///
    /// Free tiers activate without touching the gateway. A failed first
    /// charge leaves the row `Suspended` for the retry sweep and surfaces
    /// [`BillingError::PaymentFailed`] to the caller.
    pub async fn subscribe(
        &self,
        user_id: &str,
        tier_id: &str,
        payer_address: &str,
        auto_renew: bool,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let tier = self.load_tier(tier_id).await?;
        if !tier.active {
            return Err(BillingError::TierInactive(tier_id.to_string()).into());
        }

        let existing = self.storage.list_subscriptions_by_user(user_id).await?;
        if existing
            .iter()
            .any(|s| s.tier_id == tier_id && s.status == SubscriptionStatus::Active)
        {
            return Err(BillingError::DuplicateSubscription.into());
        }

        let sub = Subscription::pending(
            user_id,
            &tier,
            payer_address,
            auto_renew,
            now,
            self.config.period_secs,
        );
        self.storage.insert_subscription(&sub).await?;

        if tier.price.is_zero() {
            let mut activated = sub.clone();
            activated.status = SubscriptionStatus::Active;
            let stored = self.storage.update_subscription(&activated, 0).await?;
            tracing::info!(subscription_id = %stored.subscription_id, user_id, tier_id,
                "free tier subscription activated");
            return Ok(stored);
        }

        match self
            .executor
            .charge_split(
                payer_address,
                &tier.provider_id,
                &tier.price,
                tier.commission_pct,
            )
            .await
        {
            Ok(settlement) => {
                let mut activated = sub.clone();
                activated.record_payment(settlement.reference, now);
                let stored = self.storage.update_subscription(&activated, 0).await?;
                tracing::info!(subscription_id = %stored.subscription_id, user_id, tier_id,
                    amount = %tier.price, "subscription activated");
                Ok(stored)
            }
            Err(e) => {
                let mut suspended = sub.clone();
                suspended.record_failure(now, self.config.retry_backoff_secs);
                self.storage.update_subscription(&suspended, 0).await?;
                tracing::warn!(subscription_id = %sub.subscription_id, user_id, tier_id,
                    error = %e, "first charge failed, subscription suspended");
                Err(BillingError::PaymentFailed(e.to_string()).into())
            }
        }
    }

    /// Move a subscription to another tier of the same provider.
    ///
    /// Upgrades charge the prorated price difference immediately; a failed
    /// charge aborts the change and leaves the old tier in force.
    /// Downgrades take effect without refund. The period window is never
    /// touched.
    pub async fn change_tier(
        &self,
        user_id: &str,
        subscription_id: &str,
        new_tier_id: &str,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let sub = self.load_subscription(subscription_id).await?;
        if sub.user_id != user_id {
            return Err(BillingError::NotOwner.into());
        }
        if sub.status != SubscriptionStatus::Active {
            return Err(
                BillingError::InvalidTierChange("subscription is not active".into()).into(),
            );
        }
        if sub.tier_id == new_tier_id {
            return Err(
                BillingError::InvalidTierChange("already subscribed to this tier".into()).into(),
            );
        }

        let old_tier = self.load_tier(&sub.tier_id).await?;
        let new_tier = self.load_tier(new_tier_id).await?;
        if new_tier.provider_id != old_tier.provider_id {
            return Err(BillingError::InvalidTierChange(
                "tiers belong to different providers".into(),
            )
            .into());
        }
        if !new_tier.active {
            return Err(BillingError::TierInactive(new_tier_id.to_string()).into());
        }

        let charge = proration::upgrade_charge(
            &old_tier.price,
            &new_tier.price,
            sub.current_period_start,
            sub.current_period_end,
            now,
        )?;

        let mut changed = sub.clone();
        changed.tier_id = new_tier.tier_id.clone();

        if charge.is_positive() {
            let settlement = self
                .executor
                .charge_split(
                    &sub.payer_address,
                    &new_tier.provider_id,
                    &charge,
                    new_tier.commission_pct,
                )
                .await
                .map_err(|e| BillingError::PaymentFailed(e.to_string()))?;
            changed.record_payment(settlement.reference, now);
            tracing::info!(subscription_id, user_id, new_tier_id, prorated = %charge,
                "tier upgrade charged");
        } else {
            tracing::info!(subscription_id, user_id, new_tier_id, "tier changed without charge");
        }

        let stored = self.storage.update_subscription(&changed, sub.version).await?;
        Ok(stored)
    }

    /// Cancel a subscription.
    ///
    /// `immediate` revokes access now. Otherwise `auto_renew` is cleared and
    /// the subscription lapses naturally when the renewal sweep finds its
    /// period expired with nothing to renew.
    pub async fn cancel_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        immediate: bool,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let sub = self.load_subscription(subscription_id).await?;
        if sub.user_id != user_id {
            return Err(BillingError::NotOwner.into());
        }
        if sub.status.is_terminal() {
            return Err(BillingError::AlreadyCancelled.into());
        }

        let mut cancelled = sub.clone();
        if immediate {
            cancelled.status = SubscriptionStatus::Cancelled;
            cancelled.cancelled_at = Some(now);
            cancelled.auto_renew = false;
            cancelled.next_retry_at = None;
        } else {
            if !sub.auto_renew {
                return Err(BillingError::AlreadyCancelled.into());
            }
            cancelled.auto_renew = false;
            // No more charges: a suspended row must not be retried into a
            // period the holder no longer wants.
            cancelled.next_retry_at = None;
        }

        let stored = self.storage.update_subscription(&cancelled, sub.version).await?;
        tracing::info!(subscription_id, user_id, immediate, "subscription cancelled");
        Ok(stored)
    }

    /// All of a user's subscription rows, terminal ones included.
    pub async fn list_user_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>> {
        self.storage.list_subscriptions_by_user(user_id).await
    }

    async fn load_tier(&self, tier_id: &str) -> Result<Tier> {
        self.storage
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::TierNotFound(tier_id.to_string()).into())
    }

    async fn load_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        self.storage
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()).into())
    }
}

// Keeps the public surface honest about what callers may pass.
impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
