//! Subscription-backed access checks
//!
//! The gate answers one question: may this user read this provider's
//! signals right now? It never returns an error; anything that prevents a
//! confident yes (missing subscription, lapsed period, storage trouble)
//! comes back as a structured denial so callers can render a precise
//! message without parsing strings.
//!
//! Tiers form a price-ordered hierarchy per provider: a subscription
//! grants every resource gated at or below its tier's price.

use crate::clock::Clock;
use crate::storage::BillingStorage;
use crate::subscription::Subscription;
use crate::tier::Tier;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NoActiveSubscription,
    TierInsufficient,
    DailyLimitReached,
    /// A collaborator failed; the gate fails closed.
    Unavailable,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DenialReason::NoActiveSubscription => "no active subscription",
            DenialReason::TierInsufficient => "tier does not include this resource",
            DenialReason::DailyLimitReached => "daily limit reached",
            DenialReason::Unavailable => "access check unavailable",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Per-user, per-provider access tally for metered tiers.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    /// Accesses recorded for this user against this provider since the
    /// start of the current UTC day.
    async fn count_accesses_today(
        &self,
        user_id: &str,
        provider_id: &str,
        now: i64,
    ) -> Result<u32>;
}

pub struct AccessGate {
    storage: Arc<dyn BillingStorage>,
    clock: Arc<dyn Clock>,
    usage: Option<Arc<dyn UsageCounter>>,
}

impl AccessGate {
    pub fn new(storage: Arc<dyn BillingStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            usage: None,
        }
    }

    /// Enable daily-limit enforcement for tiers that carry one.
    pub fn with_usage_counter(mut self, usage: Arc<dyn UsageCounter>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Decide whether `user_id` may access `provider_id`'s signals.
    ///
    /// `required_tier_id` gates resources restricted to a specific tier or
    /// above; `None` means any live subscription to the provider suffices.
    pub async fn can_access(
        &self,
        user_id: &str,
        provider_id: &str,
        required_tier_id: Option<&str>,
    ) -> AccessDecision {
        let now = self.clock.now();

        let best = match self.best_live_subscription(user_id, provider_id, now).await {
            Ok(Some(best)) => best,
            Ok(None) => return AccessDecision::deny(DenialReason::NoActiveSubscription),
            Err(e) => {
                tracing::warn!(user_id, provider_id, error = %e,
                    "access check failed, denying");
                return AccessDecision::deny(DenialReason::Unavailable);
            }
        };
        let (_, tier) = best;

        if let Some(required_id) = required_tier_id {
            if required_id != tier.tier_id {
                let required = match self.storage.get_tier(required_id).await {
                    Ok(Some(required)) => required,
                    Ok(None) => return AccessDecision::deny(DenialReason::TierInsufficient),
                    Err(e) => {
                        tracing::warn!(user_id, required_id, error = %e,
                            "access check failed, denying");
                        return AccessDecision::deny(DenialReason::Unavailable);
                    }
                };
                if tier.price < required.price {
                    return AccessDecision::deny(DenialReason::TierInsufficient);
                }
            }
        }

        if let (Some(limit), Some(usage)) = (tier.daily_signal_limit, self.usage.as_ref()) {
            let used = match usage.count_accesses_today(user_id, provider_id, now).await {
                Ok(used) => used,
                Err(e) => {
                    tracing::warn!(user_id, provider_id, error = %e,
                        "usage counter failed, denying");
                    return AccessDecision::deny(DenialReason::Unavailable);
                }
            };
            if used >= limit {
                return AccessDecision::deny(DenialReason::DailyLimitReached);
            }
        }

        AccessDecision::allow()
    }

    /// The user's highest-priced live subscription to this provider,
    /// paired with its tier.
    async fn best_live_subscription(
        &self,
        user_id: &str,
        provider_id: &str,
        now: i64,
    ) -> Result<Option<(Subscription, Tier)>> {
        let subs = self.storage.list_subscriptions_by_user(user_id).await?;
        let mut best: Option<(Subscription, Tier)> = None;
        for sub in subs {
            if sub.provider_id != provider_id || !sub.is_live(now) {
                continue;
            }
            let tier = match self.storage.get_tier(&sub.tier_id).await? {
                Some(tier) => tier,
                None => continue,
            };
            let better = match &best {
                Some((_, current)) => tier.price > current.price,
                None => true,
            };
            if better {
                best = Some((sub, tier));
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::clock::ManualClock;
    use crate::config::SECS_PER_DAY;
    use crate::storage::MemoryBillingStorage;
    use crate::subscription::SubscriptionStatus;
    use crate::tier::TierSpec;

    struct FixedUsage(u32);

    #[async_trait]
    impl UsageCounter for FixedUsage {
        async fn count_accesses_today(&self, _u: &str, _p: &str, _now: i64) -> Result<u32> {
            Ok(self.0)
        }
    }

    struct BrokenUsage;

    #[async_trait]
    impl UsageCounter for BrokenUsage {
        async fn count_accesses_today(&self, _u: &str, _p: &str, _now: i64) -> Result<u32> {
            anyhow::bail!("counter store offline")
        }
    }

    struct Fixture {
        storage: Arc<MemoryBillingStorage>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        Fixture {
            storage: Arc::new(MemoryBillingStorage::new()),
            clock: Arc::new(ManualClock::new(1_000_000)),
        }
    }

    impl Fixture {
        fn gate(&self) -> AccessGate {
            AccessGate::new(self.storage.clone(), self.clock.clone())
        }

        async fn tier(&self, provider: &str, price: i64, limit: Option<u32>) -> Tier {
            let tier = Tier::new(
                provider,
                TierSpec {
                    name: format!("tier-{}", price),
                    description: "signals".into(),
                    price: Amount::from_units(price),
                    benefits: vec![],
                    daily_signal_limit: limit,
                    commission_pct: None,
                },
                self.clock.now(),
            );
            self.storage.insert_tier(&tier).await.unwrap();
            tier
        }

        async fn active_sub(&self, user: &str, tier: &Tier) -> Subscription {
            let mut sub = Subscription::pending(
                user,
                tier,
                "payer",
                true,
                self.clock.now(),
                30 * SECS_PER_DAY,
            );
            sub.record_payment("settle_1", self.clock.now());
            self.storage.insert_subscription(&sub).await.unwrap();
            sub
        }
    }

    #[tokio::test]
    async fn live_subscription_grants_access() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, None).await;
        f.active_sub("u1", &tier).await;

        let decision = f.gate().can_access("u1", "prov_1", None).await;
        assert_eq!(decision, AccessDecision::allow());
    }

    #[tokio::test]
    async fn no_subscription_is_denied() {
        let f = fixture();
        let decision = f.gate().can_access("u1", "prov_1", None).await;
        assert_eq!(
            decision,
            AccessDecision::deny(DenialReason::NoActiveSubscription)
        );
        assert_eq!(
            decision.reason.unwrap().to_string(),
            "no active subscription"
        );
    }

    #[tokio::test]
    async fn other_providers_subscription_does_not_count() {
        let f = fixture();
        let tier = f.tier("prov_2", 1000, None).await;
        f.active_sub("u1", &tier).await;

        let decision = f.gate().can_access("u1", "prov_1", None).await;
        assert_eq!(
            decision,
            AccessDecision::deny(DenialReason::NoActiveSubscription)
        );
    }

    #[tokio::test]
    async fn lapsed_period_is_denied() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, None).await;
        f.active_sub("u1", &tier).await;

        f.clock.advance(31 * SECS_PER_DAY);
        let decision = f.gate().can_access("u1", "prov_1", None).await;
        assert_eq!(
            decision,
            AccessDecision::deny(DenialReason::NoActiveSubscription)
        );
    }

    #[tokio::test]
    async fn suspended_subscription_is_denied() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, None).await;
        let mut sub = f.active_sub("u1", &tier).await;
        sub.status = SubscriptionStatus::Suspended;
        f.storage
            .update_subscription(&sub, sub.version)
            .await
            .unwrap();

        let decision = f.gate().can_access("u1", "prov_1", None).await;
        assert_eq!(
            decision,
            AccessDecision::deny(DenialReason::NoActiveSubscription)
        );
    }

    #[tokio::test]
    async fn cheaper_tier_cannot_reach_pricier_resource() {
        let f = fixture();
        let basic = f.tier("prov_1", 500, None).await;
        let premium = f.tier("prov_1", 2000, None).await;
        f.active_sub("u1", &basic).await;

        let decision = f
            .gate()
            .can_access("u1", "prov_1", Some(&premium.tier_id))
            .await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::TierInsufficient));
    }

    #[tokio::test]
    async fn pricier_tier_reaches_cheaper_resource() {
        let f = fixture();
        let basic = f.tier("prov_1", 500, None).await;
        let premium = f.tier("prov_1", 2000, None).await;
        f.active_sub("u1", &premium).await;

        let decision = f
            .gate()
            .can_access("u1", "prov_1", Some(&basic.tier_id))
            .await;
        assert_eq!(decision, AccessDecision::allow());
    }

    #[tokio::test]
    async fn highest_priced_live_subscription_wins() {
        let f = fixture();
        let basic = f.tier("prov_1", 500, None).await;
        let premium = f.tier("prov_1", 2000, None).await;
        f.active_sub("u1", &basic).await;
        f.active_sub("u1", &premium).await;

        let decision = f
            .gate()
            .can_access("u1", "prov_1", Some(&premium.tier_id))
            .await;
        assert_eq!(decision, AccessDecision::allow());
    }

    #[tokio::test]
    async fn daily_limit_blocks_at_cap() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, Some(5)).await;
        f.active_sub("u1", &tier).await;

        let gate = f.gate().with_usage_counter(Arc::new(FixedUsage(5)));
        let decision = gate.can_access("u1", "prov_1", None).await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::DailyLimitReached));

        let gate = f.gate().with_usage_counter(Arc::new(FixedUsage(4)));
        let decision = gate.can_access("u1", "prov_1", None).await;
        assert_eq!(decision, AccessDecision::allow());
    }

    #[tokio::test]
    async fn unlimited_tier_ignores_usage() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, None).await;
        f.active_sub("u1", &tier).await;

        let gate = f.gate().with_usage_counter(Arc::new(FixedUsage(10_000)));
        let decision = gate.can_access("u1", "prov_1", None).await;
        assert_eq!(decision, AccessDecision::allow());
    }

    #[tokio::test]
    async fn broken_usage_counter_fails_closed() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, Some(5)).await;
        f.active_sub("u1", &tier).await;

        let gate = f.gate().with_usage_counter(Arc::new(BrokenUsage));
        let decision = gate.can_access("u1", "prov_1", None).await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::Unavailable));
    }

    #[tokio::test]
    async fn unknown_required_tier_is_denied() {
        let f = fixture();
        let tier = f.tier("prov_1", 1000, None).await;
        f.active_sub("u1", &tier).await;

        let decision = f
            .gate()
            .can_access("u1", "prov_1", Some("tier_missing"))
            .await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::TierInsufficient));
    }
}
