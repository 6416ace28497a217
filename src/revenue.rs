//! Provider earnings rollup
//!
//! Monthly recurring revenue is derived, not stored: the rollup walks a
//! provider's active subscriptions and re-reads each tier's current price
//! and commission, so a price edit shows up in the next query with no
//! backfill. Reporting never fails a caller; storage trouble degrades to a
//! zeroed summary with a logged warning.

use crate::amount::Amount;
use crate::storage::BillingStorage;
use crate::subscription::SubscriptionStatus;
use std::sync::Arc;

/// One provider's recurring-revenue summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderRevenue {
    /// Gross monthly revenue across active subscriptions.
    pub total_revenue: Amount,
    /// The platform's commission share of that gross.
    pub platform_commission: Amount,
    /// What the provider keeps: gross minus commission.
    pub net_earnings: Amount,
    pub active_subscribers: u32,
}

pub struct RevenueAggregator {
    storage: Arc<dyn BillingStorage>,
}

impl RevenueAggregator {
    pub fn new(storage: Arc<dyn BillingStorage>) -> Self {
        Self { storage }
    }

    /// Roll up the provider's active subscriptions at current tier prices.
    pub async fn provider_revenue(&self, provider_id: &str) -> ProviderRevenue {
        let subs = match self.storage.list_subscriptions_by_provider(provider_id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(provider_id, error = %e, "revenue rollup unavailable");
                return ProviderRevenue::default();
            }
        };

        let mut summary = ProviderRevenue::default();
        for sub in subs {
            if sub.status != SubscriptionStatus::Active {
                continue;
            }
            let tier = match self.storage.get_tier(&sub.tier_id).await {
                Ok(Some(tier)) => tier,
                Ok(None) => {
                    tracing::warn!(subscription_id = %sub.subscription_id,
                        tier_id = %sub.tier_id, "tier missing during revenue rollup");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(subscription_id = %sub.subscription_id, error = %e,
                        "tier read failed during revenue rollup");
                    continue;
                }
            };
            let commission = tier.price.percentage_of(tier.commission_pct);
            summary.total_revenue = summary.total_revenue.saturating_add(&tier.price);
            summary.platform_commission = summary.platform_commission.saturating_add(&commission);
            summary.active_subscribers += 1;
        }
        summary.net_earnings = summary
            .total_revenue
            .checked_sub(&summary.platform_commission)
            .unwrap_or_else(Amount::zero);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SECS_PER_DAY;
    use crate::storage::MemoryBillingStorage;
    use crate::subscription::Subscription;
    use crate::tier::{Tier, TierSpec};
    use rust_decimal_macros::dec;

    async fn seed_tier(
        storage: &MemoryBillingStorage,
        provider: &str,
        price: i64,
        commission_pct: rust_decimal::Decimal,
    ) -> Tier {
        let tier = Tier::new(
            provider,
            TierSpec {
                name: format!("tier-{}", price),
                description: "signals".into(),
                price: Amount::from_units(price),
                benefits: vec![],
                daily_signal_limit: None,
                commission_pct: Some(commission_pct),
            },
            0,
        );
        storage.insert_tier(&tier).await.unwrap();
        tier
    }

    async fn seed_sub(
        storage: &MemoryBillingStorage,
        user: &str,
        tier: &Tier,
        status: SubscriptionStatus,
    ) {
        let mut sub = Subscription::pending(user, tier, "payer", true, 0, 30 * SECS_PER_DAY);
        sub.status = status;
        storage.insert_subscription(&sub).await.unwrap();
    }

    #[tokio::test]
    async fn sums_active_subscriptions_at_current_prices() {
        let storage = Arc::new(MemoryBillingStorage::new());
        let gold = seed_tier(&storage, "prov_1", 2000, dec!(20)).await;
        let silver = seed_tier(&storage, "prov_1", 1000, dec!(20)).await;

        seed_sub(&storage, "u1", &gold, SubscriptionStatus::Active).await;
        seed_sub(&storage, "u2", &gold, SubscriptionStatus::Active).await;
        seed_sub(&storage, "u3", &silver, SubscriptionStatus::Active).await;

        let summary = RevenueAggregator::new(storage).provider_revenue("prov_1").await;
        assert_eq!(summary.active_subscribers, 3);
        assert_eq!(summary.total_revenue, Amount::from_units(5000));
        assert_eq!(summary.platform_commission, Amount::from_units(1000));
        assert_eq!(summary.net_earnings, Amount::from_units(4000));
    }

    #[tokio::test]
    async fn non_active_rows_are_excluded() {
        let storage = Arc::new(MemoryBillingStorage::new());
        let tier = seed_tier(&storage, "prov_1", 1000, dec!(20)).await;

        seed_sub(&storage, "u1", &tier, SubscriptionStatus::Active).await;
        seed_sub(&storage, "u2", &tier, SubscriptionStatus::Suspended).await;
        seed_sub(&storage, "u3", &tier, SubscriptionStatus::Cancelled).await;
        seed_sub(&storage, "u4", &tier, SubscriptionStatus::Expired).await;
        seed_sub(&storage, "u5", &tier, SubscriptionStatus::Pending).await;

        let summary = RevenueAggregator::new(storage).provider_revenue("prov_1").await;
        assert_eq!(summary.active_subscribers, 1);
        assert_eq!(summary.total_revenue, Amount::from_units(1000));
    }

    #[tokio::test]
    async fn price_edits_flow_through_without_backfill() {
        let storage = Arc::new(MemoryBillingStorage::new());
        let mut tier = seed_tier(&storage, "prov_1", 1000, dec!(20)).await;
        seed_sub(&storage, "u1", &tier, SubscriptionStatus::Active).await;

        let aggregator = RevenueAggregator::new(storage.clone());
        assert_eq!(
            aggregator.provider_revenue("prov_1").await.total_revenue,
            Amount::from_units(1000)
        );

        tier.price = Amount::from_units(1500);
        storage.update_tier(&tier).await.unwrap();
        assert_eq!(
            aggregator.provider_revenue("prov_1").await.total_revenue,
            Amount::from_units(1500)
        );
    }

    #[tokio::test]
    async fn per_tier_commission_rates_apply() {
        let storage = Arc::new(MemoryBillingStorage::new());
        let standard = seed_tier(&storage, "prov_1", 1000, dec!(20)).await;
        let negotiated = seed_tier(&storage, "prov_1", 1000, dec!(10)).await;

        seed_sub(&storage, "u1", &standard, SubscriptionStatus::Active).await;
        seed_sub(&storage, "u2", &negotiated, SubscriptionStatus::Active).await;

        let summary = RevenueAggregator::new(storage).provider_revenue("prov_1").await;
        assert_eq!(summary.platform_commission, Amount::from_units(300));
        assert_eq!(summary.net_earnings, Amount::from_units(1700));
    }

    #[tokio::test]
    async fn no_subscribers_rolls_up_to_zero() {
        let storage = Arc::new(MemoryBillingStorage::new());
        let summary = RevenueAggregator::new(storage).provider_revenue("prov_1").await;
        assert_eq!(summary, ProviderRevenue::default());
    }
}
