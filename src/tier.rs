//! Provider-defined subscription tiers and the catalog operations
//!
//! Tiers are immutable once referenced by an active subscription except for
//! `active` and descriptive fields; a price edit only ever affects future
//! billing cycles because renewal re-reads the current tier row. Deactivating
//! a tier never revokes already-paid access: it switches every live
//! subscriber to `auto_renew = false` so nobody is silently re-billed
//! against a retired tier.

use crate::amount::Amount;
use crate::clock::Clock;
use crate::storage::BillingStorage;
use crate::subscription::SubscriptionStatus;
use crate::{BillingError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A provider-defined subscription plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub tier_id: String,
    pub provider_id: String,
    pub name: String,
    pub description: String,
    /// Monthly price in currency-agnostic units.
    pub price: Amount,
    pub benefits: Vec<String>,
    /// None = unlimited daily signal access.
    pub daily_signal_limit: Option<u32>,
    pub active: bool,
    /// Platform commission percentage charged on every settlement.
    pub commission_pct: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a tier.
#[derive(Debug, Clone, Default)]
pub struct TierSpec {
    pub name: String,
    pub description: String,
    pub price: Amount,
    pub benefits: Vec<String>,
    pub daily_signal_limit: Option<u32>,
    /// Defaults to the platform-wide commission when absent.
    pub commission_pct: Option<Decimal>,
}

/// Partial update for a tier; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TierPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Amount>,
    pub benefits: Option<Vec<String>>,
    pub daily_signal_limit: Option<Option<u32>>,
    pub active: Option<bool>,
}

impl Tier {
    pub fn new(provider_id: impl Into<String>, spec: TierSpec, now: i64) -> Self {
        Self {
            tier_id: format!("tier_{}", uuid::Uuid::new_v4()),
            provider_id: provider_id.into(),
            name: spec.name,
            description: spec.description,
            price: spec.price,
            benefits: spec.benefits,
            daily_signal_limit: spec.daily_signal_limit,
            active: true,
            commission_pct: spec.commission_pct.unwrap_or(dec!(20)),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: TierPatch, now: i64) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(benefits) = patch.benefits {
            self.benefits = benefits;
        }
        if let Some(limit) = patch.daily_signal_limit {
            self.daily_signal_limit = limit;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        self.updated_at = now;
    }
}

/// Owner-checked tier operations.
pub struct TierCatalog {
    storage: Arc<dyn BillingStorage>,
    clock: Arc<dyn Clock>,
    default_commission_pct: Decimal,
}

impl TierCatalog {
    pub fn new(
        storage: Arc<dyn BillingStorage>,
        clock: Arc<dyn Clock>,
        default_commission_pct: Decimal,
    ) -> Self {
        Self {
            storage,
            clock,
            default_commission_pct,
        }
    }

    pub async fn create_tier(&self, provider_id: &str, mut spec: TierSpec) -> Result<Tier> {
        if spec.name.is_empty() {
            return Err(BillingError::InvalidArgument("tier name cannot be empty".into()).into());
        }
        if spec.commission_pct.is_none() {
            spec.commission_pct = Some(self.default_commission_pct);
        }
        let tier = Tier::new(provider_id, spec, self.clock.now());
        self.storage.insert_tier(&tier).await?;
        tracing::info!(tier_id = %tier.tier_id, provider_id, price = %tier.price, "tier created");
        Ok(tier)
    }

    pub async fn get_tier(&self, tier_id: &str) -> Result<Tier> {
        self.storage
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::TierNotFound(tier_id.to_string()).into())
    }

    /// Apply a patch; only the owning provider may update a tier.
    ///
    /// Deactivation fans out to the tier's live subscribers: each keeps its
    /// status and paid-through access but stops auto-renewing.
    pub async fn update_tier(
        &self,
        provider_id: &str,
        tier_id: &str,
        patch: TierPatch,
    ) -> Result<Tier> {
        let mut tier = self.get_tier(tier_id).await?;
        if tier.provider_id != provider_id {
            return Err(BillingError::NotOwner.into());
        }

        let deactivating = tier.active && patch.active == Some(false);
        tier.apply(patch, self.clock.now());
        self.storage.update_tier(&tier).await?;

        if deactivating {
            self.disable_auto_renew_for(&tier).await?;
        }
        Ok(tier)
    }

    pub async fn list_active_tiers(&self, provider_id: &str) -> Result<Vec<Tier>> {
        let tiers = self.storage.list_tiers_by_provider(provider_id).await?;
        Ok(tiers.into_iter().filter(|t| t.active).collect())
    }

    /// All of a provider's tiers, including retired ones, for the
    /// provider's own dashboard.
    pub async fn list_all_tiers(&self, provider_id: &str) -> Result<Vec<Tier>> {
        self.storage.list_tiers_by_provider(provider_id).await
    }

    async fn disable_auto_renew_for(&self, tier: &Tier) -> Result<()> {
        let subs = self.storage.list_subscriptions_by_tier(&tier.tier_id).await?;
        let mut switched = 0u32;
        for sub in subs {
            if sub.status != SubscriptionStatus::Active || !sub.auto_renew {
                continue;
            }
            // A racing sweep may bump the version; re-read and retry.
            let mut current = sub;
            for _ in 0..3 {
                let mut updated = current.clone();
                updated.auto_renew = false;
                match self
                    .storage
                    .update_subscription(&updated, current.version)
                    .await
                {
                    Ok(_) => {
                        switched += 1;
                        break;
                    }
                    Err(_) => {
                        match self
                            .storage
                            .get_subscription(&current.subscription_id)
                            .await?
                        {
                            Some(fresh) if fresh.status == SubscriptionStatus::Active => {
                                current = fresh;
                            }
                            _ => break,
                        }
                    }
                }
            }
        }
        tracing::info!(tier_id = %tier.tier_id, switched, "tier deactivated, auto-renew cleared");
        Ok(())
    }
}
