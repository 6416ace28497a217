//! Persistence seam for tiers and subscription rows
//!
//! Two tables, as the billing core models them: tier definitions and
//! subscription rows. `update_subscription` is a compare-and-swap on the
//! row's version column; every writer (lifecycle call or sweep) claims a row
//! by winning that CAS, which is what keeps a subscribe/cancel from racing a
//! renewal sweep on the same row.
//!
//! `MemoryBillingStorage` backs tests; `FileBillingStorage` persists one
//! JSON file per row and holds an exclusive file lock across the CAS.

use crate::subscription::Subscription;
use crate::tier::Tier;
use crate::{BillingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[async_trait]
pub trait BillingStorage: Send + Sync {
    // Tiers
    async fn insert_tier(&self, tier: &Tier) -> Result<()>;
    async fn update_tier(&self, tier: &Tier) -> Result<()>;
    async fn get_tier(&self, tier_id: &str) -> Result<Option<Tier>>;
    async fn list_tiers_by_provider(&self, provider_id: &str) -> Result<Vec<Tier>>;

    // Subscriptions
    async fn insert_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>>;
    /// Store `sub` if the stored row still carries `expected_version`.
    /// Returns the stored row with its bumped version. Fails with
    /// [`BillingError::Conflict`] when another writer got there first.
    async fn update_subscription(
        &self,
        sub: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription>;
    async fn list_subscriptions_by_user(&self, user_id: &str) -> Result<Vec<Subscription>>;
    async fn list_subscriptions_by_tier(&self, tier_id: &str) -> Result<Vec<Subscription>>;
    async fn list_subscriptions_by_provider(&self, provider_id: &str)
        -> Result<Vec<Subscription>>;

    // Sweep query windows
    /// `active ∧ auto_renew ∧ current_period_end ≤ now`.
    async fn due_for_renewal(&self, now: i64) -> Result<Vec<Subscription>>;
    /// `active ∧ auto_renew ∧ current_period_end ∈ (now, now + window]`.
    async fn due_for_notice(&self, now: i64, window_secs: i64) -> Result<Vec<Subscription>>;
    /// `suspended ∧ next_retry_at ≤ now`.
    async fn due_for_retry(&self, now: i64) -> Result<Vec<Subscription>>;
}

/// In-memory storage for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryBillingStorage {
    tiers: Mutex<HashMap<String, Tier>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl MemoryBillingStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStorage for MemoryBillingStorage {
    async fn insert_tier(&self, tier: &Tier) -> Result<()> {
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        tiers.insert(tier.tier_id.clone(), tier.clone());
        Ok(())
    }

    async fn update_tier(&self, tier: &Tier) -> Result<()> {
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        if !tiers.contains_key(&tier.tier_id) {
            return Err(BillingError::TierNotFound(tier.tier_id.clone()).into());
        }
        tiers.insert(tier.tier_id.clone(), tier.clone());
        Ok(())
    }

    async fn get_tier(&self, tier_id: &str) -> Result<Option<Tier>> {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tiers.get(tier_id).cloned())
    }

    async fn list_tiers_by_provider(&self, provider_id: &str) -> Result<Vec<Tier>> {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tiers
            .values()
            .filter(|t| t.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if subs.contains_key(&sub.subscription_id) {
            return Err(BillingError::Storage(format!(
                "duplicate subscription id {}",
                sub.subscription_id
            ))
            .into());
        }
        subs.insert(sub.subscription_id.clone(), sub.clone());
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.get(subscription_id).cloned())
    }

    async fn update_subscription(
        &self,
        sub: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription> {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let stored = subs
            .get(&sub.subscription_id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(sub.subscription_id.clone()))?;
        if stored.version != expected_version {
            return Err(BillingError::Conflict(sub.subscription_id.clone()).into());
        }
        let mut updated = sub.clone();
        updated.version = expected_version + 1;
        subs.insert(updated.subscription_id.clone(), updated.clone());
        Ok(updated)
    }

    async fn list_subscriptions_by_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_by_tier(&self, tier_id: &str) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.tier_id == tier_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn due_for_renewal(&self, now: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.due_for_renewal(now))
            .cloned()
            .collect())
    }

    async fn due_for_notice(&self, now: i64, window_secs: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.within_notice_window(now, window_secs))
            .cloned()
            .collect())
    }

    async fn due_for_retry(&self, now: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.due_for_retry(now))
            .cloned()
            .collect())
    }
}

/// File-backed storage: one pretty-printed JSON file per row, an in-memory
/// cache for queries, and an exclusive file lock held across the version
/// compare-and-swap.
pub struct FileBillingStorage {
    base_path: PathBuf,
    tiers: Mutex<HashMap<String, Tier>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl FileBillingStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("tiers"))?;
        std::fs::create_dir_all(base_path.join("subscriptions"))?;

        let storage = Self {
            base_path,
            tiers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        };
        storage.warm_caches()?;
        Ok(storage)
    }

    fn tier_path(&self, tier_id: &str) -> PathBuf {
        self.base_path.join("tiers").join(format!("{}.json", tier_id))
    }

    fn subscription_path(&self, subscription_id: &str) -> PathBuf {
        self.base_path
            .join("subscriptions")
            .join(format!("{}.json", subscription_id))
    }

    fn warm_caches(&self) -> Result<()> {
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        for entry in std::fs::read_dir(self.base_path.join("tiers"))? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let tier: Tier = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            tiers.insert(tier.tier_id.clone(), tier);
        }
        drop(tiers);

        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        for entry in std::fs::read_dir(self.base_path.join("subscriptions"))? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let sub: Subscription = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            subs.insert(sub.subscription_id.clone(), sub);
        }
        Ok(())
    }

    fn write_tier(&self, tier: &Tier) -> Result<()> {
        let json = serde_json::to_string_pretty(tier)?;
        std::fs::write(self.tier_path(&tier.tier_id), json)?;
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        tiers.insert(tier.tier_id.clone(), tier.clone());
        Ok(())
    }

    fn write_subscription(&self, sub: &Subscription) -> Result<()> {
        let json = serde_json::to_string_pretty(sub)?;
        std::fs::write(self.subscription_path(&sub.subscription_id), json)?;
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.insert(sub.subscription_id.clone(), sub.clone());
        Ok(())
    }
}

#[async_trait]
impl BillingStorage for FileBillingStorage {
    async fn insert_tier(&self, tier: &Tier) -> Result<()> {
        self.write_tier(tier)
    }

    async fn update_tier(&self, tier: &Tier) -> Result<()> {
        if !self.tier_path(&tier.tier_id).exists() {
            return Err(BillingError::TierNotFound(tier.tier_id.clone()).into());
        }
        self.write_tier(tier)
    }

    async fn get_tier(&self, tier_id: &str) -> Result<Option<Tier>> {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tiers.get(tier_id).cloned())
    }

    async fn list_tiers_by_provider(&self, provider_id: &str) -> Result<Vec<Tier>> {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tiers
            .values()
            .filter(|t| t.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
        if self.subscription_path(&sub.subscription_id).exists() {
            return Err(BillingError::Storage(format!(
                "duplicate subscription id {}",
                sub.subscription_id
            ))
            .into());
        }
        self.write_subscription(sub)
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.get(subscription_id).cloned())
    }

    async fn update_subscription(
        &self,
        sub: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription> {
        use fs2::FileExt;
        use std::fs::OpenOptions;

        let path = self.subscription_path(&sub.subscription_id);
        if !path.exists() {
            return Err(BillingError::SubscriptionNotFound(sub.subscription_id.clone()).into());
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.lock_exclusive()?;

        let result = (|| -> Result<Subscription> {
            let stored: Subscription = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            if stored.version != expected_version {
                return Err(BillingError::Conflict(sub.subscription_id.clone()).into());
            }
            let mut updated = sub.clone();
            updated.version = expected_version + 1;
            let json = serde_json::to_string_pretty(&updated)?;
            std::fs::write(&path, json)?;

            let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.insert(updated.subscription_id.clone(), updated.clone());
            Ok(updated)
        })();

        file.unlock()?;
        result
    }

    async fn list_subscriptions_by_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_by_tier(&self, tier_id: &str) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.tier_id == tier_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn due_for_renewal(&self, now: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.due_for_renewal(now))
            .cloned()
            .collect())
    }

    async fn due_for_notice(&self, now: i64, window_secs: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.within_notice_window(now, window_secs))
            .cloned()
            .collect())
    }

    async fn due_for_retry(&self, now: i64) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.due_for_retry(now))
            .cloned()
            .collect())
    }
}
