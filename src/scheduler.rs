//! Background billing sweeps
//!
//! Three independently scheduled passes advance subscriptions through time
//! without user interaction:
//!
//! - **Renewal** (daily): charges lapsed auto-renewing subscriptions and
//!   slides their period window forward.
//! - **Notice** (daily): emits renewal notices for periods ending within the
//!   notice window. Read-only.
//! - **Retry** (6-hourly): re-charges suspended subscriptions, or expires
//!   them once the failure cap is reached.
//!
//! Each pass is idempotent: rows it completes move out of its query window,
//! so an immediate re-run is a no-op. A row is claimed with a version
//! compare-and-swap before any charge, so no row is ever owned by two sweeps
//! (or a sweep and a lifecycle call) at once; losing the CAS just means
//! skipping the row. Payment failures inside a sweep are recorded as state
//! transitions and logged, never thrown: one bad row must not abort the
//! pass for the rest.

use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::gateway::{PaymentGateway, SettlementExecutor};
use crate::notify::{RenewalNotice, RenewalNotifier};
use crate::storage::BillingStorage;
use crate::subscription::{Subscription, SubscriptionStatus};
use crate::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Candidate rows the query window returned.
    pub examined: usize,
    pub renewed: usize,
    pub suspended: usize,
    pub expired: usize,
    pub noticed: usize,
    /// Rows lost to a concurrent writer or missing collaborator data.
    pub skipped: usize,
}

enum RowOutcome {
    Renewed,
    Suspended,
    Expired,
    Skipped,
}

impl SweepStats {
    fn absorb(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Renewed => self.renewed += 1,
            RowOutcome::Suspended => self.suspended += 1,
            RowOutcome::Expired => self.expired += 1,
            RowOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Clone)]
pub struct BillingScheduler {
    storage: Arc<dyn BillingStorage>,
    executor: SettlementExecutor,
    notifier: Arc<dyn RenewalNotifier>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
    charge_permits: Arc<Semaphore>,
}

impl BillingScheduler {
    pub fn new(
        storage: Arc<dyn BillingStorage>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn RenewalNotifier>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        let executor = SettlementExecutor::new(
            gateway,
            config.platform_address.clone(),
            config.gateway_timeout,
        );
        let charge_permits = Arc::new(Semaphore::new(config.max_inflight_charges));
        Self {
            storage,
            executor,
            notifier,
            clock,
            config,
            charge_permits,
        }
    }

    /// One renewal pass: `active ∧ auto_renew ∧ period lapsed`.
    pub async fn renewal_sweep(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let candidates = self.storage.due_for_renewal(now).await?;
        let mut stats = self.charge_rows(candidates, now).await;
        stats.examined = stats.renewed + stats.suspended + stats.expired + stats.skipped;
        tracing::info!(
            renewed = stats.renewed,
            suspended = stats.suspended,
            skipped = stats.skipped,
            "renewal sweep complete"
        );
        Ok(stats)
    }

    /// One notice pass: renewal notices for periods ending inside the
    /// window. Never mutates rows; notifier errors are logged and dropped.
    pub async fn notice_sweep(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let candidates = self
            .storage
            .due_for_notice(now, self.config.notice_window_secs)
            .await?;
        let mut stats = SweepStats {
            examined: candidates.len(),
            ..Default::default()
        };

        for sub in candidates {
            let tier = match self.storage.get_tier(&sub.tier_id).await {
                Ok(Some(tier)) => tier,
                _ => {
                    stats.skipped += 1;
                    continue;
                }
            };
            let notice = RenewalNotice {
                user_id: sub.user_id.clone(),
                tier_name: tier.name.clone(),
                provider_id: tier.provider_id.clone(),
                renews_at: sub.current_period_end,
            };
            match self.notifier.renewal_due(&notice).await {
                Ok(()) => stats.noticed += 1,
                Err(e) => {
                    tracing::warn!(subscription_id = %sub.subscription_id, error = %e,
                        "renewal notice delivery failed");
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    /// One retry pass: suspended rows whose retry deadline has elapsed.
    /// Rows at the failure cap expire with no further charge attempt.
    pub async fn retry_sweep(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let candidates = self.storage.due_for_retry(now).await?;
        let examined = candidates.len();

        let mut stats = SweepStats::default();
        let mut chargeable = Vec::new();
        for sub in candidates {
            if sub.payment_failure_count >= self.config.max_payment_failures {
                stats.absorb(self.expire_row(sub).await);
            } else {
                chargeable.push(sub);
            }
        }

        let charged = self.charge_rows(chargeable, now).await;
        stats.renewed += charged.renewed;
        stats.suspended += charged.suspended;
        stats.expired += charged.expired;
        stats.skipped += charged.skipped;
        stats.examined = examined;
        tracing::info!(
            renewed = stats.renewed,
            suspended = stats.suspended,
            expired = stats.expired,
            "retry sweep complete"
        );
        Ok(stats)
    }

    /// Charge a batch of rows with bounded gateway concurrency.
    async fn charge_rows(&self, candidates: Vec<Subscription>, now: i64) -> SweepStats {
        let mut set = JoinSet::new();
        for sub in candidates {
            let sweep = self.clone();
            set.spawn(async move {
                let _permit = match sweep.charge_permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return RowOutcome::Skipped,
                };
                sweep.charge_row(sub, now).await
            });
        }

        let mut stats = SweepStats::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => stats.absorb(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "sweep worker panicked");
                    stats.skipped += 1;
                }
            }
        }
        stats
    }

    /// Renew one row: claim it, charge the current tier price, persist the
    /// result. Shared by the renewal and retry sweeps.
    async fn charge_row(&self, sub: Subscription, now: i64) -> RowOutcome {
        // Claim before charging; a lost CAS means another writer owns the row.
        let claimed = match self.storage.update_subscription(&sub, sub.version).await {
            Ok(row) => row,
            Err(_) => {
                tracing::debug!(subscription_id = %sub.subscription_id,
                    "row claimed by a concurrent writer, skipping");
                return RowOutcome::Skipped;
            }
        };

        // A user can subscribe again while an earlier row sits suspended.
        // Reactivating the old row would leave two active rows for the same
        // (user, tier) and double-bill every cycle after; the newer active
        // row supersedes it.
        if claimed.status == SubscriptionStatus::Suspended {
            let superseded = match self
                .storage
                .list_subscriptions_by_user(&claimed.user_id)
                .await
            {
                Ok(rows) => rows.iter().any(|row| {
                    row.subscription_id != claimed.subscription_id
                        && row.tier_id == claimed.tier_id
                        && row.status == SubscriptionStatus::Active
                }),
                Err(e) => {
                    tracing::warn!(subscription_id = %claimed.subscription_id, error = %e,
                        "supersession check failed, skipping row");
                    return RowOutcome::Skipped;
                }
            };
            if superseded {
                let mut expired = claimed.clone();
                expired.status = SubscriptionStatus::Expired;
                expired.next_retry_at = None;
                tracing::info!(subscription_id = %claimed.subscription_id,
                    "superseded by a newer active subscription, expiring");
                return self.persist(expired, claimed.version, RowOutcome::Expired).await;
            }
        }

        let tier = match self.storage.get_tier(&claimed.tier_id).await {
            Ok(Some(tier)) => tier,
            _ => {
                tracing::warn!(subscription_id = %claimed.subscription_id,
                    tier_id = %claimed.tier_id, "tier missing during sweep");
                return RowOutcome::Skipped;
            }
        };

        if tier.price.is_zero() {
            let mut renewed = claimed.clone();
            renewed.slide_period(now, self.config.period_secs);
            renewed.status = SubscriptionStatus::Active;
            renewed.payment_failure_count = 0;
            renewed.next_retry_at = None;
            return self.persist(renewed, claimed.version, RowOutcome::Renewed).await;
        }

        match self
            .executor
            .charge_split(
                &claimed.payer_address,
                &tier.provider_id,
                &tier.price,
                tier.commission_pct,
            )
            .await
        {
            Ok(settlement) => {
                let mut renewed = claimed.clone();
                renewed.slide_period(now, self.config.period_secs);
                renewed.record_payment(settlement.reference, now);
                tracing::info!(subscription_id = %renewed.subscription_id,
                    amount = %tier.price, "subscription renewed");
                self.persist(renewed, claimed.version, RowOutcome::Renewed).await
            }
            Err(e) => {
                let mut failed = claimed.clone();
                failed.record_failure(now, self.config.retry_backoff_secs);
                tracing::warn!(subscription_id = %failed.subscription_id,
                    failures = failed.payment_failure_count, error = %e,
                    "renewal charge failed, subscription suspended");
                self.persist(failed, claimed.version, RowOutcome::Suspended).await
            }
        }
    }

    async fn expire_row(&self, sub: Subscription) -> RowOutcome {
        let mut expired = sub.clone();
        expired.status = SubscriptionStatus::Expired;
        expired.next_retry_at = None;
        tracing::info!(subscription_id = %sub.subscription_id,
            failures = sub.payment_failure_count, "retries exhausted, subscription expired");
        self.persist(expired, sub.version, RowOutcome::Expired).await
    }

    async fn persist(
        &self,
        sub: Subscription,
        expected_version: u64,
        outcome: RowOutcome,
    ) -> RowOutcome {
        match self.storage.update_subscription(&sub, expected_version).await {
            Ok(_) => outcome,
            Err(e) => {
                tracing::error!(subscription_id = %sub.subscription_id, error = %e,
                    "failed to persist sweep result");
                RowOutcome::Skipped
            }
        }
    }

    /// Run the renewal sweep on its configured cadence, forever.
    pub async fn run_renewal_loop(&self) {
        loop {
            if let Err(e) = self.renewal_sweep().await {
                tracing::error!(error = %e, "renewal sweep failed");
            }
            tokio::time::sleep(self.config.renewal_interval).await;
        }
    }

    /// Run the notice sweep on its configured cadence, forever.
    pub async fn run_notice_loop(&self) {
        loop {
            if let Err(e) = self.notice_sweep().await {
                tracing::error!(error = %e, "notice sweep failed");
            }
            tokio::time::sleep(self.config.notice_interval).await;
        }
    }

    /// Run the retry sweep on its configured cadence, forever.
    pub async fn run_retry_loop(&self) {
        loop {
            if let Err(e) = self.retry_sweep().await {
                tracing::error!(error = %e, "retry sweep failed");
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// Spawn all three sweep loops onto the current runtime.
    pub fn spawn_all(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let renewal = self.clone();
        let notice = self.clone();
        let retry = self.clone();
        vec![
            tokio::spawn(async move { renewal.run_renewal_loop().await }),
            tokio::spawn(async move { notice.run_notice_loop().await }),
            tokio::spawn(async move { retry.run_retry_loop().await }),
        ]
    }
}
