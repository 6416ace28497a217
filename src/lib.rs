//! # Signal Subscriptions Billing Core
//!
//! Time-boxed, paid access to a signal provider's trading output, kept
//! consistent with a recurring billing relationship settled through an
//! external payment rail.
//!
//! Key properties:
//! - Subscription state machine (pending / active / suspended / cancelled / expired)
//! - 30-day billing periods, renewed by background sweeps
//! - Bounded payment retry (fixed 24h backoff, 3 attempts, then terminal expiry)
//! - Pro-rated mid-cycle upgrades
//! - Fast, structured access checks that never throw
//! - Fixed-point decimal arithmetic for all money amounts
//!
//! The payment rail, notification delivery, and daily usage metering are
//! external collaborators behind narrow traits; billing policy lives here.

pub mod access;
pub mod amount;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod manager;
pub mod notify;
pub mod proration;
pub mod revenue;
pub mod scheduler;
pub mod storage;
pub mod subscription;
pub mod tier;

pub use access::{AccessDecision, AccessGate, DenialReason, UsageCounter};
pub use amount::Amount;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BillingConfig;
pub use gateway::{
    ChargeReceipt, GatewayError, GatewayResult, PaymentGateway, Settlement, SettlementExecutor,
    SettlementSplit,
};
pub use manager::LifecycleManager;
pub use notify::{NoopNotifier, RenewalNotice, RenewalNotifier};
pub use revenue::{ProviderRevenue, RevenueAggregator};
pub use scheduler::{BillingScheduler, SweepStats};
pub use storage::{BillingStorage, FileBillingStorage, MemoryBillingStorage};
pub use subscription::{Subscription, SubscriptionStatus};
pub use tier::{Tier, TierCatalog, TierPatch, TierSpec};

pub type Result<T> = anyhow::Result<T>;

#[derive(thiserror::Error, Debug)]
pub enum BillingError {
    #[error("tier not found: {0}")]
    TierNotFound(String),
    #[error("tier is not active: {0}")]
    TierInactive(String),
    #[error("caller does not own this resource")]
    NotOwner,
    #[error("user already holds an active subscription to this tier")]
    DuplicateSubscription,
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("invalid tier change: {0}")]
    InvalidTierChange(String),
    #[error("subscription is already cancelled")]
    AlreadyCancelled,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("concurrent update on subscription {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
