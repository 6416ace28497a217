//! Billing configuration
//!
//! One explicit value passed at construction; no mutable globals. The
//! defaults encode the product policy: 30-day periods, daily renewal and
//! notice sweeps, 6-hourly retry sweeps with a fixed 24h backoff and a hard
//! cap of 3 attempts before terminal expiry.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

pub const SECS_PER_DAY: i64 = 86_400;

/// Configuration for the billing core.
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Length of one paid period in seconds (30 days).
    pub period_secs: i64,
    /// Backoff between payment retries in seconds (fixed, no jitter).
    pub retry_backoff_secs: i64,
    /// Consecutive payment failures before terminal expiry.
    pub max_payment_failures: u32,
    /// How far ahead of period end renewal notices go out.
    pub notice_window_secs: i64,
    /// Interval between renewal sweep passes.
    pub renewal_interval: Duration,
    /// Interval between notice sweep passes.
    pub notice_interval: Duration,
    /// Interval between retry sweep passes.
    pub retry_interval: Duration,
    /// Cap on concurrent in-flight gateway charges within one sweep.
    pub max_inflight_charges: usize,
    /// A gateway call slower than this is treated as a failed charge.
    pub gateway_timeout: Duration,
    /// Commission applied when a tier does not set its own.
    pub default_commission_pct: Decimal,
    /// Payment-rail address receiving the platform's cut.
    pub platform_address: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period_secs: 30 * SECS_PER_DAY,
            retry_backoff_secs: SECS_PER_DAY,
            max_payment_failures: 3,
            notice_window_secs: 3 * SECS_PER_DAY,
            renewal_interval: Duration::from_secs(SECS_PER_DAY as u64),
            notice_interval: Duration::from_secs(SECS_PER_DAY as u64),
            retry_interval: Duration::from_secs(6 * 3600),
            max_inflight_charges: 8,
            gateway_timeout: Duration::from_secs(30),
            default_commission_pct: dec!(20),
            platform_address: "platform".to_string(),
        }
    }
}

impl BillingConfig {
    pub fn new(platform_address: impl Into<String>) -> Self {
        Self {
            platform_address: platform_address.into(),
            ..Default::default()
        }
    }

    pub fn with_period_secs(mut self, secs: i64) -> Self {
        self.period_secs = secs;
        self
    }

    pub fn with_retry_backoff_secs(mut self, secs: i64) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn with_max_payment_failures(mut self, max: u32) -> Self {
        self.max_payment_failures = max;
        self
    }

    pub fn with_notice_window_secs(mut self, secs: i64) -> Self {
        self.notice_window_secs = secs;
        self
    }

    pub fn with_max_inflight_charges(mut self, max: usize) -> Self {
        self.max_inflight_charges = max.max(1);
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn with_default_commission_pct(mut self, pct: Decimal) -> Self {
        self.default_commission_pct = pct;
        self
    }
}
