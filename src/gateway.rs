//! Payment gateway contract and split settlement
//!
//! The gateway executes value transfers; it never decides billing policy.
//! Billing code computes the provider/platform split from the tier's
//! commission and runs the two legs as distinct transfers committed as one
//! settlement unit: if either leg fails, the whole charge is reported as
//! failed and retried as a whole. A call that exceeds the configured timeout
//! is a failure, identical to an explicit decline.

use crate::amount::Amount;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("charge declined: {0}")]
    Declined(String),
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Result of a single successful value transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub settlement_ref: String,
    pub amount: Amount,
}

/// External payment rail abstraction.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Transfer `amount` from `payer` to `payee`.
    async fn charge(&self, payer: &str, payee: &str, amount: &Amount)
        -> GatewayResult<ChargeReceipt>;

    /// Check that a settlement reference exists on the rail.
    async fn verify(&self, settlement_ref: &str) -> GatewayResult<bool>;
}

/// Provider/platform split of one settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSplit {
    pub total: Amount,
    pub platform_cut: Amount,
    pub provider_cut: Amount,
}

impl SettlementSplit {
    /// `platform_cut = total × commission / 100`, provider gets the rest.
    pub fn compute(total: Amount, commission_pct: Decimal) -> Self {
        let platform_cut = total.percentage_of(commission_pct);
        let provider_cut = total.checked_sub(&platform_cut).unwrap_or_else(Amount::zero);
        Self {
            total,
            platform_cut,
            provider_cut,
        }
    }
}

/// A fully settled charge: both legs succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Leg references joined into one settlement reference.
    pub reference: String,
    pub total: Amount,
    pub platform_cut: Amount,
    pub provider_cut: Amount,
}

/// Runs split charges against the gateway with a hard per-call timeout.
#[derive(Clone)]
pub struct SettlementExecutor {
    gateway: Arc<dyn PaymentGateway>,
    platform_address: String,
    timeout: Duration,
}

impl SettlementExecutor {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        platform_address: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            platform_address: platform_address.into(),
            timeout,
        }
    }

    /// Charge `amount` from `payer`, split between `provider_address` and
    /// the platform address. All-or-nothing: a failed leg fails the whole
    /// settlement.
    pub async fn charge_split(
        &self,
        payer: &str,
        provider_address: &str,
        amount: &Amount,
        commission_pct: Decimal,
    ) -> GatewayResult<Settlement> {
        let split = SettlementSplit::compute(*amount, commission_pct);
        let mut refs: Vec<String> = Vec::with_capacity(2);

        if split.provider_cut.is_positive() {
            let receipt = self
                .charge_with_timeout(payer, provider_address, &split.provider_cut)
                .await?;
            refs.push(receipt.settlement_ref);
        }

        if split.platform_cut.is_positive() {
            match self
                .charge_with_timeout(payer, &self.platform_address, &split.platform_cut)
                .await
            {
                Ok(receipt) => refs.push(receipt.settlement_ref),
                Err(e) => {
                    // The provider leg may already have settled on the rail;
                    // reversal is the rail operator's concern. Billing treats
                    // the settlement as failed and retries it as a whole.
                    tracing::warn!(payer, provider_address, error = %e,
                        "platform leg failed after provider leg, settlement reported failed");
                    return Err(e);
                }
            }
        }

        Ok(Settlement {
            reference: refs.join("+"),
            total: split.total,
            platform_cut: split.platform_cut,
            provider_cut: split.provider_cut,
        })
    }

    async fn charge_with_timeout(
        &self,
        payer: &str,
        payee: &str,
        amount: &Amount,
    ) -> GatewayResult<ChargeReceipt> {
        match tokio::time::timeout(self.timeout, self.gateway.charge(payer, payee, amount)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    /// Verify a prior settlement against the rail. Leg references are
    /// checked individually; all must exist.
    pub async fn verify(&self, settlement_ref: &str) -> GatewayResult<bool> {
        for leg in settlement_ref.split('+') {
            if !self.gateway.verify(leg).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
