//! Renewal notice delivery contract
//!
//! Delivery channel and content are external concerns; the notice sweep
//! fires these and forgets them. Notifier errors are logged by the sweep,
//! never propagated.

use crate::Result;
use async_trait::async_trait;

/// Payload handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalNotice {
    pub user_id: String,
    pub tier_name: String,
    pub provider_id: String,
    /// When the subscription renews (current period end, epoch seconds).
    pub renews_at: i64,
}

#[async_trait]
pub trait RenewalNotifier: Send + Sync {
    async fn renewal_due(&self, notice: &RenewalNotice) -> Result<()>;
}

/// Discards notices; useful where delivery is wired up elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl RenewalNotifier for NoopNotifier {
    async fn renewal_due(&self, _notice: &RenewalNotice) -> Result<()> {
        Ok(())
    }
}
