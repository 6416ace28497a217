//! Proration for mid-cycle tier changes
//!
//! An upgrade charges only the price difference over the unused part of the
//! already-paid period: `(new − old) × remaining / total`. Downgrades never
//! refund; the cheaper tier simply takes over for the rest of the period.

use crate::amount::Amount;
use crate::{BillingError, Result};
use rust_decimal::Decimal;

/// Fraction of the period still ahead of `now`, clamped to `[0, 1]`.
///
/// `now` past the period end (a lapsed period the sweep has not yet caught)
/// yields zero rather than an error.
pub fn remaining_fraction(period_start: i64, period_end: i64, now: i64) -> Result<Decimal> {
    if period_end <= period_start {
        return Err(
            BillingError::InvalidArgument("period end must be after period start".into()).into(),
        );
    }
    let total = period_end - period_start;
    let remaining = (period_end - now).clamp(0, total);
    Ok(Decimal::from(remaining) / Decimal::from(total))
}

/// Immediate charge for switching from `old_price` to `new_price` at `now`.
///
/// Zero when the new tier is not more expensive.
pub fn upgrade_charge(
    old_price: &Amount,
    new_price: &Amount,
    period_start: i64,
    period_end: i64,
    now: i64,
) -> Result<Amount> {
    let diff = match new_price.checked_sub(old_price) {
        Some(d) if d.is_positive() => d,
        _ => return Ok(Amount::zero()),
    };
    let fraction = remaining_fraction(period_start, period_end, now)?;
    Ok(Amount::from_decimal(diff.as_decimal() * fraction))
}
