//! Safe financial arithmetic using fixed-point decimal
//!
//! All money in the billing core flows through the [`Amount`] type, a thin
//! wrapper over `rust_decimal::Decimal`. **Never use f64 for financial
//! calculations!**
//!
//! Amounts are currency-agnostic: a unit is whatever the payment rail
//! settles in (cents, sats, token base units). Serialization goes through
//! `Decimal`'s string form so precision survives round-trips.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Financial amount with fixed-point precision.
///
/// # Examples
///
/// ```rust
/// use signal_subscriptions::Amount;
///
/// let price = Amount::from_units(2000);
/// let cut = price.percentage_of(rust_decimal::Decimal::from(20));
/// assert_eq!(cut, Amount::from_units(400));
/// assert_eq!(price.checked_sub(&cut).unwrap(), Amount::from_units(1600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    /// The zero amount.
    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    /// Create from whole units (smallest denomination of the rail).
    pub fn from_units(units: i64) -> Self {
        Self {
            value: Decimal::from(units),
        }
    }

    /// Create from a raw decimal value.
    pub fn from_decimal(value: Decimal) -> Self {
        Self { value }
    }

    /// Create from a decimal string (e.g. "123.45").
    pub fn from_str_checked(s: &str) -> crate::Result<Self> {
        let value = Decimal::from_str(s)
            .map_err(|e| crate::BillingError::InvalidArgument(format!("invalid amount: {}", e)))?;
        Ok(Self { value })
    }

    /// Get the underlying decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    /// Checked addition (None on overflow).
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }

    /// Checked subtraction (None on overflow).
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_sub(other.value)
            .map(|value| Self { value })
    }

    /// Saturating addition (clamps to Decimal::MAX).
    pub fn saturating_add(&self, other: &Self) -> Self {
        self.checked_add(other).unwrap_or(Self {
            value: Decimal::MAX,
        })
    }

    /// `pct` percent of this amount, exact. Saturates to `Decimal::MAX`
    /// on overflow.
    ///
    /// Used for the platform commission split: `price.percentage_of(20)` is
    /// the platform cut of a 20% commission tier.
    pub fn percentage_of(&self, pct: Decimal) -> Self {
        let value = self
            .value
            .checked_mul(pct)
            .and_then(|v| v.checked_div(Decimal::from(100)))
            .unwrap_or(Decimal::MAX);
        Self { value }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
