//! Monetary amount type
//!
//! All balances, accruals and withdrawal sums are stored as an unsigned
//! integer count of 0.01-point units. Floating values exist only at the
//! JSON boundary; arithmetic is always on the integer representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

const FACTOR: f64 = 100.0;

/// Unsigned monetary amount in 0.01-point units.
/// The raw value is private to force construction through [`Amount::from_value`]
/// or the raw-unit conversions used at the database boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Convert a client-facing floating value into internal units: `round(value * 100)`.
    pub fn from_value(value: f64) -> Self {
        Self((value * FACTOR).round() as u64)
    }

    /// Convert back to the client-facing floating representation.
    pub fn as_value(&self) -> f64 {
        self.0 as f64 / FACTOR
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl From<u64> for Amount {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl Deref for Amount {
    type Target = u64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_rounds_to_hundredths() {
        assert_eq!(Amount::from_value(0.0).to_raw(), 0);
        assert_eq!(Amount::from_value(1.23).to_raw(), 123);
        assert_eq!(Amount::from_value(123.43).to_raw(), 12343);
        assert_eq!(Amount::from_value(123.433).to_raw(), 12343);
        assert_eq!(Amount::from_value(123.436).to_raw(), 12344);
        assert_eq!(Amount::from_value(729.98).to_raw(), 72998);
    }

    #[test]
    fn roundtrip_law() {
        for value in [0.0, 1.23, 123.43, 123.433, 123.436, 999999.99] {
            let amount = Amount::from_value(value);
            assert_eq!(amount.as_value(), (value * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_raw(100);
        let b = Amount::from_raw(250);

        assert_eq!(b.checked_sub(a), Some(Amount::from_raw(150)));
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.checked_add(b), Some(Amount::from_raw(350)));
        assert_eq!(Amount::from_raw(u64::MAX).checked_add(a), None);
    }

    #[test]
    fn display_is_two_decimals() {
        assert_eq!(Amount::from_raw(12343).to_string(), "123.43");
        assert_eq!(Amount::from_raw(5).to_string(), "0.05");
    }

    #[test]
    fn serde_is_transparent() {
        let amount = Amount::from_raw(123);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "123");
        let back: Amount = serde_json::from_str("123").unwrap();
        assert_eq!(back, amount);
    }
}
