//! Fixed-precision monetary value: all monetary values are
//! fixed-precision decimal, never floating point.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monetary amount backed by `rust_decimal::Decimal`.
///
/// `Money` deliberately does not implement arithmetic beyond what the
/// scoring and matching code needs (`abs_diff`); it exists to keep every
/// amount comparison in the engine free of floating-point error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Builds a `Money` from a `Decimal`.
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Parses a `Money` from a decimal string (e.g. `"42.17"`).
    pub fn parse(s: &str) -> Result<Self, rust_decimal::Error> {
        Decimal::from_str(s).map(Self)
    }

    /// The underlying `Decimal`.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Absolute value.
    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    /// Absolute difference between two amounts.
    pub fn abs_diff(&self, other: &Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    /// Lossy conversion to `f64`, used only for cost-estimate arithmetic
    /// where sub-cent precision is not meaningful.
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Money::new(dec!(42.17));
        let b = Money::new(dec!(-42.17));
        assert_eq!(a.abs_diff(&b.abs()), Money::new(dec!(0)));
    }

    #[test]
    fn parse_roundtrip() {
        let m = Money::parse("19.99").unwrap();
        assert_eq!(m.as_decimal(), dec!(19.99));
    }

    #[test]
    fn ordering_is_numeric() {
        let small = Money::new(dec!(1.00));
        let large = Money::new(dec!(10.00));
        assert!(small < large);
    }
}
