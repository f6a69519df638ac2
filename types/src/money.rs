//! Currency amounts.
//!
//! All amounts are held at two decimal places. Every constructor rounds, so
//! arithmetic between `Money` values never produces sub-cent fractions and
//! `plan_paid + patient_responsibility == allowed` can be checked exactly.
//! Arithmetic saturates at the representable range instead of panicking;
//! inputs are held to [`Money::MAX_CHARGE`] before they reach it.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Largest single charge accepted on input: 99,999,999.99.
    pub const MAX_CHARGE: Money = Money(Decimal::from_parts(1_410_065_407, 2, 0, false, 2));

    #[must_use]
    pub fn new(amount: Decimal) -> Self {
        Self(round_cents(amount))
    }

    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    #[must_use]
    pub const fn amount(self) -> Decimal {
        self.0
    }

    /// Whole number of cents.
    #[must_use]
    pub fn cents(self) -> i64 {
        self.0
            .saturating_mul(Decimal::ONE_HUNDRED)
            .trunc()
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Whether the amount is above [`Money::MAX_CHARGE`].
    #[must_use]
    pub fn exceeds_charge_limit(self) -> bool {
        self > Self::MAX_CHARGE
    }

    /// Subtract, flooring at zero.
    #[must_use]
    pub fn saturating_sub(self, other: Money) -> Money {
        if other >= self { Money::ZERO } else { self - other }
    }

    /// Multiply by a rate (e.g. coinsurance `0.20`), rounding to cents.
    #[must_use]
    pub fn times(self, rate: Decimal) -> Money {
        Money::new(self.0.saturating_mul(rate))
    }
}

fn round_cents(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim().trim_start_matches('$')).map(Self::new)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::new(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money::new(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
