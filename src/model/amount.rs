use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, iter::Sum, str::FromStr};
use thiserror::Error;

/// Precision used when writing USD values.
pub(crate) const USD_DIGITS: u32 = 2;

#[derive(Debug, Error)]
pub enum ConvertAmountError {
    /// Unable to parse decimal string.
    #[error("Unable to parse decimal string")]
    Decimal(#[from] rust_decimal::Error),

    /// Quantities are never negative.
    #[error("Negative quantity: {0}")]
    NegativeQuantity(Decimal),
}

/// A signed cash amount in US dollars.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UsdAmount(Decimal);

/// A count of shares or option contracts. Fractional shares are allowed.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

macro_rules! impl_math_ops {
    ($name:ident) => {
        impl ::std::ops::Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl ::std::ops::AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl ::std::ops::Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl ::std::ops::SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, |acc, x| acc + x)
            }
        }

        impl From<Decimal> for $name {
            fn from(value: Decimal) -> Self {
                Self(value)
            }
        }
    };
}

impl_math_ops!(UsdAmount);
impl_math_ops!(Quantity);

impl ::std::ops::Neg for UsdAmount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl FromStr for UsdAmount {
    type Err = ConvertAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl FromStr for Quantity {
    type Err = ConvertAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount: Decimal = s.parse()?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ConvertAmountError::NegativeQuantity(amount));
        }

        Ok(Self(amount.abs()))
    }
}

impl UsdAmount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Get the absolute value.
    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Total cost of `quantity` units at this per-unit price.
    pub fn times(self, quantity: Quantity) -> Self {
        Self(self.0 * quantity.0)
    }

    /// Per-unit price when this amount buys `quantity` units.
    ///
    /// Returns `None` for a zero quantity.
    pub fn per_unit(self, quantity: Quantity) -> Option<Self> {
        self.0.checked_div(quantity.0).map(Self)
    }

    /// The share of this amount attributable to `part` out of `whole` units.
    ///
    /// A zero `whole` attributes nothing.
    pub fn prorate(self, part: Quantity, whole: Quantity) -> Self {
        if part == whole {
            return self;
        }

        (self.0 * part.0)
            .checked_div(whole.0)
            .map(Self)
            .unwrap_or_default()
    }
}

impl Quantity {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Get the minimum between two [`Quantity`]s.
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Banker's rounding, the `Decimal` default. Internal values are never rounded; only the
        // printed value is.
        //
        // SEE: https://docs.rs/rust_decimal/latest/rust_decimal/prelude/enum.RoundingStrategy.html
        let amount = self.0.round_dp(USD_DIGITS);

        write!(f, "{amount:.precision$}", precision = USD_DIGITS as usize)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
