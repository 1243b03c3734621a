//! 18-decimal fixed-point amounts.
//!
//! [`Amount`] wraps a raw `u128` count of the smallest unit
//! (1 token = [`UNIT`](crate::constants::UNIT) raw units). Arithmetic never
//! rounds intermediate state: addition and subtraction are exact (checked or
//! saturating), division truncates toward zero, and [`Amount::mul_div`]
//! carries the product in 256 bits before dividing.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::constants::{DECIMALS, UNIT};

/// Fixed-point quantity with 18 decimals.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Amount(u128);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self(0);
    /// One whole token.
    pub const ONE: Self = Self(UNIT);
    /// Largest representable amount.
    pub const MAX: Self = Self(u128::MAX);

    /// Wrap a raw unit count.
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// The raw unit count.
    pub const fn raw(self) -> u128 {
        self.0
    }

    /// Whole tokens, scaled by 10^18.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::fixed::Amount;
    /// assert_eq!(Amount::from_tokens(3).raw(), 3_000_000_000_000_000_000);
    /// ```
    pub fn from_tokens(tokens: u64) -> Self {
        // u64::MAX * 10^18 < u128::MAX
        Self(tokens as u128 * UNIT)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiply by a plain integer (typically a duration in seconds).
    pub fn checked_mul_int(self, n: u64) -> Option<Self> {
        self.0.checked_mul(n as u128).map(Self)
    }

    pub fn saturating_mul_int(self, n: u64) -> Self {
        Self(self.0.saturating_mul(n as u128))
    }

    /// Divide by a plain integer, truncating. Returns `None` for `n == 0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::fixed::Amount;
    /// assert_eq!(Amount::from_raw(7).checked_div_int(2), Some(Amount::from_raw(3)));
    /// assert_eq!(Amount::from_raw(7).checked_div_int(0), None);
    /// ```
    pub fn checked_div_int(self, n: u64) -> Option<Self> {
        self.0.checked_div(n as u128).map(Self)
    }

    /// `self * num / den` with a 256-bit intermediate, truncating.
    ///
    /// Returns `None` when `den` is zero or the quotient exceeds `u128`.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::fixed::Amount;
    /// let share = Amount::from_tokens(10)
    ///     .mul_div(Amount::from_tokens(1), Amount::from_tokens(3))
    ///     .unwrap();
    /// assert_eq!(share.raw(), 3_333_333_333_333_333_333);
    /// ```
    pub fn mul_div(self, num: Self, den: Self) -> Option<Self> {
        if den.is_zero() {
            return None;
        }
        let q = U256::from(self.0) * U256::from(num.0) / U256::from(den.0);
        if q > U256::from(u128::MAX) {
            return None;
        }
        Some(Self(q.as_u128()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:018}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Failure to parse a decimal token string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount: {0}")]
    InvalidDigit(String),
    #[error("more than 18 decimal places")]
    TooPrecise,
    #[error("amount overflows u128")]
    Overflow,
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Parse a decimal token string such as `"1000"` or `"0.25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(ParseAmountError::Empty);
        }
        if frac.len() > DECIMALS as usize {
            return Err(ParseAmountError::TooPrecise);
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(ParseAmountError::InvalidDigit(s.to_string()));
        }

        let whole_raw: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ParseAmountError::Overflow)?
        };
        let frac_raw: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<18}");
            padded.parse().map_err(|_| ParseAmountError::Overflow)?
        };

        whole_raw
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac_raw))
            .map(Self)
            .ok_or(ParseAmountError::Overflow)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
