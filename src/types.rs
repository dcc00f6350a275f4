//! Core types: Money, InstrumentCode, Quantity, AccountId, TradeId, Side

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Monetary amount in micro-units (1 unit = 1_000_000 micros).
///
/// `Money(1_500000)` is 1.5 units of the account currency. All ledger
/// arithmetic stays in integers; products go through `i128` and report
/// overflow instead of wrapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Money(pub i64);

impl Money {
    /// Micros per currency unit.
    pub const SCALE: i64 = 1_000_000;
    pub const ZERO: Money = Money(0);
    pub const MAX: Money = Money(i64::MAX);

    /// Whole currency units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Money(units * Self::SCALE)
    }

    /// Round a floating amount to the nearest micro.
    ///
    /// Returns `None` for NaN, infinities and values outside the `i64` range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let micros = (value * Self::SCALE as f64).round();
        if micros > i64::MAX as f64 || micros < i64::MIN as f64 {
            return None;
        }
        Some(Money(micros as i64))
    }

    /// Lossy conversion for the analytics layer.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// `self * qty`, or `None` on overflow.
    pub fn checked_mul_qty(self, qty: Quantity) -> Option<Self> {
        let product = self.0 as i128 * qty as i128;
        i64::try_from(product).ok().map(Money)
    }

    /// `self * numerator / denominator`, rounded half away from zero.
    ///
    /// Returns `None` when `denominator` is zero or the result overflows.
    pub fn checked_mul_ratio(self, numerator: i64, denominator: i64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let scaled = self.0 as i128 * numerator as i128;
        i64::try_from(div_round(scaled, denominator as i128)).ok().map(Money)
    }

    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Self> {
        self.0.checked_add(other.0).map(Money)
    }

    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Self> {
        self.0.checked_sub(other.0).map(Money)
    }
}

/// Integer division rounding half away from zero.
pub(crate) fn div_round(numerator: i128, denominator: i128) -> i128 {
    let q = numerator / denominator;
    let r = numerator % denominator;
    if 2 * r.abs() >= denominator.abs() {
        if (numerator < 0) != (denominator < 0) {
            q - 1
        } else {
            q + 1
        }
    } else {
        q
    }
}

impl Add for Money {
    type Output = Money;
    #[inline]
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    #[inline]
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // At least two decimals, more only when the micros carry them
        let units = self.0 / Self::SCALE;
        let micros = (self.0 % Self::SCALE).unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        let mut frac = format!("{micros:06}");
        while frac.len() > 2 && frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{sign}{}.{frac}", units.unsigned_abs())
    }
}

/// Error parsing a decimal amount.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount: {0:?}")]
pub struct ParseMoneyError(String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Parse a plain decimal such as `1200`, `-3.5` or `0.000150`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMoneyError(s.to_string());
        let trimmed = s.trim().replace(',', "");
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.as_str()),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if frac_part.len() > 6
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        let units: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| err())?
        };
        let frac: i64 = format!("{frac_part:0<6}").parse().map_err(|_| err())?;
        let micros = units
            .checked_mul(Money::SCALE)
            .and_then(|m| m.checked_add(frac))
            .ok_or_else(err)?;
        Ok(Money(if negative { -micros } else { micros }))
    }
}

/// Number of shares. Long-only, so never negative.
pub type Quantity = u64;

/// Instrument code, stored inline (up to 8 ASCII bytes, `Copy`).
///
/// Covers exchange tickers (`AAPL`), numeric listing codes (`005930`) and
/// index codes (`KS11`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrumentCode {
    bytes: [u8; 8],
    len: u8,
}

impl InstrumentCode {
    pub const MAX_LEN: usize = 8;

    // Range bounds for keyed lookups; never exposed as real codes.
    pub(crate) const LOWEST: Self = Self {
        bytes: [0; 8],
        len: 0,
    };
    pub(crate) const HIGHEST: Self = Self {
        bytes: [0xFF; 8],
        len: 8,
    };

    /// Build from a string literal.
    ///
    /// # Panics
    ///
    /// Panics if `code` is empty, longer than 8 bytes, or not ASCII
    /// alphanumeric. Use [`InstrumentCode::try_new`] for untrusted input.
    pub fn new(code: &str) -> Self {
        match Self::try_new(code) {
            Some(c) => c,
            None => panic!("invalid instrument code: {code:?}"),
        }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(code: &str) -> Option<Self> {
        let raw = code.as_bytes();
        if raw.is_empty()
            || raw.len() > Self::MAX_LEN
            || !raw.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'.' || *b == b'-')
        {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Constructors only admit ASCII
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrumentCode({})", self.as_str())
    }
}

/// Error parsing an instrument code.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid instrument code: {0:?}")]
pub struct ParseCodeError(String);

impl FromStr for InstrumentCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s.trim()).ok_or_else(|| ParseCodeError(s.to_string()))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for InstrumentCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for InstrumentCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InstrumentCode::try_new(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid instrument code: {s:?}")))
    }
}

/// Ledger account identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Trade identifier, assigned in execution order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Side of a trade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}
