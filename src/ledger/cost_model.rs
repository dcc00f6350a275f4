//! Commission modeling.

use crate::types::Money;

/// Parts-per-million denominator.
const PPM: i64 = 1_000_000;

/// Models the broker commission charged on each trade.
///
/// Commission is a fixed rate of notional (in parts per million) with an
/// optional minimum per-trade fee. The same formula applies to both sides.
///
/// ```
/// use paperbook::ledger::CostModel;
/// use paperbook::Money;
///
/// let model = CostModel::default(); // 0.015%
/// assert_eq!(model.commission(Money::from_units(10_000)), Money(1_500000));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostModel {
    /// Commission rate in parts per million (150 = 0.015%)
    pub commission_ppm: u32,
    /// Minimum fee per trade
    pub min_fee: Money,
}

impl CostModel {
    /// Retail brokerage default: 0.015% with no minimum.
    pub const DEFAULT_COMMISSION_PPM: u32 = 150;

    /// A zero-cost model.
    pub fn zero() -> Self {
        Self {
            commission_ppm: 0,
            min_fee: Money::ZERO,
        }
    }

    pub fn with_rate_ppm(commission_ppm: u32) -> Self {
        Self {
            commission_ppm,
            min_fee: Money::ZERO,
        }
    }

    /// Commission for a trade of the given notional, rounded to the nearest micro.
    ///
    /// Uses the absolute notional, so the result is never negative.
    pub fn commission(&self, notional: Money) -> Money {
        let rate = notional
            .abs()
            .checked_mul_ratio(self.commission_ppm as i64, PPM)
            .unwrap_or(Money::MAX);
        if notional == Money::ZERO {
            return Money::ZERO;
        }
        rate.max(self.min_fee)
    }

    /// The rate as a fraction (0.00015 for the default).
    pub fn rate(&self) -> f64 {
        self.commission_ppm as f64 / PPM as f64
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::with_rate_ppm(Self::DEFAULT_COMMISSION_PPM)
    }
}
