//! Time-series helpers: returns, moments, percentiles, correlation, date alignment.
//!
//! Inputs are plain `f64` slices; degenerate inputs (too short, zero variance)
//! produce `0.0` rather than NaN.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::feed::PricePoint;

/// Simple period returns `p[i] / p[i-1] - 1`.
///
/// Pairs whose previous price is not positive are dropped.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[0].is_finite() && w[1].is_finite())
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Dated simple returns; each return carries the later date.
pub fn dated_returns(points: &[PricePoint]) -> Vec<(NaiveDate, f64)> {
    points
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[0].close.is_finite() && w[1].close.is_finite())
        .map(|w| (w[1].date, w[1].close / w[0].close - 1.0))
        .collect()
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Dispersion below this is rounding noise, not movement.
///
/// A steadily compounding price yields returns that differ only in their last
/// bits, so their standard deviation lands near 1e-15 instead of 0.
pub const FLAT_EPSILON: f64 = 1e-12;

/// `x`, or `0.0` when its magnitude is under [`FLAT_EPSILON`].
pub fn flush_noise(x: f64) -> f64 {
    if x.abs() < FLAT_EPSILON { 0.0 } else { x }
}

/// Sample standard deviation (n - 1); `0.0` below two observations or for a
/// flat series.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    flush_noise(var.sqrt())
}

/// Population standard deviation (n); `0.0` for an empty slice or a flat series.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    flush_noise(var.sqrt())
}

/// Percentile with linear interpolation between closest ranks, `q` in `[0, 100]`.
///
/// Returns `None` for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = q.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sample covariance of two equally long series.
pub fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Pearson correlation; `0.0` when either series has zero variance.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let sa = sample_std(&a[..n]);
    let sb = sample_std(&b[..n]);
    if sa == 0.0 || sb == 0.0 {
        return 0.0;
    }
    covariance(a, b) / (sa * sb)
}

/// Equity curve from returns, starting at 1.0 before the first return.
pub fn cumulative(returns: &[f64]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(returns.len() + 1);
    let mut equity = 1.0_f64;
    curve.push(equity);
    for r in returns {
        equity *= 1.0 + r;
        curve.push(equity);
    }
    curve
}

/// Dated series aligned on the dates all of them share.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aligned {
    pub dates: Vec<NaiveDate>,
    /// One row per date, one column per input series
    pub rows: Vec<Vec<f64>>,
}

impl Aligned {
    /// Column `j` as a contiguous series.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[j]).collect()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Row-wise weighted sum.
    pub fn blend(&self, weights: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(weights).map(|(v, w)| v * w).sum())
            .collect()
    }
}

/// Inner-join dated series on their common dates (ascending).
pub fn align<T: AsRef<[(NaiveDate, f64)]>>(series: &[T]) -> Aligned {
    let Some(first) = series.first() else {
        return Aligned::default();
    };
    let mut common: BTreeSet<NaiveDate> = first.as_ref().iter().map(|(d, _)| *d).collect();
    for s in &series[1..] {
        let dates: BTreeSet<NaiveDate> = s.as_ref().iter().map(|(d, _)| *d).collect();
        common = common.intersection(&dates).copied().collect();
    }

    let lookups: Vec<std::collections::BTreeMap<NaiveDate, f64>> = series
        .iter()
        .map(|s| s.as_ref().iter().copied().collect())
        .collect();

    let mut rows = Vec::with_capacity(common.len());
    let mut dates = Vec::with_capacity(common.len());
    for date in common {
        let row: Option<Vec<f64>> = lookups.iter().map(|m| m.get(&date).copied()).collect();
        if let Some(row) = row {
            dates.push(date);
            rows.push(row);
        }
    }
    Aligned { dates, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn returns_from_prices() {
        let r = simple_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.10).abs() < 1e-12);
        assert!((r[1] + 0.10).abs() < 1e-12);
        assert!(simple_returns(&[100.0]).is_empty());
        assert_eq!(simple_returns(&[0.0, 5.0, 10.0]), vec![1.0]);
    }

    #[test]
    fn std_variants() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std(&v) - 2.0).abs() < 1e-12);
        assert!((sample_std(&v) - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(sample_std(&[1.0]), 0.0);
    }

    #[test]
    fn compounding_returns_have_no_spread() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let returns = simple_returns(&closes);
        assert_eq!(sample_std(&returns), 0.0);
        assert_eq!(population_std(&returns), 0.0);
        assert_eq!(flush_noise(-3e-15), 0.0);
        assert_eq!(flush_noise(2e-9), 2e-9);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(4.0));
        assert_eq!(percentile(&v, 50.0), Some(2.5));
        // rank 0.05 * 3 = 0.15
        assert!((percentile(&v, 5.0).unwrap() - 1.15).abs() < 1e-12);
        assert_eq!(percentile(&[], 5.0), None);
    }

    #[test]
    fn correlation_bounds() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &c) + 1.0).abs() < 1e-12);
        assert_eq!(correlation(&a, &[1.0, 1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn cumulative_starts_at_one() {
        let curve = cumulative(&[0.1, -0.5]);
        assert_eq!(curve.len(), 3);
        assert_eq!(curve[0], 1.0);
        assert!((curve[2] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn align_keeps_common_dates() {
        let a = vec![(d(2), 0.01), (d(3), 0.02), (d(4), 0.03)];
        let b = vec![(d(3), -0.01), (d(4), -0.02), (d(5), -0.03)];
        let aligned = align(&[a, b]);
        assert_eq!(aligned.dates, vec![d(3), d(4)]);
        assert_eq!(aligned.rows[0], vec![0.02, -0.01]);
        assert_eq!(aligned.column(1), vec![-0.01, -0.02]);
        let blended = aligned.blend(&[0.5, 0.5]);
        assert!((blended[0] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn align_empty() {
        let none: Vec<Vec<(NaiveDate, f64)>> = Vec::new();
        assert!(align(&none).is_empty());
    }
}
