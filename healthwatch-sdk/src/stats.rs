//! Statistics toolkit: percentiles, linear regression, noise reduction and
//! simple reducers over sampled series.
//!
//! All functions are pure and total. Empty or degenerate input resolves to
//! `None` (or a zeroed [`Regression`]) instead of panicking or producing NaN.

/// Interpolated percentile of `values`, `p` in `0.0..=100.0`.
///
/// Uses the empirical-CDF ("type 6") estimator: ranks are placed at
/// `p / 100 * (n + 1)`, percentiles at or below `100 / (n + 1)` return the
/// minimum and at or above `100 * n / (n + 1)` return the maximum.
///
/// ```rust
/// use healthwatch_sdk::stats::percentile;
///
/// let values = [1.0, 10.0, 20.0, 5.0, 45.0, 30.0];
/// assert_eq!(percentile(&values, 50.0), Some(15.0));
/// assert_eq!(percentile(&values, 100.0), Some(45.0));
/// assert_eq!(percentile(&[], 50.0), None);
/// ```
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || p.is_nan() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let size = sorted.len() as f64;

    let min = 100.0 / (size + 1.0);
    let max = (100.0 * size) / (size + 1.0);

    if p <= min {
        return sorted.first().copied();
    }
    if p >= max {
        return sorted.last().copied();
    }

    let estimated_index = (p / 100.0) * (size + 1.0) - 1.0;
    let index = estimated_index.floor();
    let weight = estimated_index.abs() - index;
    let index = index.max(0.0) as usize;

    // Rounding can land the index on the last element just below `max`.
    match (sorted.get(index), sorted.get(index + 1)) {
        (Some(&lower), Some(&upper)) => Some(lower + weight * (upper - lower)),
        _ => sorted.last().copied(),
    }
}

/// Median (50th percentile) of `values`.
pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Result of an ordinary least squares fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub y_intercept: f64,
    len: usize,
}

impl Regression {
    /// The fit used when there is no usable input.
    fn degenerate(len: usize) -> Self {
        Self {
            slope: 0.0,
            y_intercept: 0.0,
            len,
        }
    }

    /// Value of the fitted line at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.y_intercept
    }

    /// Value of the fitted line at the index following the input (`n + 1`).
    pub fn predict_next(&self) -> f64 {
        self.predict(self.len as f64 + 1.0)
    }

    /// Number of points the fit was computed from.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Least squares fit of `values` against their 1-based index.
///
/// ```rust
/// use healthwatch_sdk::stats::linear_regression;
///
/// let fit = linear_regression(&[10.0, 20.0]);
/// assert_eq!(fit.slope, 10.0);
/// assert_eq!(fit.y_intercept, 0.0);
/// assert_eq!(fit.predict_next(), 30.0);
/// ```
pub fn linear_regression(values: &[f64]) -> Regression {
    linear_regression_points(
        values
            .iter()
            .enumerate()
            .map(|(index, &y)| (index as f64 + 1.0, y)),
    )
}

/// Least squares fit of explicit `(x, y)` points.
///
/// Fewer than two points, or points sharing a single `x`, yield a zero slope
/// and intercept.
pub fn linear_regression_points(points: impl IntoIterator<Item = (f64, f64)>) -> Regression {
    let mut len = 0usize;
    let (mut sum_x, mut sum_y, mut sum_x2, mut sum_xy) = (0.0, 0.0, 0.0, 0.0);

    for (x, y) in points {
        len += 1;
        sum_x += x;
        sum_y += y;
        sum_x2 += x * x;
        sum_xy += x * y;
    }

    let n = len as f64;
    let divisor = n * sum_x2 - sum_x * sum_x;

    if divisor == 0.0 {
        return Regression::degenerate(len);
    }

    Regression {
        slope: (n * sum_xy - sum_x * sum_y) / divisor,
        y_intercept: (sum_y * sum_x2 - sum_x * sum_xy) / divisor,
        len,
    }
}

/// Replace each value with the median of a window centred on it.
///
/// The window is clipped at both ends of the series, so the output always has
/// the same length as the input. A zero window is treated as one.
pub fn median_noise_reduction(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let before = window / 2;
    let after = window.div_ceil(2);

    (0..values.len())
        .map(|index| {
            let start = index.saturating_sub(before);
            let end = (index + after).min(values.len());
            median(&values[start..end]).unwrap_or(values[index])
        })
        .collect()
}

/// The last `count` elements of `values`.
///
/// A count of zero means "no limit" and returns everything, as does a count
/// larger than the series; a negative count returns nothing.
pub fn take_last<T>(values: &[T], count: i64) -> &[T] {
    if count < 0 {
        return &[];
    }

    let count = count as usize;
    if count == 0 || count > values.len() {
        values
    } else {
        &values[values.len() - count..]
    }
}

pub fn first<T: Copy>(values: &[T]) -> Option<T> {
    values.first().copied()
}

pub fn last<T: Copy>(values: &[T]) -> Option<T> {
    values.last().copied()
}

/// Sum of `values`; `None` if empty or if any element is not finite.
pub fn sum(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.iter().try_fold(0.0, |acc, &value| {
        if value.is_finite() {
            Some(acc + value)
        } else {
            None
        }
    })
}

/// Arithmetic mean of `values`; `None` whenever [`sum`] is `None`.
pub fn avg(values: &[f64]) -> Option<f64> {
    sum(values).map(|total| total / values.len() as f64)
}

/// Round half away from zero to two decimal places.
pub fn round_to_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
