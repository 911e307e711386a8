//! Left-to-right composition of statistics over sampled series.
//!
//! Each stage constructor returns a closure taking its input by value, so
//! stages chain with [`compose`] or the [`pipe!`](crate::pipe) macro:
//!
//! ```rust
//! use healthwatch_sdk::pipe;
//! use healthwatch_sdk::pipeline::{avg, or, take_last};
//!
//! let recent_average = pipe!(take_last(3), avg(), or(0.0));
//!
//! assert_eq!(recent_average(vec![100.0, 1.0, 2.0, 3.0]), 2.0);
//! assert_eq!(recent_average(vec![]), 0.0);
//! ```

use crate::stats::{self, Regression};

/// `g` after `f`.
pub fn compose<A, B, C, F, G>(f: F, g: G) -> impl Fn(A) -> C
where
    F: Fn(A) -> B,
    G: Fn(B) -> C,
{
    move |input| g(f(input))
}

/// Chain stages left to right: `pipe!(f, g, h)(x) == h(g(f(x)))`.
#[macro_export]
macro_rules! pipe {
    ($stage:expr $(,)?) => {
        $stage
    };
    ($first:expr, $($rest:expr),+ $(,)?) => {
        $crate::pipeline::compose($first, $crate::pipe!($($rest),+))
    };
}

/// Drop missing samples.
pub fn defined<T>() -> impl Fn(Vec<Option<T>>) -> Vec<T> {
    |values| values.into_iter().flatten().collect()
}

/// See [`stats::take_last`].
pub fn take_last<T: Clone>(count: i64) -> impl Fn(Vec<T>) -> Vec<T> {
    move |values| stats::take_last(&values, count).to_vec()
}

pub fn median_noise_reduction(window: usize) -> impl Fn(Vec<f64>) -> Vec<f64> {
    move |values| stats::median_noise_reduction(&values, window)
}

pub fn percentile(p: f64) -> impl Fn(Vec<f64>) -> Option<f64> {
    move |values| stats::percentile(&values, p)
}

pub fn linear_regression() -> impl Fn(Vec<f64>) -> Regression {
    |values| stats::linear_regression(&values)
}

pub fn first<T: Copy>() -> impl Fn(Vec<T>) -> Option<T> {
    |values| stats::first(&values)
}

pub fn last<T: Copy>() -> impl Fn(Vec<T>) -> Option<T> {
    |values| stats::last(&values)
}

pub fn avg() -> impl Fn(Vec<f64>) -> Option<f64> {
    |values| stats::avg(&values)
}

pub fn sum() -> impl Fn(Vec<f64>) -> Option<f64> {
    |values| stats::sum(&values)
}

/// Replace a missing result with `default`.
pub fn or<T: Clone>(default: T) -> impl Fn(Option<T>) -> T {
    move |value| value.unwrap_or_else(|| default.clone())
}
