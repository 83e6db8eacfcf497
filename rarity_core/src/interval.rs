//! Confidence intervals and estimation results.
//!
//! Plain Bernoulli trials get an exact (Clopper-Pearson) interval whenever it can be computed,
//! obtained by bisection on the binomial CDF with exact binomial coefficients.
//! Otherwise, as for likelihood-weighted trials, the interval is the normal approximation
//! built from the estimated mean and variance.

use crate::property::Property;
use crate::statistics::z_value;
use log::debug;
use serde::Serialize;
use std::time::Duration;

/// Hit counts above which the exact binomial interval is not attempted.
pub const MAX_EXACT_HITS: u64 = 1024;

/// How the sample size of an [`Estimate`] was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Convergence {
    /// The sample size was fixed in advance, or derived from a time budget.
    FixedBudget,
    /// The target relative error was reached with a sequential procedure
    /// preserving the overall confidence level.
    Converged,
    /// The target relative error was reached by recomputing the interval from scratch
    /// on growing samples, which does not preserve the overall confidence level.
    ConvergedUnsound,
    /// The sample ceiling was reached before the target relative error.
    CeilingReached,
}

/// The estimated value of a property, with a `1 - alpha` confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// The estimated property.
    pub property: Property,
    /// The point estimate.
    pub mean: f64,
    /// The estimated variance of a single trial.
    pub variance: f64,
    /// One minus the confidence level.
    pub alpha: f64,
    /// Lower bound of the confidence interval.
    pub lower: f64,
    /// Upper bound of the confidence interval.
    pub upper: f64,
    /// Number of trials.
    pub trials: u64,
    /// Number of trials with nonzero outcome.
    pub hits: u64,
    /// Wall-clock time spent on the estimate.
    pub elapsed: Duration,
    /// Number of states of the model.
    pub model_size: usize,
    /// How the sample size was determined.
    pub convergence: Convergence,
}

impl Estimate {
    /// Half of the width of the confidence interval.
    pub fn half_width(&self) -> f64 {
        (self.upper - self.lower) / 2.0
    }

    /// Half-width of the confidence interval relative to its center.
    pub fn relative_error(&self) -> f64 {
        relative_error(self.lower, self.upper)
    }
}

/// Half-width of `[lower, upper]` relative to its center, infinite for a null center.
pub fn relative_error(lower: f64, upper: f64) -> f64 {
    let center = (upper + lower) / 2.0;
    if center > 0.0 {
        (upper - lower) / 2.0 / center
    } else {
        f64::INFINITY
    }
}

/// Computes a `1 - alpha` confidence interval, clamped to `support`.
///
/// If `binomial`, the trials are assumed to be plain Bernoulli trials with `hits` successes,
/// and the exact interval is used whenever available.
pub fn confidence_interval(
    trials: u64,
    hits: u64,
    mean: f64,
    variance: f64,
    alpha: f64,
    binomial: bool,
    support: (f64, f64),
) -> (f64, f64) {
    if trials == 0 {
        return support;
    }
    if binomial {
        if let Some(bounds) = binomial_interval(trials, hits, alpha) {
            return bounds;
        }
        debug!("exact interval unavailable for {hits}/{trials}, using normal approximation");
    }
    let (lower, upper) = approximate_interval(mean, variance, trials, alpha);
    (lower.max(support.0), upper.min(support.1))
}

/// Normal-approximation interval for the mean of `trials` samples.
pub fn approximate_interval(mean: f64, variance: f64, trials: u64, alpha: f64) -> (f64, f64) {
    let half_width = z_value(alpha) * (variance / trials as f64).sqrt();
    (mean - half_width, mean + half_width)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Exact binomial coefficient, `None` on overflow.
fn binomial_coefficient(n: u64, k: u64) -> Option<u64> {
    let k = k.min(n - k);
    let mut numerator: u64 = 1;
    let mut denominator: u64 = 1;
    for i in 1..=k {
        let mut factor = n + 1 - i;
        let mut divisor = i;
        let g = gcd(factor, divisor);
        factor /= g;
        divisor /= g;
        let g = gcd(factor, denominator);
        factor /= g;
        denominator /= g;
        let g = gcd(numerator, divisor);
        numerator /= g;
        divisor /= g;
        numerator = numerator.checked_mul(factor)?;
        denominator = denominator.checked_mul(divisor)?;
    }
    Some(numerator / denominator)
}

// P[X <= k] for X ~ Binomial(n, p), with precomputed coefficients.
fn binomial_cdf(p: f64, n: u64, k: u64, coefficients: &[f64]) -> f64 {
    (0..=k).fold(0.0, |cdf, i| {
        let head = p.powi(i as i32) * coefficients[i as usize];
        let tail = (1.0 - p).powf((n - i) as f64);
        head.mul_add(tail, cdf)
    })
}

// Bisects [0, 1] until the midpoint coincides with an endpoint.
// `above` tells whether the root lies below the probed point.
fn bisect(above: impl Fn(f64) -> bool) -> f64 {
    let (mut min, mut max) = (0.0f64, 1.0f64);
    let mut mid = (min + max) / 2.0;
    while mid != min && mid != max {
        if above(mid) {
            max = mid;
        } else {
            min = mid;
        }
        mid = (min + max) / 2.0;
    }
    mid
}

/// Exact (Clopper-Pearson) `1 - alpha` interval for `hits` successes out of `trials`.
///
/// Returns `None` if the exact computation is not applicable,
/// i.e., if the smaller of the success and failure counts exceeds [`MAX_EXACT_HITS`]
/// or if the binomial coefficients overflow.
/// Callers are expected to fall back to [`approximate_interval`].
pub fn binomial_interval(trials: u64, hits: u64, alpha: f64) -> Option<(f64, f64)> {
    assert!(hits <= trials);
    let half_alpha = alpha / 2.0;
    // By symmetry, work with the rarer outcome.
    let inverse = hits > trials / 2;
    let k = if inverse { trials - hits } else { hits };
    let (lower, upper) = if k == 0 {
        (0.0, 1.0 - half_alpha.powf(1.0 / trials as f64))
    } else if k <= MAX_EXACT_HITS {
        let coefficients = (0..=k)
            .map(|i| binomial_coefficient(trials, i).map(|c| c as f64))
            .collect::<Option<Vec<f64>>>()?;
        // P[X >= k] > alpha / 2 above the lower bound.
        let lower = bisect(|p| 1.0 - binomial_cdf(p, trials, k - 1, &coefficients) > half_alpha);
        // P[X <= k] > alpha / 2 below the upper bound.
        let upper = bisect(|p| binomial_cdf(p, trials, k, &coefficients) <= half_alpha);
        (lower, upper)
    } else {
        return None;
    };
    if inverse {
        Some((1.0 - upper, 1.0 - lower))
    } else {
        Some((lower, upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficients() {
        assert_eq!(binomial_coefficient(10, 0), Some(1));
        assert_eq!(binomial_coefficient(10, 3), Some(120));
        assert_eq!(binomial_coefficient(10, 7), Some(120));
        assert_eq!(binomial_coefficient(52, 5), Some(2_598_960));
        assert_eq!(
            binomial_coefficient(66, 33),
            Some(7_219_428_434_016_265_740)
        );
        assert_eq!(binomial_coefficient(1_000_000, 1_000), None);
    }

    #[test]
    fn no_hits() {
        let (lower, upper) = binomial_interval(100, 0, 0.05).expect("closed form");
        assert_eq!(lower, 0.0);
        assert_eq!(upper, 1.0 - 0.025f64.powf(1.0 / 100.0));
    }

    #[test]
    fn all_hits() {
        let (lower, upper) = binomial_interval(100, 100, 0.05).expect("closed form");
        assert_eq!(upper, 1.0);
        assert!((lower - 0.025f64.powf(1.0 / 100.0)).abs() < 1e-12);
    }

    #[test]
    fn clopper_pearson() {
        // Reference values from the beta quantiles of the exact interval.
        let (lower, upper) = binomial_interval(100, 5, 0.05).expect("exact");
        assert!((lower - 0.016_431).abs() < 1e-5);
        assert!((upper - 0.112_835).abs() < 1e-5);
        let (lower, upper) = binomial_interval(20, 10, 0.05).expect("exact");
        assert!((lower - 0.271_957).abs() < 1e-5);
        assert!((upper - 0.728_043).abs() < 1e-5);
    }

    #[test]
    fn symmetric() {
        let (lower, upper) = binomial_interval(50, 3, 0.1).expect("exact");
        let (inv_lower, inv_upper) = binomial_interval(50, 47, 0.1).expect("exact");
        assert!((lower - (1.0 - inv_upper)).abs() < 1e-12);
        assert!((upper - (1.0 - inv_lower)).abs() < 1e-12);
    }

    #[test]
    fn brackets_point_estimate() {
        let mut exact = 0;
        for trials in [1, 2, 7, 30, 64, 101, 500, 2_000, 100_000] {
            for hits in (0..=trials).step_by((trials as usize / 13).max(1)).chain(1..5) {
                for alpha in [0.2, 0.05, 0.001] {
                    // Coefficients of large samples overflow unless hits are few.
                    if let Some((lower, upper)) = binomial_interval(trials, hits.min(trials), alpha) {
                        let mean = hits.min(trials) as f64 / trials as f64;
                        assert!(lower <= mean && mean <= upper, "{hits}/{trials} at {alpha}");
                        exact += 1;
                    }
                }
            }
        }
        assert!(exact > 100);
    }

    #[test]
    fn unavailable() {
        assert_eq!(binomial_interval(1_000_000, 2_000, 0.05), None);
        assert_eq!(binomial_interval(1_000_000_000, 500, 0.05), None);
    }

    #[test]
    fn fallback() {
        let (lower, upper) = confidence_interval(1_000_000, 2_000, 0.002, 0.002, 0.05, true, (0.0, 1.0));
        let half_width = z_value(0.05) * (0.002f64 / 1e6).sqrt();
        assert!((lower - (0.002 - half_width)).abs() < 1e-15);
        assert!((upper - (0.002 + half_width)).abs() < 1e-15);
    }

    #[test]
    fn clamped() {
        assert_eq!(confidence_interval(0, 0, 0.0, 0.0, 0.05, false, (0.0, 1.0)), (0.0, 1.0));
        let (lower, upper) = confidence_interval(10, 1, 0.01, 1.0, 0.05, false, (0.0, 1.0));
        assert_eq!(lower, 0.0);
        assert!(upper < 1.0);
    }

    #[test]
    fn relative_errors() {
        assert_eq!(relative_error(0.0, 0.0), f64::INFINITY);
        assert!((relative_error(0.9, 1.1) - 0.1).abs() < 1e-12);
    }
}
