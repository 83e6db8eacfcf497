//! Streaming statistics of simulation trials.
//!
//! Sums of squares are accumulated around a fixed [`Centering`] value
//! (an a-priori estimate of the mean) rather than around the running mean,
//! which keeps the variance free of catastrophic cancellation
//! and makes merging the statistics of different workers exact.
//! Statistics accumulated around different centering values must never be merged:
//! the centering is fixed for a whole batch before any worker starts.

use serde::Serialize;
use std::fmt::Debug;

/// The fixed value sums of squares are centered on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Centering(f64);

impl Centering {
    /// No centering.
    pub const ZERO: Centering = Centering(0.0);

    /// Creates a centering value, replacing non-finite values by zero.
    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Self(value)
        } else {
            Self::ZERO
        }
    }

    /// The centering value.
    pub fn value(self) -> f64 {
        self.0
    }
}

/// The running statistics of a stream of trials.
///
/// Accumulators are owned by a single worker while trials are generated
/// and merged by the controller once workers have finished.
pub trait Accumulator: Clone + Debug + Send {
    /// The fixed values sums of squares are centered on.
    type Centering: Copy + Debug + PartialEq + Send;

    /// The centering these statistics are accumulated around.
    fn centering(&self) -> Self::Centering;

    /// Creates empty statistics accumulated around `centering`.
    fn centered(centering: Self::Centering) -> Self;

    /// Computes the pooled mean of the given statistics, to be used as centering.
    fn pooled_centering<'a>(accumulators: impl IntoIterator<Item = &'a Self>) -> Self::Centering
    where
        Self: 'a;

    /// Adds the statistics of `other`, which has to share the same centering.
    fn absorb(&mut self, other: &Self);

    /// The number of trials.
    fn trials(&self) -> u64;

    /// The number of trials with a nonzero outcome.
    fn hits(&self) -> u64;

    /// The point estimate.
    fn mean(&self) -> f64;

    /// The (Bessel-corrected) variance of a single trial's outcome.
    fn variance(&self) -> f64;

    /// Zeroes all statistics, keeping the centering.
    fn clear(&mut self) {
        *self = Self::centered(self.centering());
    }
}

/// Statistics of trials with a single (weighted) outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    trials: u64,
    hits: u64,
    sum: f64,
    sum_squares: f64,
    centering: Centering,
}

impl Statistics {
    /// Records a trial whose outcome is zero.
    pub fn record_miss(&mut self) {
        self.trials += 1;
    }

    /// Records a trial whose outcome is `value * weight`.
    pub fn record_hit(&mut self, value: f64, weight: f64) {
        self.trials += 1;
        self.hits += 1;
        self.sum = value.mul_add(weight, self.sum);
        let centered = value.mul_add(weight, -self.centering.0);
        self.sum_squares = centered.mul_add(centered, self.sum_squares);
    }

    /// The sum of the outcomes.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// The sum of the squared differences between the outcomes and the centering.
    pub fn sum_squares(&self) -> f64 {
        // Misses are not recorded individually, but contribute `centering^2` each.
        let misses = (self.trials - self.hits) as f64;
        misses.mul_add(self.centering.0 * self.centering.0, self.sum_squares)
    }
}

impl Accumulator for Statistics {
    type Centering = Centering;

    fn centering(&self) -> Centering {
        self.centering
    }

    fn centered(centering: Centering) -> Self {
        Self {
            centering,
            ..Default::default()
        }
    }

    fn pooled_centering<'a>(accumulators: impl IntoIterator<Item = &'a Self>) -> Centering {
        let (sum, trials) = accumulators
            .into_iter()
            .fold((0.0, 0), |(sum, trials), acc| (sum + acc.sum, trials + acc.trials));
        if trials > 0 {
            Centering::new(sum / trials as f64)
        } else {
            Centering::ZERO
        }
    }

    fn absorb(&mut self, other: &Self) {
        debug_assert_eq!(self.centering, other.centering);
        self.trials += other.trials;
        self.hits += other.hits;
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    fn trials(&self) -> u64 {
        self.trials
    }

    fn hits(&self) -> u64 {
        self.hits
    }

    fn mean(&self) -> f64 {
        if self.trials > 0 {
            self.sum / self.trials as f64
        } else {
            0.0
        }
    }

    fn variance(&self) -> f64 {
        if self.trials < 2 {
            return 0.0;
        }
        let n = self.trials as f64;
        let centering = self.centering.0;
        // sum (x - mean)^2 = sum (x - c)^2 - (sum x - n c) (mean - c)
        let centered_sum = (-n).mul_add(centering, self.sum);
        let var = (-centered_sum).mul_add(self.mean() - centering, self.sum_squares());
        var.max(0.0) / (n - 1.0)
    }
}

/// Statistics of trials with two outcomes, estimating the ratio of their means.
///
/// Used by regenerative estimators, where each trial is a cycle
/// with a reward (the numerator) and a length (the denominator).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatioStatistics {
    reward: Statistics,
    length: Statistics,
    cross: f64,
}

impl RatioStatistics {
    /// Records a trial.
    pub fn record(&mut self, reward: f64, length: f64) {
        if reward != 0.0 {
            self.reward.record_hit(reward, 1.0);
        } else {
            self.reward.record_miss();
        }
        if length != 0.0 {
            self.length.record_hit(length, 1.0);
        } else {
            self.length.record_miss();
        }
        let reward = reward - self.reward.centering.0;
        let length = length - self.length.centering.0;
        self.cross = reward.mul_add(length, self.cross);
    }

    /// Statistics of the rewards.
    pub fn reward(&self) -> &Statistics {
        &self.reward
    }

    /// Statistics of the lengths.
    pub fn length(&self) -> &Statistics {
        &self.length
    }

    fn covariance(&self) -> f64 {
        let n = self.reward.trials as f64;
        let reward_offset = self.reward.mean() - self.reward.centering.0;
        let length_offset = self.length.mean() - self.length.centering.0;
        (-n * reward_offset).mul_add(length_offset, self.cross) / (n - 1.0)
    }
}

impl Accumulator for RatioStatistics {
    type Centering = (Centering, Centering);

    fn centering(&self) -> Self::Centering {
        (self.reward.centering, self.length.centering)
    }

    fn centered((reward, length): Self::Centering) -> Self {
        Self {
            reward: Statistics::centered(reward),
            length: Statistics::centered(length),
            cross: 0.0,
        }
    }

    fn pooled_centering<'a>(accumulators: impl IntoIterator<Item = &'a Self>) -> Self::Centering {
        let accumulators: Vec<&Self> = accumulators.into_iter().collect();
        (
            Statistics::pooled_centering(accumulators.iter().map(|acc| &acc.reward)),
            Statistics::pooled_centering(accumulators.iter().map(|acc| &acc.length)),
        )
    }

    fn absorb(&mut self, other: &Self) {
        self.reward.absorb(&other.reward);
        self.length.absorb(&other.length);
        self.cross += other.cross;
    }

    fn trials(&self) -> u64 {
        self.reward.trials
    }

    fn hits(&self) -> u64 {
        self.reward.hits
    }

    fn mean(&self) -> f64 {
        if self.length.sum > 0.0 {
            self.reward.sum / self.length.sum
        } else {
            0.0
        }
    }

    /// Delta-method variance: `Var(R - mean * L) / E[L]^2`.
    fn variance(&self) -> f64 {
        let mean_length = self.length.mean();
        if self.trials() < 2 || mean_length <= 0.0 {
            return 0.0;
        }
        let ratio = self.mean();
        let var = (ratio * ratio).mul_add(
            self.length.variance(),
            (-2.0 * ratio).mul_add(self.covariance(), self.reward.variance()),
        );
        var.max(0.0) / (mean_length * mean_length)
    }
}

/// Quantile function of the standard normal distribution.
///
/// Rational approximation by P. J. Acklam, with relative error below `1.15e-9`.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    } else if p >= 1.0 {
        return f64::INFINITY;
    }
    let tail = |q: f64| {
        let num = C.iter().fold(0.0, |acc, c| acc * q + c);
        let den = D.iter().fold(0.0, |acc, d| acc * q + d) * q + 1.0;
        num / den
    };
    if p < LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - LOW {
        let q = p - 0.5;
        let r = q * q;
        let num = A.iter().fold(0.0, |acc, a| acc * r + a) * q;
        let den = B.iter().fold(0.0, |acc, b| acc * r + b) * r + 1.0;
        num / den
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// The half-width multiplier of a two-sided `1 - alpha` normal confidence interval.
pub(crate) fn z_value(alpha: f64) -> f64 {
    // `1 - alpha / 2` rounds to 1 for tiny alphas.
    -normal_quantile(alpha / 2.0)
}
