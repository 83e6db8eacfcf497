//! The sampling controller.
//!
//! A [`Simulator`] owns a [`Tracer`] and a thread pool.
//! Every batch of trials replicates the tracer once per thread,
//! splits the batch size among the replicas, runs them in parallel to completion,
//! and folds their statistics back into the tracer.
//!
//! Batches can be sized in three ways:
//!
//! - by a fixed number of trials ([`Simulator::run`]);
//! - by a time budget, calibrated against the measured throughput ([`Simulator::run_timed`]);
//! - by a target relative error, reached through a sequence of batches
//!   whose confidence levels are chosen by alpha spending ([`Simulator::run_for_relative_error`]),
//!   so that the final interval holds the requested confidence level overall.

use crate::config::SimulatorConfig;
use crate::interval::{Convergence, Estimate, relative_error};
use crate::property::PropertyKind;
use crate::statistics::z_value;
use crate::tracer::Tracer;
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Confidence level of bootstrap batches whose interval is discarded.
const BOOTSTRAP_ALPHA: f64 = 0.05;

/// Trials a worker completes between updates of the shared [`Progress`].
const PROGRESS_STRIDE: u64 = 256;

/// The error type for configuring and running a [`Simulator`].
#[derive(Debug, Error)]
pub enum SimError {
    /// Time bounds have to be non-negative.
    #[error("invalid time bound {0}")]
    InvalidTimeBound(f64),
    /// Steady-state properties cannot be time-bounded.
    #[error("steady-state properties cannot have a time bound")]
    BoundedSteadyState,
    /// Steady-state properties are only estimated under the model's own dynamics.
    #[error("steady-state properties cannot be estimated under forcing")]
    ForcedSteadyState,
    /// Confidence parameters have to lie in the open unit interval.
    #[error("alpha {0} does not lie in (0, 1)")]
    InvalidAlpha(f64),
    /// Target relative errors have to be finite and positive.
    #[error("invalid relative error {0}")]
    InvalidRelativeError(f64),
    /// Budgets have to allow for some simulation.
    #[error("empty simulation budget")]
    ZeroBudget,
    /// There has to be at least one worker thread.
    #[error("cannot simulate with zero threads")]
    ZeroThreads,
    /// Spending rates below 2 would spend the whole confidence budget at once.
    #[error("spend rate {0} is below 2")]
    InvalidSpendRate(u32),
    /// The tracer does not estimate the property it has been given.
    #[error("expected a {expected:?} property, found {found:?}")]
    KindMismatch {
        /// The kind of property the tracer estimates.
        expected: PropertyKind,
        /// The kind of property given.
        found: PropertyKind,
    },
    /// The worker thread pool could not be built.
    #[error("failed to build thread pool")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

/// Progress of a [`Simulator`], shared with observers.
///
/// Both counters only grow: `target` by the size of every batch when it starts,
/// `done` by the trials completed, which workers report every few hundred trials
/// and at the end of their share.
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicU64,
    target: AtomicU64,
}

impl Progress {
    /// Number of completed trials.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Number of trials requested so far.
    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    pub(crate) fn extend(&self, samples: u64) {
        self.target.fetch_add(samples, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, samples: u64) {
        self.done.fetch_add(samples, Ordering::Relaxed);
    }
}

/// How many trials an estimation may take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Budget {
    /// A fixed number of trials.
    Samples(u64),
    /// As many trials as fit in the given time, but no more than `max_samples` unless that is zero.
    Time {
        /// The time budget.
        budget: Duration,
        /// Maximum number of trials, zero for no maximum.
        max_samples: u64,
    },
    /// As many trials as needed to reach the relative error,
    /// preserving the confidence level over the whole sequence of batches.
    RelativeError {
        /// The target relative error.
        error: f64,
        /// Maximum number of trials.
        ceiling: Option<u64>,
    },
    /// As many trials as needed to reach the relative error,
    /// doubling the sample size and recomputing the interval from scratch.
    /// The confidence level does not hold over the whole sequence.
    RelativeErrorUnsound {
        /// The target relative error.
        error: f64,
        /// Maximum number of trials.
        ceiling: Option<u64>,
    },
}

/// Splits `total` into `parts` shares differing by at most one, summing exactly to `total`.
///
/// ```
/// # use rarity_core::partition;
/// assert_eq!(partition(17, 5), vec![3, 3, 3, 4, 4]);
/// ```
pub fn partition(total: u64, parts: usize) -> Vec<u64> {
    let mut left = total;
    (0..parts)
        .map(|idx| {
            let share = left / (parts - idx) as u64;
            left -= share;
            share
        })
        .collect()
}

fn check_alpha(alpha: f64) -> Result<(), SimError> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(SimError::InvalidAlpha(alpha))
    }
}

fn check_error(error: f64) -> Result<(), SimError> {
    if error > 0.0 && error.is_finite() {
        Ok(())
    } else {
        Err(SimError::InvalidRelativeError(error))
    }
}

// Intersects the interval kept so far with a fresh one,
// restarting from the fresh one if they are disjoint.
fn intersect((lower, upper): (f64, f64), fresh: (f64, f64)) -> (f64, f64) {
    let (new_lower, new_upper) = (lower.max(fresh.0), upper.min(fresh.1));
    if new_upper < new_lower {
        warn!(
            "disjoint intervals [{lower:e}, {upper:e}] and [{:e}, {:e}]: restarting from the latest batch",
            fresh.0, fresh.1
        );
        fresh
    } else {
        (new_lower, new_upper)
    }
}

/// Confidence budget left to spend over a sequence of batches.
#[derive(Debug, Clone, Copy)]
struct AlphaSpending {
    total: f64,
    consumed: f64,
    rate: f64,
}

impl AlphaSpending {
    // The first batch gets `total / rate`.
    fn new(total: f64, rate: u32) -> Self {
        let rate = rate as f64;
        Self {
            total,
            consumed: total / rate,
            rate,
        }
    }

    fn first(&self) -> f64 {
        self.consumed
    }

    // Spends a share of the budget left on the next batch.
    fn spend(&mut self) -> f64 {
        let left = (self.total - self.consumed) / (1.0 - self.consumed);
        let alpha = left * (self.rate - 1.0) / self.rate;
        self.consumed += alpha - alpha * self.consumed;
        alpha
    }
}

/// The sampling controller, running a [`Tracer`]'s trials in parallel batches.
pub struct Simulator<T: Tracer> {
    tracer: T,
    threads: usize,
    config: SimulatorConfig,
    pool: ThreadPool,
    progress: Arc<Progress>,
}

impl<T: Tracer> Simulator<T> {
    /// Creates a simulator with its own [`Progress`].
    pub fn new(tracer: T, config: SimulatorConfig) -> Result<Self, SimError> {
        Self::with_progress(tracer, config, Arc::default())
    }

    /// Creates a simulator reporting to the given [`Progress`].
    pub fn with_progress(
        tracer: T,
        config: SimulatorConfig,
        progress: Arc<Progress>,
    ) -> Result<Self, SimError> {
        let threads = config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("rarity-worker-{idx}"))
            .build()?;
        info!(
            "simulating {:?} property on {} states with {threads} threads",
            tracer.property().kind(),
            tracer.model_size()
        );
        Ok(Self {
            tracer,
            threads,
            config,
            pool,
            progress,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Progress of the simulation, to be polled by observers.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// The tracer batches are replicated from.
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Estimates the property within the given budget.
    pub fn estimate(&mut self, budget: Budget, alpha: f64) -> Result<Estimate, SimError> {
        match budget {
            Budget::Samples(samples) => self.run(samples, alpha),
            Budget::Time {
                budget,
                max_samples,
            } => self.run_timed(budget, max_samples, alpha),
            Budget::RelativeError { error, ceiling } => {
                self.run_for_relative_error(error, alpha, ceiling)
            }
            Budget::RelativeErrorUnsound { error, ceiling } => {
                self.run_for_relative_error_unsound(error, alpha, ceiling)
            }
        }
    }

    /// Runs `samples` trials split among the worker threads,
    /// returning the workers with their statistics.
    fn run_batch(&mut self, samples: u64) -> Vec<T> {
        let mut workers: Vec<T> = (0..self.threads).map(|_| self.tracer.replicate()).collect();
        if samples == 0 {
            return workers;
        }
        self.progress.extend(samples);
        let shares = partition(samples, self.threads);
        let progress = &self.progress;
        self.pool.install(|| {
            workers
                .par_iter_mut()
                .zip(shares)
                .for_each(|(worker, share)| {
                    let mut pending = 0;
                    for _ in 0..share {
                        worker.generate();
                        pending += 1;
                        if pending == PROGRESS_STRIDE {
                            progress.advance(pending);
                            pending = 0;
                        }
                    }
                    progress.advance(pending);
                })
        });
        debug!("batch of {samples} trials completed");
        workers
    }

    // Consumes the streams a timed run spends on calibration,
    // so that untimed runs draw the same trials as timed ones.
    fn skip_calibration(&mut self) {
        self.tracer.replicate();
        self.run_batch(0);
    }

    // Folds the workers into the tracer and renders the estimate.
    fn collect(&mut self, workers: &[T], alpha: f64, elapsed: Duration) -> Estimate {
        self.tracer.fold(workers);
        let estimate = self.tracer.result(alpha, elapsed);
        debug!(
            "{} hits out of {} trials: mean {:e}, variance {:e}, interval [{:e}, {:e}]",
            estimate.hits,
            estimate.trials,
            estimate.mean,
            estimate.variance,
            estimate.lower,
            estimate.upper
        );
        estimate
    }

    // Fixes the mean of the last batch as the centering of the next ones.
    fn recenter(&mut self) {
        self.tracer.estimate_mean_and_reset(&mut []);
    }

    /// Runs a batch of `samples` trials and returns the estimate with a `1 - alpha` confidence interval.
    ///
    /// Draws the same trials as [`Simulator::run_timed`] would on a fresh simulator
    /// with the same seed and number of threads.
    pub fn run(&mut self, samples: u64, alpha: f64) -> Result<Estimate, SimError> {
        check_alpha(alpha)?;
        let start = Instant::now();
        self.skip_calibration();
        let workers = self.run_batch(samples);
        Ok(self.collect(&workers, alpha, start.elapsed()))
    }

    /// Runs as many trials as fit in the time `budget`, but no more than `max_samples` unless it is zero,
    /// and returns the estimate with a `1 - alpha` confidence interval.
    ///
    /// About 1% of the budget is spent measuring the throughput of a single thread
    /// on a throwaway stream; a parallel batch of the same length per thread then refines
    /// the measurement and fixes the centering of the final batch.
    /// Neither calibration run counts towards the estimate.
    pub fn run_timed(
        &mut self,
        budget: Duration,
        max_samples: u64,
        alpha: f64,
    ) -> Result<Estimate, SimError> {
        check_alpha(alpha)?;
        if budget.is_zero() {
            return Err(SimError::ZeroBudget);
        }
        let start = Instant::now();

        let mut probe = self.tracer.replicate();
        probe.reseed(rand::random());
        let probe_budget = budget / 100;
        let mut samples = 0u64;
        while samples == 0 || start.elapsed() < probe_budget {
            probe.generate();
            samples += 1;
        }
        info!("estimating simulation rate");
        samples *= self.threads as u64;
        let timing = Instant::now();
        let mut workers = self.run_batch(samples);
        let exact_time = timing.elapsed();
        workers.push(probe);
        self.tracer.estimate_mean_and_reset(&mut workers);

        let remaining = budget.saturating_sub(start.elapsed());
        let rate = samples as f64 / exact_time.as_secs_f64().max(f64::MIN_POSITIVE);
        let mut samples = (remaining.as_secs_f64() * rate) as u64;
        if max_samples > 0 {
            samples = samples.min(max_samples);
        }
        info!("will run {samples} simulations");

        let workers = self.run_batch(samples);
        Ok(self.collect(&workers, alpha, start.elapsed()))
    }

    /// Runs batches until the `1 - alpha` confidence interval has a relative error of at most `error`,
    /// or until `ceiling` trials have been run.
    ///
    /// Batches grow by an order of magnitude until the target has been hit often enough
    /// for a first estimate of the variance.
    /// The first of them is given a share of the confidence budget and its interval is kept.
    /// Every later batch is sized by the variance to reach the target relative error,
    /// spends a share of the confidence budget left,
    /// and its interval is intersected with the intervals before it.
    /// As the confidence budget is never overspent, the final interval holds with confidence `1 - alpha`.
    pub fn run_for_relative_error(
        &mut self,
        error: f64,
        alpha: f64,
        ceiling: Option<u64>,
    ) -> Result<Estimate, SimError> {
        check_alpha(alpha)?;
        check_error(error)?;
        let start = Instant::now();
        let ceiling = ceiling.unwrap_or(u64::MAX);
        let mut spending = AlphaSpending::new(alpha, self.config.spend_rate);
        let mut batch = self.config.bootstrap_batch.saturating_mul(self.threads as u64);
        let mut spent = 0u64;

        // The first bootstrap batch is the only one whose interval is kept.
        batch = batch.min(ceiling);
        let mut estimate = self.run(batch, spending.first())?;
        spent += batch;
        let (mut lower, mut upper) = (estimate.lower, estimate.upper);
        let (mut trials, mut hits) = (estimate.trials, estimate.hits);
        let mut last = estimate.clone();
        while last.hits < self.config.min_hits && spent < ceiling {
            batch = batch.saturating_mul(10).min(ceiling - spent);
            info!("{} hits so far, bootstrapping with {batch} trials", last.hits);
            last = self.run(batch, BOOTSTRAP_ALPHA)?;
            spent += batch;
            trials += last.trials;
            hits += last.hits;
        }
        self.recenter();

        let mut convergence = Convergence::Converged;
        while relative_error(lower, upper) > error {
            if spent >= ceiling {
                convergence = Convergence::CeilingReached;
                break;
            }
            let alpha_step = spending.spend();
            if alpha_step <= 0.0 {
                warn!("confidence budget exhausted after {trials} trials");
                convergence = Convergence::CeilingReached;
                break;
            }
            let center = (lower + upper) / 2.0;
            let z = z_value(alpha_step);
            let needed = 2.0 * last.variance * z * z / (error * error * center * center);
            if needed.is_finite() && needed > batch as f64 {
                batch = needed as u64;
            }
            batch = batch.min(ceiling - spent);
            info!(
                "relative error {:e} after {trials} trials, running {batch} more at alpha {alpha_step:e}",
                relative_error(lower, upper)
            );

            estimate = self.run(batch, alpha_step)?;
            spent += batch;
            trials += estimate.trials;
            hits += estimate.hits;
            if estimate.hits > 0 {
                (lower, upper) = intersect((lower, upper), (estimate.lower, estimate.upper));
            }
            last = estimate.clone();
            self.recenter();
            if lower == 0.0 {
                batch = batch.saturating_mul(10);
            }
        }
        info!("confidence spent: {:e}", spending.consumed);

        Ok(Estimate {
            mean: (lower + upper) / 2.0,
            variance: last.variance,
            alpha,
            lower,
            upper,
            trials,
            hits,
            elapsed: start.elapsed(),
            convergence,
            ..last
        })
    }

    /// Runs batches of doubling size until the `1 - alpha` confidence interval of the latest
    /// has a relative error of at most `error`, or until `ceiling` trials have been run.
    ///
    /// Each batch is evaluated on its own as if it were the only one,
    /// so the confidence level does not hold for the sequence as a whole.
    pub fn run_for_relative_error_unsound(
        &mut self,
        error: f64,
        alpha: f64,
        ceiling: Option<u64>,
    ) -> Result<Estimate, SimError> {
        check_alpha(alpha)?;
        check_error(error)?;
        let start = Instant::now();
        let ceiling = ceiling.unwrap_or(u64::MAX);
        let mut batch = self.config.bootstrap_batch;
        let mut spent = 0u64;
        loop {
            batch = batch.min(ceiling - spent);
            let estimate = self.run(batch, alpha)?;
            spent += batch;
            info!(
                "relative error {:e} after {batch} trials",
                estimate.relative_error()
            );
            let convergence = if estimate.relative_error() <= error {
                Convergence::ConvergedUnsound
            } else if spent >= ceiling {
                Convergence::CeilingReached
            } else {
                self.recenter();
                batch = batch.saturating_mul(2);
                continue;
            };
            return Ok(Estimate {
                elapsed: start.elapsed(),
                convergence,
                ..estimate
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ctmc, CtmcBuilder};
    use crate::property::Property;
    use crate::reachability::ReachabilityTracer;
    use crate::scheme::Unforced;

    // Reaches the target with probability `p` in a single step.
    fn coin(p: f64) -> Arc<Ctmc> {
        let mut builder = CtmcBuilder::new();
        let start = builder.initial_state();
        let hit = builder.new_state();
        let miss = builder.new_state();
        builder.add_transition(start, hit, p).expect("add");
        builder.add_transition(start, miss, 1.0 - p).expect("add");
        builder.set_target(hit).expect("target");
        builder.set_deadline(miss).expect("deadline");
        Arc::new(builder.build())
    }

    fn simulator(p: f64, seed: u64, threads: usize) -> Simulator<ReachabilityTracer<Unforced<Ctmc>>> {
        let property = Property::new(PropertyKind::Reachability, f64::INFINITY).expect("valid property");
        let tracer = ReachabilityTracer::new(property, Unforced::new(coin(p)), seed).expect("reachability");
        let config = SimulatorConfig {
            threads: Some(threads),
            ..Default::default()
        };
        Simulator::new(tracer, config).expect("thread pool")
    }

    #[test]
    fn partitions() {
        for total in [0, 1, 5, 17, 1000, 1001, 999_999] {
            for parts in 1..=9 {
                let shares = partition(total, parts);
                assert_eq!(shares.len(), parts);
                assert_eq!(shares.iter().sum::<u64>(), total);
                let min = shares.iter().min().expect("non-empty");
                let max = shares.iter().max().expect("non-empty");
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn spending() {
        let mut spending = AlphaSpending::new(0.05, 8);
        assert_eq!(spending.first(), 0.05 / 8.0);
        let mut survival = 1.0 - spending.first();
        for _ in 0..10 {
            let alpha = spending.spend();
            assert!(alpha > 0.0);
            survival *= 1.0 - alpha;
            assert!(spending.consumed < 0.05);
        }
        assert!((1.0 - survival - spending.consumed).abs() < 1e-12);
        assert!(spending.consumed > 0.049);
    }

    #[test]
    fn intersections() {
        assert_eq!(intersect((0.1, 0.5), (0.3, 0.7)), (0.3, 0.5));
        assert_eq!(intersect((0.1, 0.5), (0.2, 0.4)), (0.2, 0.4));
        assert_eq!(intersect((0.2, 0.4), (0.1, 0.5)), (0.2, 0.4));
        assert_eq!(intersect((0.1, 0.2), (0.3, 0.4)), (0.3, 0.4));
        assert_eq!(intersect((0.3, 0.4), (0.1, 0.2)), (0.1, 0.2));
    }

    #[test]
    fn progress_flushed() -> Result<(), SimError> {
        let mut sim = simulator(0.5, 8, 3);
        // Shares of 333 and 334 are not multiples of the stride.
        sim.run(1_000, 0.05)?;
        assert_eq!(sim.progress().done(), 1_000);
        sim.run(PROGRESS_STRIDE * 3, 0.05)?;
        assert_eq!(sim.progress().done(), 1_000 + PROGRESS_STRIDE * 3);
        assert_eq!(sim.progress().target(), sim.progress().done());
        Ok(())
    }

    #[test]
    fn fixed_budget() -> Result<(), SimError> {
        let mut sim = simulator(0.2, 1, 3);
        let estimate = sim.run(10_000, 0.05)?;
        assert_eq!(estimate.trials, 10_000);
        assert!(estimate.hits <= estimate.trials);
        assert!(estimate.lower <= estimate.mean && estimate.mean <= estimate.upper);
        assert!((estimate.mean - 0.2).abs() < 0.02);
        assert_eq!(estimate.convergence, Convergence::FixedBudget);
        assert_eq!(sim.progress().done(), 10_000);
        assert_eq!(sim.progress().target(), 10_000);
        Ok(())
    }

    #[test]
    fn deterministic() -> Result<(), SimError> {
        let first = simulator(0.1, 42, 4).run(5_000, 0.05)?;
        let second = simulator(0.1, 42, 4).run(5_000, 0.05)?;
        assert_eq!(first.mean, second.mean);
        assert_eq!(first.variance, second.variance);
        assert_eq!((first.lower, first.upper), (second.lower, second.upper));
        assert_eq!((first.trials, first.hits), (second.trials, second.hits));
        Ok(())
    }

    #[test]
    fn relative_error_reached() -> Result<(), SimError> {
        let mut sim = simulator(0.01, 3, 2);
        let estimate = sim.run_for_relative_error(0.1, 0.05, None)?;
        assert_eq!(estimate.convergence, Convergence::Converged);
        assert!(estimate.relative_error() <= 0.1);
        assert!((estimate.mean - 0.01).abs() < 0.003);
        assert!((10_000..10_000_000).contains(&estimate.trials));
        assert_eq!(estimate.alpha, 0.05);
        Ok(())
    }

    #[test]
    fn unsound_relative_error() -> Result<(), SimError> {
        let mut sim = simulator(0.01, 4, 2);
        let estimate = sim.run_for_relative_error_unsound(0.1, 0.05, None)?;
        assert_eq!(estimate.convergence, Convergence::ConvergedUnsound);
        assert!(estimate.relative_error() <= 0.1);
        assert!((estimate.mean - 0.01).abs() < 0.003);
        Ok(())
    }

    #[test]
    fn ceiling() -> Result<(), SimError> {
        let mut sim = simulator(0.01, 5, 2);
        let estimate = sim.run_for_relative_error(0.001, 0.05, Some(50_000))?;
        assert_eq!(estimate.convergence, Convergence::CeilingReached);
        assert!(estimate.trials <= 50_000);
        assert!(estimate.relative_error() > 0.001);
        assert!(sim.progress().done() <= 50_000);
        let estimate = sim.run_for_relative_error_unsound(0.001, 0.05, Some(20_000))?;
        assert_eq!(estimate.convergence, Convergence::CeilingReached);
        Ok(())
    }

    #[test]
    fn timed() -> Result<(), SimError> {
        let mut sim = simulator(0.3, 6, 2);
        let estimate = sim.run_timed(Duration::from_millis(200), 5_000, 0.05)?;
        assert!(estimate.trials <= 5_000);
        assert!(estimate.lower <= estimate.upper);
        assert!(matches!(
            sim.run_timed(Duration::ZERO, 0, 0.05),
            Err(SimError::ZeroBudget)
        ));
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        let mut sim = simulator(0.5, 7, 1);
        assert!(matches!(sim.run(10, 0.0), Err(SimError::InvalidAlpha(_))));
        assert!(matches!(sim.run(10, 1.0), Err(SimError::InvalidAlpha(_))));
        assert!(matches!(
            sim.run_for_relative_error(-0.1, 0.05, None),
            Err(SimError::InvalidRelativeError(_))
        ));
        assert!(matches!(
            sim.run_for_relative_error_unsound(f64::NAN, 0.05, None),
            Err(SimError::InvalidRelativeError(_))
        ));
    }
}
