//! Sampling schemes: the probability measure simulation runs are drawn from.
//!
//! Under [`Unforced`] the runs follow the model's own dynamics.
//! Under [`Forced`] they follow a changed measure that makes the target more likely,
//! and every step reports the likelihood ratio between the original and the changed measure,
//! so that weighting each run by the product of its ratios gives an unbiased estimator.

use crate::model::{ModelError, State, StateSpace};
use rand::Rng;
use std::sync::Arc;

/// The outcome of a discrete step of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// The post-state.
    pub state: State,
    /// The likelihood ratio of the step between the original and the sampling measure.
    pub likelihood: f64,
}

/// The sojourn time in a state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delay {
    /// Time spent in the state, never exceeding the remaining time.
    pub time: f64,
    /// The likelihood ratio of the delay between the original and the sampling measure.
    pub likelihood: f64,
}

/// A strategy for sampling the runs of a model.
///
/// Schemes are cloned once per worker thread.
/// Clones share the (immutable) model.
pub trait Scheme: Clone + Send + Sync {
    /// The model runs are sampled from.
    type Model: StateSpace;

    /// The model runs are sampled from.
    fn model(&self) -> &Self::Model;

    /// Samples the next state from `state`.
    ///
    /// Returns `None` if `state` is absorbing.
    fn step<R: Rng + ?Sized>(&self, state: State, rng: &mut R) -> Option<Step>;

    /// Samples the time spent in `state`, capped by the `remaining` time.
    fn sample_delta<R: Rng + ?Sized>(&self, state: State, remaining: f64, rng: &mut R) -> Delay;

    /// Whether runs are plain Bernoulli trials, i.e., every likelihood ratio is one.
    fn is_binomial(&self) -> bool;

    /// Whether sojourn times are forced below the remaining time.
    fn forces_time(&self) -> bool {
        false
    }
}

// Draws an exponentially distributed delay.
fn exponential<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> f64 {
    // `1 - u` lies in (0, 1], so the logarithm is finite.
    let u: f64 = rng.random();
    -(1.0 - u).ln() / rate
}

// Picks the index of a weighted alternative.
fn choose<R: Rng + ?Sized>(weights: impl Iterator<Item = f64>, total: f64, rng: &mut R) -> usize {
    let mut threshold = rng.random::<f64>() * total;
    let mut last = 0;
    for (idx, weight) in weights.enumerate() {
        if threshold < weight {
            return idx;
        }
        threshold -= weight;
        last = idx;
    }
    // Only reachable through rounding errors.
    last
}

/// Plain Monte Carlo: runs follow the model's own dynamics.
#[derive(Debug)]
pub struct Unforced<M: StateSpace> {
    model: Arc<M>,
}

impl<M: StateSpace> Clone for Unforced<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
        }
    }
}

impl<M: StateSpace> Unforced<M> {
    /// Creates a scheme sampling the model's own dynamics.
    pub fn new(model: Arc<M>) -> Self {
        Self { model }
    }
}

impl<M: StateSpace> Scheme for Unforced<M> {
    type Model = M;

    fn model(&self) -> &M {
        &self.model
    }

    fn step<R: Rng + ?Sized>(&self, state: State, rng: &mut R) -> Option<Step> {
        let transitions = self.model.transitions(state);
        if transitions.is_empty() {
            return None;
        }
        let idx = choose(
            transitions.iter().map(|(_, rate)| *rate),
            self.model.exit_rate(state),
            rng,
        );
        Some(Step {
            state: transitions[idx].0,
            likelihood: 1.0,
        })
    }

    fn sample_delta<R: Rng + ?Sized>(&self, state: State, remaining: f64, rng: &mut R) -> Delay {
        let rate = self.model.exit_rate(state);
        let time = if rate > 0.0 {
            exponential(rate, rng).min(remaining)
        } else {
            remaining
        };
        Delay {
            time,
            likelihood: 1.0,
        }
    }

    fn is_binomial(&self) -> bool {
        true
    }
}

/// Importance sampling by state importance.
///
/// From a state `s`, the post-state `t` is sampled with probability proportional to `rate(s, t) * w(t)`,
/// where `w` assigns a positive importance weight to every state.
/// Weights growing towards the target make runs drift towards it.
///
/// With time forcing enabled, sojourn times are sampled conditioned on ending before the time bound,
/// so that no run is lost to the time bound.
#[derive(Debug)]
pub struct Forced<M: StateSpace> {
    model: Arc<M>,
    weights: Arc<[f64]>,
    force_time: bool,
}

impl<M: StateSpace> Clone for Forced<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            weights: Arc::clone(&self.weights),
            force_time: self.force_time,
        }
    }
}

impl<M: StateSpace> Forced<M> {
    /// Creates a scheme biasing transitions by the given importance weights, indexed by state.
    ///
    /// It fails unless there is exactly one finite, positive weight per state.
    pub fn new(model: Arc<M>, weights: Vec<f64>) -> Result<Self, ModelError> {
        if weights.len() != model.size() {
            return Err(ModelError::WeightsLength {
                expected: model.size(),
                found: weights.len(),
            });
        }
        if let Some((state, &weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && **w > 0.0))
        {
            return Err(ModelError::InvalidWeight(state, weight));
        }
        Ok(Self {
            model,
            weights: weights.into(),
            force_time: false,
        })
    }

    /// Enables or disables time forcing.
    pub fn with_time_forcing(mut self, force_time: bool) -> Self {
        self.force_time = force_time;
        self
    }
}

impl<M: StateSpace> Scheme for Forced<M> {
    type Model = M;

    fn model(&self) -> &M {
        &self.model
    }

    fn step<R: Rng + ?Sized>(&self, state: State, rng: &mut R) -> Option<Step> {
        let transitions = self.model.transitions(state);
        if transitions.is_empty() {
            return None;
        }
        let biased = transitions
            .iter()
            .map(|&(post, rate)| rate * self.weights[post]);
        let total: f64 = biased.clone().sum();
        let idx = choose(biased, total, rng);
        let (post, _) = transitions[idx];
        // p(s, t) / q(s, t) = (rate / exit) / (rate * w(t) / total)
        let likelihood = total / (self.model.exit_rate(state) * self.weights[post]);
        Some(Step {
            state: post,
            likelihood,
        })
    }

    fn sample_delta<R: Rng + ?Sized>(&self, state: State, remaining: f64, rng: &mut R) -> Delay {
        let rate = self.model.exit_rate(state);
        if !self.force_time || rate <= 0.0 || remaining.is_infinite() {
            let time = if rate > 0.0 {
                exponential(rate, rng).min(remaining)
            } else {
                remaining
            };
            return Delay {
                time,
                likelihood: 1.0,
            };
        }
        // Probability of leaving the state before the time bound.
        let within = -(-rate * remaining).exp_m1();
        let u: f64 = rng.random();
        // Inverse of the exponential CDF restricted to [0, remaining).
        let time = -(-u * within).ln_1p() / rate;
        Delay {
            time,
            likelihood: within,
        }
    }

    fn is_binomial(&self) -> bool {
        false
    }

    fn forces_time(&self) -> bool {
        self.force_time
    }
}
