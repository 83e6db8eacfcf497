//! Time-bounded reachability.
//!
//! A trial runs the model from its initial state until it reaches a target state,
//! a deadline state, an absorbing state or the time bound.
//! Its outcome is the likelihood ratio of the run if it reached the target, and zero otherwise.
//!
//! When exact path probabilities are requested, sojourn times are not sampled at all:
//! the run records how many times it left each state,
//! and a hit is weighted by the probability of the recorded races completing within the time bound
//! (see [`path_probability`]).

mod transient;

pub use transient::path_probability;

use crate::model::StateSpace;
use crate::property::{Property, PropertyKind};
use crate::scheme::Scheme;
use crate::simulator::SimError;
use crate::statistics::{Accumulator, Statistics};
use crate::tracer::Tracer;
use log::trace;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Tracer estimating the probability of reaching a target state
/// before any deadline state and within the time bound.
#[derive(Debug, Clone)]
pub struct ReachabilityTracer<S: Scheme> {
    property: Property,
    scheme: S,
    rng: Xoshiro256PlusPlus,
    stats: Statistics,
    exact_paths: bool,
}

impl<S: Scheme> ReachabilityTracer<S> {
    /// Creates a tracer drawing trials under `scheme` from a stream seeded with `seed`.
    pub fn new(property: Property, scheme: S, seed: u64) -> Result<Self, SimError> {
        if property.kind() != PropertyKind::Reachability {
            return Err(SimError::KindMismatch {
                expected: PropertyKind::Reachability,
                found: property.kind(),
            });
        }
        Ok(Self {
            property,
            scheme,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            stats: Statistics::default(),
            exact_paths: false,
        })
    }

    /// Weights hits by the exact probability of their path completing within the time bound,
    /// instead of sampling sojourn times.
    ///
    /// Only effective for time-bounded properties under schemes that do not force time.
    pub fn with_exact_paths(mut self, exact_paths: bool) -> Self {
        self.exact_paths = exact_paths;
        self
    }

    /// The scheme trials are drawn under.
    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    fn records_path(&self) -> bool {
        self.exact_paths && !self.scheme.forces_time() && self.property.is_time_bounded()
    }

    // Runs a trial and returns its weight if it is a hit.
    fn trial(&mut self) -> Option<f64> {
        let model = self.scheme.model();
        let time_bound = self.property.time_bound();
        let mut path = self.records_path().then(|| vec![0u32; model.size()]);
        let mut state = model.initial_state();
        let mut time = 0.0;
        let mut likelihood = 1.0f64;
        loop {
            if model.is_target(state) {
                break;
            } else if model.is_deadline(state) || likelihood == 0.0 {
                return None;
            }
            if let Some(path) = path.as_mut() {
                if model.exit_rate(state) <= 0.0 {
                    return None;
                }
                path[state] += 1;
            } else if time_bound.is_finite() {
                let remaining = time_bound - time;
                let delay = self.scheme.sample_delta(state, remaining, &mut self.rng);
                if delay.time >= remaining {
                    return None;
                }
                time += delay.time;
                likelihood *= delay.likelihood;
            }
            let step = self.scheme.step(state, &mut self.rng)?;
            state = step.state;
            likelihood *= step.likelihood;
        }
        let prob = match path {
            Some(path) => path_probability(&path, |s| model.exit_rate(s), time_bound),
            None => 1.0,
        };
        trace!("hit at time {time} with likelihood {likelihood} and path probability {prob}");
        Some(prob * likelihood)
    }
}

impl<S: Scheme> Tracer for ReachabilityTracer<S> {
    type Accumulator = Statistics;

    fn property(&self) -> &Property {
        &self.property
    }

    fn generate(&mut self) {
        match self.trial() {
            Some(weight) if weight > 0.0 => self.stats.record_hit(1.0, weight),
            _ => self.stats.record_miss(),
        }
    }

    fn replicate(&mut self) -> Self {
        let rng = self.rng.clone();
        self.rng.jump();
        Self {
            property: self.property.clone(),
            scheme: self.scheme.clone(),
            rng,
            stats: Statistics::centered(self.stats.centering()),
            exact_paths: self.exact_paths,
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    }

    fn accumulator(&self) -> &Statistics {
        &self.stats
    }

    fn accumulator_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    fn is_binomial(&self) -> bool {
        self.scheme.is_binomial() && !self.records_path()
    }

    fn model_size(&self) -> usize {
        self.scheme.model().size()
    }

    fn support(&self) -> (f64, f64) {
        (0.0, 1.0)
    }
}
