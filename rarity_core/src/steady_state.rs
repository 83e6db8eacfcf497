use crate::model::StateSpace;
use crate::property::{Property, PropertyKind};
use crate::scheme::Scheme;
use crate::simulator::SimError;
use crate::statistics::{Accumulator, RatioStatistics};
use crate::tracer::Tracer;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Tracer estimating the long-run fraction of time spent in target states,
/// by the regenerative method.
///
/// Every return to the initial state starts afresh, so each trial is a cycle
/// from the initial state back to it, recording the time spent in target states and the cycle length.
/// The estimate is the ratio of their means.
/// A cycle ending in an absorbing state stops there.
#[derive(Debug, Clone)]
pub struct SteadyStateTracer<S: Scheme> {
    property: Property,
    scheme: S,
    rng: Xoshiro256PlusPlus,
    stats: RatioStatistics,
}

impl<S: Scheme> SteadyStateTracer<S> {
    /// Creates a tracer drawing cycles under `scheme` from a stream seeded with `seed`.
    ///
    /// Fails unless the property is an unbounded steady-state property
    /// and the scheme samples runs from the model's own dynamics.
    pub fn new(property: Property, scheme: S, seed: u64) -> Result<Self, SimError> {
        if property.kind() != PropertyKind::SteadyState {
            return Err(SimError::KindMismatch {
                expected: PropertyKind::SteadyState,
                found: property.kind(),
            });
        } else if property.is_time_bounded() {
            return Err(SimError::BoundedSteadyState);
        } else if !scheme.is_binomial() {
            return Err(SimError::ForcedSteadyState);
        }
        Ok(Self {
            property,
            scheme,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            stats: RatioStatistics::default(),
        })
    }

    // Runs a cycle and returns the time spent in target states and its length.
    fn cycle(&mut self) -> (f64, f64) {
        let model = self.scheme.model();
        let initial = model.initial_state();
        let mut state = initial;
        let (mut reward, mut length) = (0.0, 0.0);
        while model.exit_rate(state) > 0.0 {
            let delay = self.scheme.sample_delta(state, f64::INFINITY, &mut self.rng);
            length += delay.time;
            if model.is_target(state) {
                reward += delay.time;
            }
            match self.scheme.step(state, &mut self.rng) {
                Some(step) if step.state != initial => state = step.state,
                _ => break,
            }
        }
        (reward, length)
    }
}

impl<S: Scheme> Tracer for SteadyStateTracer<S> {
    type Accumulator = RatioStatistics;

    fn property(&self) -> &Property {
        &self.property
    }

    fn generate(&mut self) {
        let (reward, length) = self.cycle();
        self.stats.record(reward, length);
    }

    fn replicate(&mut self) -> Self {
        let rng = self.rng.clone();
        self.rng.jump();
        Self {
            property: self.property.clone(),
            scheme: self.scheme.clone(),
            rng,
            stats: RatioStatistics::centered(self.stats.centering()),
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    }

    fn accumulator(&self) -> &RatioStatistics {
        &self.stats
    }

    fn accumulator_mut(&mut self) -> &mut RatioStatistics {
        &mut self.stats
    }

    // The ratio estimator is not a binomial proportion.
    fn is_binomial(&self) -> bool {
        false
    }

    fn model_size(&self) -> usize {
        self.scheme.model().size()
    }

    fn support(&self) -> (f64, f64) {
        (0.0, 1.0)
    }
}
