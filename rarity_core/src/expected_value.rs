use crate::model::StateSpace;
use crate::property::{Property, PropertyKind};
use crate::scheme::Scheme;
use crate::simulator::SimError;
use crate::statistics::{Accumulator, Statistics};
use crate::tracer::Tracer;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Tracer estimating the expected time a run takes to reach a target or deadline state,
/// truncated at the time bound.
///
/// A run getting absorbed in any other state never reaches one:
/// it contributes the time bound if there is one, and the time of absorption otherwise.
/// Runs are weighted by their likelihood ratio.
#[derive(Debug, Clone)]
pub struct ExpectedValueTracer<S: Scheme> {
    property: Property,
    scheme: S,
    rng: Xoshiro256PlusPlus,
    stats: Statistics,
}

impl<S: Scheme> ExpectedValueTracer<S> {
    /// Creates a tracer drawing trials under `scheme` from a stream seeded with `seed`.
    pub fn new(property: Property, scheme: S, seed: u64) -> Result<Self, SimError> {
        if property.kind() != PropertyKind::ExpectedValue {
            return Err(SimError::KindMismatch {
                expected: PropertyKind::ExpectedValue,
                found: property.kind(),
            });
        }
        Ok(Self {
            property,
            scheme,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            stats: Statistics::default(),
        })
    }

    // Runs a trial and returns the elapsed time and the likelihood ratio of the run.
    fn trial(&mut self) -> (f64, f64) {
        let model = self.scheme.model();
        let time_bound = self.property.time_bound();
        let mut state = model.initial_state();
        let mut time = 0.0;
        let mut likelihood = 1.0;
        while !(model.is_target(state) || model.is_deadline(state)) && likelihood != 0.0 {
            if time_bound.is_infinite() && model.exit_rate(state) <= 0.0 {
                break;
            }
            let remaining = time_bound - time;
            let delay = self.scheme.sample_delta(state, remaining, &mut self.rng);
            likelihood *= delay.likelihood;
            if delay.time >= remaining {
                time = time_bound;
                break;
            }
            time += delay.time;
            match self.scheme.step(state, &mut self.rng) {
                Some(step) => {
                    state = step.state;
                    likelihood *= step.likelihood;
                }
                None => break,
            }
        }
        (time, likelihood)
    }
}

impl<S: Scheme> Tracer for ExpectedValueTracer<S> {
    type Accumulator = Statistics;

    fn property(&self) -> &Property {
        &self.property
    }

    fn generate(&mut self) {
        let (time, likelihood) = self.trial();
        if time * likelihood > 0.0 {
            self.stats.record_hit(time, likelihood);
        } else {
            self.stats.record_miss();
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
        false
    }

    fn model_size(&self) -> usize {
        self.scheme.model().size()
    }
}
