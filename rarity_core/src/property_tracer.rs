use crate::config::SimulatorConfig;
use crate::expected_value::ExpectedValueTracer;
use crate::interval::Estimate;
use crate::property::{Property, PropertyKind};
use crate::reachability::ReachabilityTracer;
use crate::scheme::Scheme;
use crate::simulator::{Budget, Progress, SimError, Simulator};
use crate::steady_state::SteadyStateTracer;
use crate::tracer::Tracer;
use std::sync::Arc;

/// A tracer for any kind of property, selected by [`PropertyKind`].
#[derive(Debug, Clone)]
pub enum PropertyTracer<S: Scheme> {
    /// See [`ReachabilityTracer`].
    Reachability(ReachabilityTracer<S>),
    /// See [`SteadyStateTracer`].
    SteadyState(SteadyStateTracer<S>),
    /// See [`ExpectedValueTracer`].
    ExpectedValue(ExpectedValueTracer<S>),
}

impl<S: Scheme> PropertyTracer<S> {
    /// Creates the tracer estimating `property` under `scheme`, from a stream seeded with `seed`.
    ///
    /// `exact_paths` only affects reachability properties
    /// (see [`ReachabilityTracer::with_exact_paths`]).
    pub fn new(property: Property, scheme: S, seed: u64, exact_paths: bool) -> Result<Self, SimError> {
        match property.kind() {
            PropertyKind::Reachability => ReachabilityTracer::new(property, scheme, seed)
                .map(|tracer| Self::Reachability(tracer.with_exact_paths(exact_paths))),
            PropertyKind::SteadyState => {
                SteadyStateTracer::new(property, scheme, seed).map(Self::SteadyState)
            }
            PropertyKind::ExpectedValue => {
                ExpectedValueTracer::new(property, scheme, seed).map(Self::ExpectedValue)
            }
        }
    }

    /// The kind of property estimated.
    pub fn kind(&self) -> PropertyKind {
        self.property().kind()
    }

    /// The property estimated.
    pub fn property(&self) -> &Property {
        match self {
            PropertyTracer::Reachability(tracer) => tracer.property(),
            PropertyTracer::SteadyState(tracer) => tracer.property(),
            PropertyTracer::ExpectedValue(tracer) => tracer.property(),
        }
    }

    /// Estimates the property within `budget` with a `1 - alpha` confidence interval,
    /// running a [`Simulator`] that reports to `progress`.
    pub fn estimate(
        self,
        config: SimulatorConfig,
        progress: Arc<Progress>,
        budget: Budget,
        alpha: f64,
    ) -> Result<Estimate, SimError> {
        match self {
            PropertyTracer::Reachability(tracer) => {
                Simulator::with_progress(tracer, config, progress)?.estimate(budget, alpha)
            }
            PropertyTracer::SteadyState(tracer) => {
                Simulator::with_progress(tracer, config, progress)?.estimate(budget, alpha)
            }
            PropertyTracer::ExpectedValue(tracer) => {
                Simulator::with_progress(tracer, config, progress)?.estimate(budget, alpha)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ctmc, CtmcBuilder};
    use crate::scheme::{Forced, Unforced};

    // Cycles 0 -> 1 -> 2 -> 0 at rates 1, 2 and 4; 1 is the target.
    fn cycle() -> Arc<Ctmc> {
        let mut builder = CtmcBuilder::new();
        let first = builder.initial_state();
        let second = builder.new_state();
        let third = builder.new_state();
        builder.add_transition(first, second, 1.0).expect("add");
        builder.add_transition(second, third, 2.0).expect("add");
        builder.add_transition(third, first, 4.0).expect("add");
        builder.set_target(second).expect("target");
        Arc::new(builder.build())
    }

    fn config() -> SimulatorConfig {
        SimulatorConfig {
            threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn dispatch() -> Result<(), SimError> {
        for (kind, time_bound) in [
            (PropertyKind::Reachability, 1.0),
            (PropertyKind::SteadyState, f64::INFINITY),
            (PropertyKind::ExpectedValue, 2.0),
        ] {
            let property = Property::new(kind, time_bound)?;
            let tracer = PropertyTracer::new(property, Unforced::new(cycle()), 0, false)?;
            assert_eq!(tracer.kind(), kind);
        }
        Ok(())
    }

    #[test]
    fn steady_state() -> Result<(), SimError> {
        // Sojourns of 1, 1/2 and 1/4 per cycle.
        let property = Property::new(PropertyKind::SteadyState, f64::INFINITY)?;
        let tracer = PropertyTracer::new(property, Unforced::new(cycle()), 1, false)?;
        let progress = Arc::new(Progress::default());
        let estimate = tracer.estimate(config(), progress.clone(), Budget::Samples(20_000), 0.05)?;
        assert!((estimate.mean - 0.5 / 1.75).abs() < 0.01);
        assert!(estimate.lower < estimate.mean && estimate.mean < estimate.upper);
        assert_eq!(progress.done(), 20_000);
        Ok(())
    }

    #[test]
    fn expected_value() -> Result<(), SimError> {
        // First visit to the target after Exp(1).
        let property = Property::new(PropertyKind::ExpectedValue, f64::INFINITY)?;
        let tracer = PropertyTracer::new(property, Unforced::new(cycle()), 2, false)?;
        let estimate = tracer.estimate(config(), Arc::default(), Budget::Samples(20_000), 0.05)?;
        assert!((estimate.mean - 1.0).abs() < 0.05);
        Ok(())
    }

    #[test]
    fn forced_steady_state() -> Result<(), SimError> {
        let property = Property::new(PropertyKind::SteadyState, f64::INFINITY)?;
        let scheme = Forced::new(cycle(), vec![1.0; 3]).expect("valid weights");
        assert!(matches!(
            PropertyTracer::new(property, scheme, 0, false),
            Err(SimError::ForcedSteadyState)
        ));
        Ok(())
    }
}
