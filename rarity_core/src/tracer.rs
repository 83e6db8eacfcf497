use crate::interval::{Convergence, Estimate, confidence_interval};
use crate::property::Property;
use crate::statistics::Accumulator;
use log::warn;
use std::time::Duration;

/// Generator of independent trials for the estimation of a property.
///
/// A tracer owns the random stream its trials are drawn from
/// and the running statistics of the trials it generated.
/// It is the unit of parallel replication: the [`Simulator`](crate::Simulator)
/// replicates a tracer once per worker, runs the replicas, and folds their statistics back.
pub trait Tracer: Send + Sized {
    /// The running statistics of the trials.
    type Accumulator: Accumulator;

    /// The property estimated by the trials.
    fn property(&self) -> &Property;

    /// Runs a single trial and records its outcome.
    fn generate(&mut self);

    /// Creates a tracer with the same configuration and centering,
    /// drawing from a new random sub-stream that does not overlap with any other.
    ///
    /// Sub-streams are derived from this tracer's stream,
    /// so that the sequence of replicas only depends on the seed and the order of replication.
    fn replicate(&mut self) -> Self;

    /// Reinitializes the random stream from `seed`, leaving the statistics untouched.
    fn reseed(&mut self, seed: u64);

    /// The running statistics.
    fn accumulator(&self) -> &Self::Accumulator;

    /// The running statistics.
    fn accumulator_mut(&mut self) -> &mut Self::Accumulator;

    /// Whether trials are plain Bernoulli trials.
    fn is_binomial(&self) -> bool;

    /// The number of states of the model.
    fn model_size(&self) -> usize;

    /// The range of values the estimated quantity can take.
    fn support(&self) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }

    /// Zeroes the running statistics, keeping configuration and centering.
    fn reset(&mut self) {
        self.accumulator_mut().clear();
    }

    /// Fixes the pooled mean of this tracer and `peers` as the centering of all of them,
    /// and zeroes their statistics.
    ///
    /// Must be called before the batch whose statistics are used for the estimate,
    /// as replicas inherit the centering.
    fn estimate_mean_and_reset(&mut self, peers: &mut [Self]) {
        let centering = Self::Accumulator::pooled_centering(
            std::iter::once(self.accumulator()).chain(peers.iter().map(Tracer::accumulator)),
        );
        *self.accumulator_mut() = Self::Accumulator::centered(centering);
        for peer in peers {
            *peer.accumulator_mut() = Self::Accumulator::centered(centering);
        }
    }

    /// Replaces the running statistics with the merged statistics of `peers`.
    ///
    /// Peers are expected to share the same centering.
    /// Should one not, the statistics merged so far are discarded in favour of its own,
    /// rather than mixing statistics accumulated around different values.
    fn fold(&mut self, peers: &[Self]) {
        let mut merged: Option<Self::Accumulator> = None;
        for peer in peers.iter().map(Tracer::accumulator) {
            match merged.as_mut() {
                Some(acc) if acc.centering() == peer.centering() => acc.absorb(peer),
                Some(acc) => {
                    warn!(
                        "centering mismatch ({:?} against {:?}): discarding {} trials",
                        acc.centering(),
                        peer.centering(),
                        acc.trials()
                    );
                    *acc = peer.clone();
                }
                None => merged = Some(peer.clone()),
            }
        }
        let merged = merged.unwrap_or_else(|| Self::Accumulator::centered(self.accumulator().centering()));
        *self.accumulator_mut() = merged;
    }

    /// Renders the running statistics into an [`Estimate`] with a `1 - alpha` confidence interval.
    fn result(&self, alpha: f64, elapsed: Duration) -> Estimate {
        let acc = self.accumulator();
        let (trials, hits) = (acc.trials(), acc.hits());
        let mean = acc.mean();
        let variance = acc.variance();
        let (lower, upper) = confidence_interval(
            trials,
            hits,
            mean,
            variance,
            alpha,
            self.is_binomial(),
            self.support(),
        );
        Estimate {
            property: self.property().clone(),
            mean,
            variance,
            alpha,
            lower,
            upper,
            trials,
            hits,
            elapsed,
            model_size: self.model_size(),
            convergence: Convergence::FixedBudget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyKind;
    use crate::statistics::{Centering, Statistics};

    // Every trial yields the same value.
    #[derive(Debug, Clone)]
    struct Constant {
        property: Property,
        value: f64,
        stats: Statistics,
    }

    impl Constant {
        fn new(value: f64, centering: Centering, trials: usize) -> Self {
            let property =
                Property::new(PropertyKind::ExpectedValue, f64::INFINITY).expect("valid property");
            let mut tracer = Self {
                property,
                value,
                stats: Statistics::centered(centering),
            };
            (0..trials).for_each(|_| tracer.generate());
            tracer
        }
    }

    impl Tracer for Constant {
        type Accumulator = Statistics;

        fn property(&self) -> &Property {
            &self.property
        }

        fn generate(&mut self) {
            self.stats.record_hit(self.value, 1.0);
        }

        fn replicate(&mut self) -> Self {
            Self {
                stats: Statistics::centered(self.stats.centering()),
                ..self.clone()
            }
        }

        fn reseed(&mut self, _seed: u64) {}

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
            1
        }
    }

    #[test]
    fn pooled_centering() {
        let mut tracer = Constant::new(1.0, Centering::ZERO, 2);
        let mut peers = [
            Constant::new(4.0, Centering::ZERO, 2),
            Constant::new(2.5, Centering::ZERO, 0),
        ];
        tracer.estimate_mean_and_reset(&mut peers);
        for acc in std::iter::once(&tracer).chain(&peers).map(Tracer::accumulator) {
            assert_eq!(acc.centering(), Centering::new(2.5));
            assert_eq!(acc.trials(), 0);
            assert_eq!(acc.sum(), 0.0);
        }
        // Replicas inherit the new centering.
        assert_eq!(tracer.replicate().accumulator().centering(), Centering::new(2.5));
    }

    #[test]
    fn fold_matching() {
        let mut tracer = Constant::new(9.0, Centering::new(1.0), 5);
        let peers = [
            Constant::new(1.0, Centering::new(1.0), 3),
            Constant::new(2.0, Centering::new(1.0), 2),
        ];
        tracer.fold(&peers);
        let acc = tracer.accumulator();
        assert_eq!(acc.trials(), 5);
        assert_eq!(acc.sum(), 7.0);
        assert_eq!(acc.centering(), Centering::new(1.0));
    }

    #[test]
    fn fold_mismatch_restarts() {
        let mut tracer = Constant::new(0.0, Centering::ZERO, 0);
        let peers = [
            Constant::new(1.0, Centering::ZERO, 3),
            Constant::new(2.0, Centering::new(2.0), 2),
            Constant::new(3.0, Centering::new(2.0), 1),
        ];
        tracer.fold(&peers);
        // The first peer's trials are discarded, not averaged in.
        let acc = tracer.accumulator();
        assert_eq!(acc.trials(), 3);
        assert_eq!(acc.sum(), 7.0);
        assert_eq!(acc.centering(), Centering::new(2.0));
    }

    #[test]
    fn fold_nothing() {
        let mut tracer = Constant::new(1.0, Centering::new(0.5), 4);
        tracer.fold(&[]);
        assert_eq!(tracer.accumulator().trials(), 0);
        assert_eq!(tracer.accumulator().centering(), Centering::new(0.5));
    }
}
