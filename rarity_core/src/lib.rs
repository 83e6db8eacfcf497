//! Rare-event statistical model checking of continuous-time Markov chains.
//!
//! Given a [`StateSpace`] and a [`Property`], the engine estimates the property's value
//! by Monte Carlo simulation and reports a confidence interval.
//! Rare events are made estimable by importance sampling ("forcing"),
//! implemented by the [`Scheme`]s the simulation runs under.
//!
//! The pieces fit together as follows:
//!
//! - a [`Tracer`] runs independent trials and accumulates their statistics;
//! - the [`Simulator`] replicates the tracer across worker threads,
//!   runs batches of trials and merges the workers' statistics;
//! - the [`interval`] builder turns the merged statistics into an [`Estimate`].
//!
//! ```
//! # use rarity_core::*;
//! // A chain that leaves state 0 for either the target 1 or the deadline 2.
//! let mut builder = CtmcBuilder::new();
//! let start = builder.initial_state();
//! let hit = builder.new_state();
//! let miss = builder.new_state();
//! builder.add_transition(start, hit, 1.0).expect("states exist");
//! builder.add_transition(start, miss, 99.0).expect("states exist");
//! builder.set_target(hit).expect("state exists");
//! builder.set_deadline(miss).expect("state exists");
//! let model = std::sync::Arc::new(builder.build());
//!
//! let property = Property::new(PropertyKind::Reachability, f64::INFINITY).expect("valid bound");
//! let tracer = ReachabilityTracer::new(property, Unforced::new(model), 42).expect("reachability");
//! let config = SimulatorConfig { threads: Some(2), ..Default::default() };
//! let mut simulator = Simulator::new(tracer, config).expect("thread pool");
//! let estimate = simulator.run(10_000, 0.05).expect("valid alpha");
//! assert_eq!(estimate.trials, 10_000);
//! assert!(estimate.lower < 0.02 && 0.005 < estimate.upper);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod expected_value;
pub mod interval;
mod model;
mod property;
mod property_tracer;
mod reachability;
mod scheme;
mod simulator;
mod statistics;
mod steady_state;
mod tracer;

pub use config::SimulatorConfig;
pub use expected_value::ExpectedValueTracer;
pub use interval::{Convergence, Estimate};
pub use model::{Ctmc, CtmcBuilder, ModelError, State, StateSpace};
pub use property::{Property, PropertyKind};
pub use property_tracer::PropertyTracer;
pub use reachability::{ReachabilityTracer, path_probability};
pub use scheme::{Delay, Forced, Scheme, Step, Unforced};
pub use simulator::{Budget, Progress, SimError, Simulator, partition};
pub use statistics::{Accumulator, Centering, RatioStatistics, Statistics, normal_quantile};
pub use steady_state::SteadyStateTracer;
pub use tracer::Tracer;
