//! Bounded birth-death queue, the model the command line front-end runs on.
//!
//! States count the jobs in the queue, from `0` to `capacity`.
//! Jobs arrive at rate `arrival` until the queue is full and are served at rate `service`.
//! Runs start with a single job; the queue overflowing (reaching `capacity`) is the target,
//! while the queue emptying is the deadline.
//! With `arrival < service` the queue drifts towards empty, and overflow becomes rare as capacity grows.

use rarity_core::{Ctmc, CtmcBuilder, ModelError, State};

/// Builds the queue with the given capacity and rates.
pub fn birth_death(capacity: usize, arrival: f64, service: f64) -> Result<Ctmc, ModelError> {
    let mut builder = CtmcBuilder::new();
    let empty = builder.initial_state();
    let states: Vec<State> = std::iter::once(empty)
        .chain((0..capacity).map(|_| builder.new_state()))
        .collect();
    for pair in states.windows(2) {
        builder.add_transition(pair[0], pair[1], arrival)?;
        builder.add_transition(pair[1], pair[0], service)?;
    }
    builder.set_initial(1)?;
    builder.set_deadline(empty)?;
    builder.set_target(capacity)?;
    Ok(builder.build())
}

/// Importance weights swapping arrival and service dynamics under forcing:
/// state `s` weighs `(service / arrival)^s`.
pub fn importance_weights(capacity: usize, arrival: f64, service: f64) -> Vec<f64> {
    let ratio = service / arrival;
    (0..=capacity).map(|jobs| ratio.powi(jobs as i32)).collect()
}
