//! Explicit-state continuous-time Markov chains (CTMC).
//!
//! A CTMC is given by:
//!
//! - a finite set of _states_, one of which is the _initial state_;
//! - a set of _transitions_, each from a state to a state and labelled by a positive _rate_;
//! - two sets of marked states: the _target_ states, whose reachability is being estimated,
//!   and the _deadline_ states, which end a run without it reaching the target.
//!
//! The _exit rate_ of a state is the sum of the rates of its outgoing transitions.
//! A state without outgoing transitions is _absorbing_ and has exit rate zero.
//!
//! A CTMC is represented by a [`Ctmc`] and defined through a [`CtmcBuilder`].
//! The estimation engine only requires a model to implement [`StateSpace`],
//! so other representations can be plugged in.
//!
//! ```
//! # use rarity_core::{CtmcBuilder, StateSpace};
//! let mut builder = CtmcBuilder::new();
//! let initial = builder.initial_state();
//! let next = builder.new_state();
//! builder.add_transition(initial, next, 2.0).expect("both states exist");
//! builder.add_transition(initial, initial, 0.5).expect("self-loops are allowed");
//! builder.add_transition(initial, 7, 1.0).expect_err("state 7 does not exist");
//! builder.set_target(next).expect("state exists");
//! let ctmc = builder.build();
//! assert_eq!(ctmc.exit_rate(initial), 2.5);
//! assert_eq!(ctmc.exit_rate(next), 0.0);
//! assert!(ctmc.is_target(next));
//! ```

use log::info;
use thiserror::Error;

/// An index of a state in a [`StateSpace`].
pub type State = usize;

/// The error type for building [`Ctmc`]s and the schemes running on them.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// There is no such state in the model.
    #[error("state {0} does not belong to this model")]
    MissingState(State),
    /// Transition rates have to be finite and positive.
    #[error("invalid transition rate {0}")]
    InvalidRate(f64),
    /// Importance weights have to be given for every state.
    #[error("expected {expected} importance weights, found {found}")]
    WeightsLength {
        /// Number of states of the model.
        expected: usize,
        /// Number of weights provided.
        found: usize,
    },
    /// Importance weights have to be finite and positive.
    #[error("invalid importance weight {1} for state {0}")]
    InvalidWeight(State, f64),
}

/// The interface the estimation engine needs from a model.
///
/// Implementations are read-only during simulation and shared between worker threads.
pub trait StateSpace: Send + Sync {
    /// The state every run starts from.
    fn initial_state(&self) -> State;

    /// The number of states.
    fn size(&self) -> usize;

    /// The outgoing transitions of `state`, as pairs of post-state and rate.
    fn transitions(&self, state: State) -> &[(State, f64)];

    /// The sum of the rates of the outgoing transitions of `state`.
    fn exit_rate(&self, state: State) -> f64;

    /// Whether reaching `state` satisfies the property.
    fn is_target(&self, state: State) -> bool;

    /// Whether reaching `state` ends a run without satisfying the property.
    fn is_deadline(&self, state: State) -> bool;
}

/// Defines and builds a [`Ctmc`].
#[derive(Debug, Clone)]
pub struct CtmcBuilder {
    // Transitions are indexed by pre-state
    transitions: Vec<Vec<(State, f64)>>,
    targets: Vec<bool>,
    deadlines: Vec<bool>,
    initial: State,
}

impl Default for CtmcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CtmcBuilder {
    /// Creates a new [`CtmcBuilder`] containing only the initial state.
    pub fn new() -> Self {
        let mut builder = Self {
            transitions: Vec::new(),
            targets: Vec::new(),
            deadlines: Vec::new(),
            initial: 0,
        };
        let initial = builder.new_state();
        assert_eq!(initial, builder.initial);
        builder
    }

    /// Gets the initial state.
    ///
    /// This is created together with the [`CtmcBuilder`],
    /// but can be changed with [`CtmcBuilder::set_initial`].
    pub fn initial_state(&self) -> State {
        self.initial
    }

    fn check(&self, state: State) -> Result<(), ModelError> {
        if state < self.transitions.len() {
            Ok(())
        } else {
            Err(ModelError::MissingState(state))
        }
    }

    /// Adds a new state with no transitions.
    pub fn new_state(&mut self) -> State {
        let idx = self.transitions.len();
        self.transitions.push(Vec::new());
        self.targets.push(false);
        self.deadlines.push(false);
        idx
    }

    /// Adds a transition between existing states.
    ///
    /// It fails if either state does not exist or if the rate is not finite and positive.
    pub fn add_transition(&mut self, pre: State, post: State, rate: f64) -> Result<(), ModelError> {
        self.check(pre)?;
        self.check(post)?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ModelError::InvalidRate(rate));
        }
        self.transitions[pre].push((post, rate));
        Ok(())
    }

    /// Marks a state as a target state.
    pub fn set_target(&mut self, state: State) -> Result<(), ModelError> {
        self.check(state)?;
        self.targets[state] = true;
        Ok(())
    }

    /// Marks a state as a deadline state.
    pub fn set_deadline(&mut self, state: State) -> Result<(), ModelError> {
        self.check(state)?;
        self.deadlines[state] = true;
        Ok(())
    }

    /// Makes an existing state the initial state.
    pub fn set_initial(&mut self, state: State) -> Result<(), ModelError> {
        self.check(state)?;
        self.initial = state;
        Ok(())
    }

    /// Builds the [`Ctmc`].
    ///
    /// Building cannot fail, as the builder only accepts well-defined states and transitions.
    pub fn build(self) -> Ctmc {
        let transitions: Vec<Box<[(State, f64)]>> = self
            .transitions
            .into_iter()
            .map(Vec::into_boxed_slice)
            .collect();
        let exit_rates: Vec<f64> = transitions
            .iter()
            .map(|out| out.iter().map(|(_, rate)| rate).sum())
            .collect();
        info!(
            "built CTMC with {} states and {} transitions",
            transitions.len(),
            transitions.iter().map(|out| out.len()).sum::<usize>()
        );
        Ctmc {
            transitions,
            exit_rates,
            targets: self.targets,
            deadlines: self.deadlines,
            initial: self.initial,
        }
    }
}

/// An immutable explicit-state CTMC, built by a [`CtmcBuilder`].
#[derive(Debug, Clone)]
pub struct Ctmc {
    transitions: Vec<Box<[(State, f64)]>>,
    exit_rates: Vec<f64>,
    targets: Vec<bool>,
    deadlines: Vec<bool>,
    initial: State,
}

impl Ctmc {
    /// The exit rates of all states, indexed by state.
    pub fn exit_rates(&self) -> &[f64] {
        &self.exit_rates
    }
}

impl StateSpace for Ctmc {
    fn initial_state(&self) -> State {
        self.initial
    }

    fn size(&self) -> usize {
        self.transitions.len()
    }

    fn transitions(&self, state: State) -> &[(State, f64)] {
        &self.transitions[state]
    }

    fn exit_rate(&self, state: State) -> f64 {
        self.exit_rates[state]
    }

    fn is_target(&self, state: State) -> bool {
        self.targets[state]
    }

    fn is_deadline(&self, state: State) -> bool {
        self.deadlines[state]
    }
}
