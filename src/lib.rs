//! Command line front-end of the rarity statistical model checker.
//!
//! It runs the estimation engine of [`rarity_core`] on a bounded birth-death queue,
//! whose overflow becomes a rare event as the capacity grows.

mod cli;
mod queue;

pub use cli::{Cli, Kind};
pub use queue::{birth_death, importance_weights};
pub use rarity_core;
