use crate::simulator::SimError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Configuration of a [`Simulator`](crate::Simulator).
///
/// Missing fields take their default value when deserialized.
///
/// ```
/// # use rarity_core::SimulatorConfig;
/// let config: SimulatorConfig = serde_json::from_str(r#"{ "threads": 4 }"#).expect("valid config");
/// assert_eq!(config.threads, Some(4));
/// assert_eq!(config.spend_rate, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Number of worker threads, defaulting to the available parallelism.
    pub threads: Option<usize>,
    /// Each refinement batch spends `(spend_rate - 1) / spend_rate` of the confidence budget left.
    pub spend_rate: u32,
    /// Per-thread size of the first batch when targeting a relative error.
    pub bootstrap_batch: u64,
    /// Hits needed before the variance estimate sizes the refinement batches.
    pub min_hits: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            threads: None,
            spend_rate: 8,
            bootstrap_batch: 1000,
            min_hits: 10,
        }
    }
}

impl SimulatorConfig {
    /// Checks the configuration and resolves the number of threads.
    pub(crate) fn validate(&self) -> Result<usize, SimError> {
        if self.spend_rate < 2 {
            return Err(SimError::InvalidSpendRate(self.spend_rate));
        } else if self.bootstrap_batch == 0 {
            return Err(SimError::ZeroBudget);
        }
        match self.threads {
            Some(0) => Err(SimError::ZeroThreads),
            Some(threads) => Ok(threads),
            None => Ok(std::thread::available_parallelism().map_or(1, NonZeroUsize::get)),
        }
    }
}
