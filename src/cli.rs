use crate::{birth_death, importance_weights};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rarity_core::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const DEFAULT_RUNS: u64 = 100_000;

/// Kinds of properties that can be estimated on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// Probability of the queue overflowing before it empties
    Reachability,
    /// Long-run fraction of time the queue is full
    SteadyState,
    /// Expected time until the queue overflows or empties
    ExpectedValue,
}

impl From<Kind> for PropertyKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Reachability => PropertyKind::Reachability,
            Kind::SteadyState => PropertyKind::SteadyState,
            Kind::ExpectedValue => PropertyKind::ExpectedValue,
        }
    }
}

/// A rare-event statistical model checker, estimating the overflow of a bounded queue
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Capacity of the queue
    #[arg(short = 'k', long, default_value_t = 10)]
    capacity: usize,
    /// Arrival rate
    #[arg(long, default_value_t = 1.0)]
    arrival: f64,
    /// Service rate
    #[arg(long, default_value_t = 2.0)]
    service: f64,
    /// Property to estimate
    #[arg(long, value_enum, default_value_t = Kind::Reachability)]
    property: Kind,
    /// Time bound of the property (none if omitted)
    #[arg(short, long)]
    time_bound: Option<f64>,
    /// Sample under importance sampling, swapping arrival and service dynamics
    #[arg(short, long)]
    force: bool,
    /// Force sojourn times below the time bound (requires --force)
    #[arg(long, requires = "force")]
    force_time: bool,
    /// Weight hits by the exact probability of their path meeting the time bound
    #[arg(long)]
    exact_paths: bool,
    /// One minus the confidence level
    #[arg(short, long, default_value_t = 0.05)]
    alpha: f64,
    /// Number of runs [default: 100000]
    #[arg(short = 'n', long, conflicts_with_all = ["time_ms", "rel_err"])]
    runs: Option<u64>,
    /// Time budget in milliseconds
    #[arg(long, conflicts_with = "rel_err")]
    time_ms: Option<u64>,
    /// Target relative error of the confidence interval
    #[arg(short = 'e', long)]
    rel_err: Option<f64>,
    /// Maximum number of runs for --time-ms and --rel-err
    #[arg(long)]
    limit: Option<u64>,
    /// Reach the relative error by doubling the runs, without preserving the confidence level
    #[arg(long, requires = "rel_err")]
    unsound: bool,
    /// Number of worker threads [default: available parallelism]
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Seed of the random streams
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
    /// Print the estimate as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Builds the queue, estimates the property and prints the estimate.
    pub fn run(&self) -> anyhow::Result<()> {
        let model = Arc::new(
            birth_death(self.capacity, self.arrival, self.service)
                .context("failed to build the queue model")?,
        );
        let property = Property::new(
            self.property.into(),
            self.time_bound.unwrap_or(f64::INFINITY),
        )?;
        let config = SimulatorConfig {
            threads: self.threads,
            ..Default::default()
        };
        info!("estimating {property:?} with seed {}", self.seed);

        let estimate = if self.force {
            let weights = importance_weights(self.capacity, self.arrival, self.service);
            let scheme = Forced::new(model, weights)
                .context("failed to build importance sampling scheme")?
                .with_time_forcing(self.force_time);
            let tracer = PropertyTracer::new(property, scheme, self.seed, self.exact_paths)?;
            self.estimate(tracer, config)?
        } else {
            let tracer =
                PropertyTracer::new(property, Unforced::new(model), self.seed, self.exact_paths)?;
            self.estimate(tracer, config)?
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&estimate)?);
        } else {
            self.print(&estimate);
        }
        Ok(())
    }

    fn budget(&self) -> Budget {
        match (self.rel_err, self.time_ms) {
            (Some(error), _) if self.unsound => Budget::RelativeErrorUnsound {
                error,
                ceiling: self.limit,
            },
            (Some(error), _) => Budget::RelativeError {
                error,
                ceiling: self.limit,
            },
            (None, Some(msec)) => Budget::Time {
                budget: Duration::from_millis(msec),
                max_samples: self.limit.unwrap_or(0),
            },
            (None, None) => Budget::Samples(self.runs.unwrap_or(DEFAULT_RUNS)),
        }
    }

    // Runs the estimation while a progress bar polls its progress.
    fn estimate<S: Scheme>(
        &self,
        tracer: PropertyTracer<S>,
        config: SimulatorConfig,
    ) -> anyhow::Result<Estimate> {
        let progress = Arc::new(Progress::default());
        let finished = AtomicBool::new(false);
        let estimate = std::thread::scope(|scope| {
            let observed = Arc::clone(&progress);
            let finished = &finished;
            scope.spawn(move || {
                let style = ProgressStyle::with_template(
                    "[{elapsed_precise}] {percent:>3}% {wide_bar} {pos}/{len} ETA: {eta:<5}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                let bar = ProgressBar::new(0).with_style(style);
                while !finished.load(Ordering::Relaxed) {
                    bar.set_length(observed.target());
                    bar.set_position(observed.done());
                    // Sleep a while to limit update/refresh rate.
                    std::thread::sleep(Duration::from_millis(100));
                }
                bar.finish_and_clear();
            });
            let estimate = tracer.estimate(config, progress, self.budget(), self.alpha);
            finished.store(true, Ordering::Relaxed);
            estimate
        });
        estimate.context("estimation failed")
    }

    fn print(&self, estimate: &Estimate) {
        println!(
            "{:?} property of a queue of capacity {} ({} states)",
            estimate.property.kind(),
            self.capacity,
            estimate.model_size
        );
        println!("Estimate: {:e}", estimate.mean);
        println!(
            "{}% confidence interval: [{:e}, {:e}]",
            (1.0 - estimate.alpha) * 100.0,
            estimate.lower,
            estimate.upper
        );
        println!("Relative error: {:e}", estimate.relative_error());
        println!(
            "Runs: {} ({} hits) in {:.3}s",
            estimate.trials,
            estimate.hits,
            estimate.elapsed.as_secs_f64()
        );
        println!("Convergence: {:?}", estimate.convergence);
    }
}
