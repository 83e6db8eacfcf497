use rarity_core::*;
use std::sync::Arc;

const CAPACITY: usize = 15;

// Birth-death chain from 0 (deadline) to CAPACITY (target), starting in 1,
// moving up at rate 1 and down at rate 2.
fn queue() -> Result<Arc<Ctmc>, ModelError> {
    let mut builder = CtmcBuilder::new();
    let mut pre = builder.initial_state();
    builder.set_deadline(pre)?;
    for _ in 0..CAPACITY {
        let post = builder.new_state();
        builder.add_transition(pre, post, 1.0)?;
        builder.add_transition(post, pre, 2.0)?;
        pre = post;
    }
    builder.set_target(pre)?;
    builder.set_initial(1)?;
    Ok(Arc::new(builder.build()))
}

// Probability of overflowing before emptying (gambler's ruin).
fn overflow() -> f64 {
    1.0 / (2f64.powi(CAPACITY as i32) - 1.0)
}

fn weights() -> Vec<f64> {
    (0..=CAPACITY).map(|s| 2f64.powi(s as i32)).collect()
}

fn config(threads: usize) -> SimulatorConfig {
    SimulatorConfig {
        threads: Some(threads),
        ..Default::default()
    }
}

#[test]
fn forced_rare_event() -> anyhow::Result<()> {
    let property = Property::new(PropertyKind::Reachability, f64::INFINITY)?;
    let scheme = Forced::new(queue()?, weights())?;
    let tracer = ReachabilityTracer::new(property, scheme, 1)?;
    let mut simulator = Simulator::new(tracer, config(4))?;
    let estimate = simulator.run_for_relative_error(0.01, 0.05, None)?;
    assert_eq!(estimate.convergence, Convergence::Converged);
    assert!(estimate.relative_error() <= 0.01);
    assert!(estimate.hits <= estimate.trials);
    assert!((estimate.mean - overflow()).abs() / overflow() < 0.03);
    Ok(())
}

#[test]
fn unforced_misses_rare_event() -> anyhow::Result<()> {
    let property = Property::new(PropertyKind::Reachability, f64::INFINITY)?;
    let tracer = ReachabilityTracer::new(property, Unforced::new(queue()?), 2)?;
    let mut simulator = Simulator::new(tracer, config(2))?;
    let estimate = simulator.run(2_000, 0.05)?;
    // Hits are too rare to be observed, yet the exact interval covers the probability.
    assert!(simulator.tracer().is_binomial());
    assert!(estimate.hits <= 1);
    assert!(estimate.lower <= overflow() && overflow() < estimate.upper);
    Ok(())
}

#[test]
fn fold_matches_single_stream() -> anyhow::Result<()> {
    let property = Property::new(PropertyKind::Reachability, 20.0)?;
    let scheme = Forced::new(queue()?, weights())?;
    let mut parent = ReachabilityTracer::new(property, scheme, 3)?;
    *parent.accumulator_mut() = Statistics::centered(Centering::new(overflow()));
    let mut workers = vec![parent.replicate(), parent.replicate()];
    for (seed, worker) in workers.iter_mut().enumerate() {
        worker.reseed(seed as u64);
        for _ in 0..500 {
            worker.generate();
        }
    }
    let mut single = parent.replicate();
    for seed in 0..2 {
        single.reseed(seed);
        for _ in 0..500 {
            single.generate();
        }
    }
    parent.fold(&workers);
    let (merged, single) = (parent.accumulator(), single.accumulator());
    assert_eq!(merged.trials(), 1_000);
    assert_eq!(merged.trials(), single.trials());
    assert_eq!(merged.hits(), single.hits());
    assert!((merged.sum() - single.sum()).abs() <= 1e-12 * single.sum().abs());
    assert!((merged.sum_squares() - single.sum_squares()).abs() <= 1e-12 * single.sum_squares());
    assert!((merged.variance() - single.variance()).abs() <= 1e-9 * single.variance());
    Ok(())
}

#[test]
fn exact_paths_agree_with_sampled_time() -> anyhow::Result<()> {
    let property = Property::new(PropertyKind::Reachability, 12.0)?;
    let scheme = Forced::new(queue()?, weights())?;
    let sampled = ReachabilityTracer::new(property.clone(), scheme.clone(), 4)?;
    let exact = ReachabilityTracer::new(property, scheme, 4)?.with_exact_paths(true);
    assert!(!exact.is_binomial());
    let sampled = Simulator::new(sampled, config(2))?.run(50_000, 0.01)?;
    let exact = Simulator::new(exact, config(2))?.run(50_000, 0.01)?;
    assert!(sampled.mean < overflow());
    assert!(exact.lower <= sampled.upper && sampled.lower <= exact.upper);
    assert!((exact.mean - sampled.mean).abs() / sampled.mean < 0.1);
    // Exact path probabilities only reduce the variance.
    assert!(exact.variance <= sampled.variance);
    Ok(())
}

#[test]
fn time_forcing() -> anyhow::Result<()> {
    let property = Property::new(PropertyKind::Reachability, 12.0)?;
    let forced = Forced::new(queue()?, weights())?;
    let reference = ReachabilityTracer::new(property.clone(), forced.clone(), 5)?.with_exact_paths(true);
    let timed = ReachabilityTracer::new(property, forced.with_time_forcing(true), 5)?;
    let reference = Simulator::new(reference, config(2))?.run(50_000, 0.01)?;
    let timed = Simulator::new(timed, config(2))?.run(50_000, 0.01)?;
    assert!((timed.mean - reference.mean).abs() / reference.mean < 0.1);
    Ok(())
}
