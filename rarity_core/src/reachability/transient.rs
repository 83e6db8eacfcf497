use crate::model::State;

/// Poisson tail mass left uncovered when the computation stops.
pub const UNIFORMIZATION_BOUND: f64 = 1e-10;

/// Probability that a sequence of exponential races completes within `time_bound`.
///
/// `visits[s]` is the number of races run from state `s`,
/// each race lasting an exponentially distributed time with rate `exit_rate(s)`.
/// The races are run in order of state index, then the probability of all of them completing
/// is computed by uniformization with the largest exit rate among visited states:
/// the number of ticks of a Poisson clock by `time_bound` is Poisson distributed,
/// and each tick completes the current race with probability `exit_rate(s) / max_rate`.
///
/// Rounding is controlled by fused multiply-adds throughout,
/// as the recurrence subtracts probabilities of comparable magnitude.
///
/// ```
/// # use rarity_core::path_probability;
/// // A single race with rate 2 completes within time 0.5 with probability 1 - e^-1.
/// let prob = path_probability(&[0, 1], |_| 2.0, 0.5);
/// assert!((prob - (1.0 - (-1.0f64).exp())).abs() < 1e-9);
/// ```
pub fn path_probability(visits: &[u32], exit_rate: impl Fn(State) -> f64, time_bound: f64) -> f64 {
    if time_bound.is_infinite() {
        return 1.0;
    }
    let mut max_rate = f64::NEG_INFINITY;
    let mut races = 0;
    for (state, &count) in visits.iter().enumerate() {
        if count > 0 {
            max_rate = max_rate.max(exit_rate(state));
            races += count as usize;
        }
    }
    if races == 0 {
        return 1.0;
    }
    let intensity = max_rate * time_bound;
    if !(intensity > 0.0) {
        return 0.0;
    } else if intensity.is_infinite() {
        return 1.0;
    }

    // Per-tick completion probability of each race, in order;
    // the trailing zero makes the last slot absorbing.
    let mut ratios: Vec<f64> = Vec::with_capacity(races + 1);
    for (state, &count) in visits.iter().enumerate() {
        if count > 0 {
            let ratio = exit_rate(state) / max_rate;
            ratios.extend(std::iter::repeat_n(ratio, count as usize));
        }
    }
    ratios.push(0.0);
    // `probs[i]` is the probability that exactly `i` races have completed after the ticks so far.
    let mut probs = vec![0.0f64; races + 1];
    probs[0] = 1.0;

    let ln_intensity = intensity.ln();
    // Poisson weights are tracked in log space so that large intensities do not underflow.
    let mut ln_weight = -intensity;
    let mut weight = ln_weight.exp();
    let mut undecided = 1.0;
    let mut reach = 0.0f64;
    let mut ticks = 1u64;
    loop {
        undecided -= weight;
        ln_weight += ln_intensity - (ticks as f64).ln();
        weight = ln_weight.exp();
        ticks += 1;

        let mut carry = 0.0f64;
        let mut carry_ratio = 0.0;
        for (prob, &ratio) in probs.iter_mut().zip(&ratios) {
            let prev = *prob;
            // prob * (1 - ratio), plus what completes the previous race
            *prob = -prob.mul_add(ratio, -*prob);
            *prob = carry.mul_add(carry_ratio, *prob);
            carry = prev;
            carry_ratio = ratio;
        }
        reach = probs[races].mul_add(weight, reach);

        let past_mode = ticks as f64 > intensity;
        if undecided <= UNIFORMIZATION_BOUND || (past_mode && weight == 0.0) {
            break;
        }
    }
    reach.clamp(0.0, 1.0)
}
