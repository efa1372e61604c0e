use std::f64::consts::PI;

use common::config::minimizer::{BETA_PRIOR_ALPHA, BETA_PRIOR_BETA};
use serde::Serialize;

// below this ln(n!) is summed exactly, above it the Stirling series is accurate to f64 precision
const STIRLING_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BetaEstimate {
    pub alpha: f64,
    pub beta: f64,
    pub p: f64,
}

/// Success rate estimate for `m` successes in `n` trials with uniform priors.
pub fn beta_estimate(m: usize, n: usize) -> BetaEstimate {
    beta_estimate_with_prior(m, n, BETA_PRIOR_ALPHA, BETA_PRIOR_BETA)
}

pub fn beta_estimate_with_prior(m: usize, n: usize, a_prior: f64, b_prior: f64) -> BetaEstimate {
    debug_assert!(m <= n);

    let alpha = m as f64 + a_prior;
    let beta = n.saturating_sub(m) as f64 + b_prior;

    BetaEstimate {
        alpha,
        beta,
        p: alpha / (alpha + beta),
    }
}

/// ln(n!)
pub fn ln_factorial(n: usize) -> f64 {
    if n < STIRLING_THRESHOLD {
        return (2..=n).map(|i| (i as f64).ln()).sum();
    }

    let x = n as f64;
    let x2 = x * x;
    x * x.ln() - x + 0.5 * (2. * PI * x).ln() + 1. / (12. * x) - 1. / (360. * x * x2)
        + 1. / (1260. * x * x2 * x2)
}

/// Average number of elements changed when each of `n` elements changes with probability `p`.
pub fn shot_size(n: usize, p: f64) -> usize {
    ((p * n as f64).floor() as usize).min(n)
}

/// Number of misses after which we are `confidence` sure that the true hit rate is below `p`.
pub fn misses_until_quit(confidence: f64, p: f64) -> usize {
    debug_assert!(confidence > 0. && confidence < 1.);

    if p <= 0. {
        // no chance at all
        return 0;
    }
    if p >= 1. {
        // a sure thing
        return 1;
    }

    ((1. - confidence).ln() / (1. - p).ln()).ceil() as usize
}

/// Probability that keeping each of `n` positions with `keep_chance` retains a specific
/// subset of `m` positions (with `s = floor(keep_chance * n)` kept positions).
pub fn hit_probability(n: usize, m: usize, keep_chance: f64) -> f64 {
    if n == 0 || m > n {
        return 0.;
    }
    if m == 0 {
        return 1.;
    }

    // you can't hit a target bigger than the shot you're taking
    let s = shot_size(n, keep_chance);
    if m > s {
        return 0.;
    }

    let ln_p = ln_factorial(s) + ln_factorial(n - m) - ln_factorial(n) - ln_factorial(s - m);
    ln_p.exp().min(1.)
}

/// Misses allowed at distance `n` with target size guess `m` before the guess is rejected.
pub fn miss_budget(n: usize, m: usize, keep_chance: f64, confidence: f64) -> usize {
    let p_hit = hit_probability(n, m, keep_chance);

    if p_hit == 0. {
        0
    } else if p_hit == 1. {
        1
    } else {
        misses_until_quit(confidence, p_hit)
    }
}
