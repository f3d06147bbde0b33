//! A single NUTS chain: initialization, warmup, sampling.

use crate::adapt::WindowedAdaptation;
use crate::config::SamplerConfig;
use crate::nuts::{LogDensity, PhasePoint, find_reasonable_step_size, transition};
use crate::rng::ChainRng;
use ndarray::Array2;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts at finding a finite starting point before a chain gives up.
const MAX_INIT_ATTEMPTS: usize = 100;

/// Lifecycle of a chain.
///
/// `Initializing → WarmingUp → Sampling → Completed`, or `Failed` from any running phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChainStatus {
    Initializing,
    WarmingUp,
    Sampling,
    Completed,
    Failed(FailureReason),
}

/// Why a chain was dropped from the kept sample.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum FailureReason {
    #[error("no starting point with a finite log density was found")]
    NonFiniteInitialization,

    #[error("timed out after {elapsed_secs:.1}s at iteration {iteration}")]
    Timeout { iteration: usize, elapsed_secs: f64 },

    #[error("{divergent} of {draws} kept transitions diverged")]
    ExcessiveDivergence { divergent: usize, draws: usize },
}

/// A failed chain and the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("chain {chain} failed: {reason}")]
pub struct ChainFailure {
    pub chain: usize,
    pub reason: FailureReason,
}

/// Sampler statistics of one chain, over the kept (post-warmup) iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainStats {
    pub step_size: f64,
    pub mean_accept_prob: f64,
    pub divergences: usize,
    /// Transitions that stopped because they hit the maximum tree depth.
    pub max_treedepth_hits: usize,
    pub mean_tree_depth: f64,
    pub n_leapfrog: usize,
    pub inv_mass: Vec<f64>,
}

pub(crate) struct ChainOutput {
    pub(crate) chain: usize,
    pub(crate) status: ChainStatus,
    pub(crate) draws: Option<Array2<f64>>,
    pub(crate) stats: ChainStats,
}

impl ChainOutput {
    fn failed(chain: usize, reason: FailureReason, stats: ChainStats) -> Self {
        warn!(chain, %reason, "chain failed");
        Self {
            chain,
            status: ChainStatus::Failed(reason),
            draws: None,
            stats,
        }
    }
}

/// Run chain `chain` to completion (or failure).
pub(crate) fn run_chain<T: LogDensity + ?Sized>(
    target: &T,
    chain: usize,
    config: &SamplerConfig,
) -> ChainOutput {
    let started = Instant::now();
    let timeout = config.chain_timeout();
    let dim = target.dim();
    let warmup = config.warmup();
    let kept = config.kept_per_chain();
    let mut rng = ChainRng::new(config.seed, chain);
    let mut stats = ChainStats::default();

    let mut status = ChainStatus::Initializing;
    debug!(chain, ?status, dim, "chain starting");

    let Some(mut point) = (0..MAX_INIT_ATTEMPTS)
        .map(|_| PhasePoint::new(target, rng.dispersed_init(dim)))
        .find(PhasePoint::is_finite)
    else {
        return ChainOutput::failed(chain, FailureReason::NonFiniteInitialization, stats);
    };

    let step_size = find_reasonable_step_size(target, &point, &vec![1.0; dim], &mut rng);
    let mut adaptation = WindowedAdaptation::new(dim, warmup, config.target_accept, step_size);

    status = ChainStatus::WarmingUp;
    debug!(chain, ?status, step_size, warmup, "chain warming up");

    let mut draws = Array2::<f64>::zeros((kept, dim));
    let mut eps = step_size;
    let mut inv_mass = adaptation.inv_mass().to_vec();
    let (mut sum_accept, mut sum_depth) = (0.0, 0usize);

    for iteration in 0..config.iterations {
        if let Some(limit) = timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                let reason = FailureReason::Timeout {
                    iteration,
                    elapsed_secs: elapsed.as_secs_f64(),
                };
                return ChainOutput::failed(chain, reason, stats);
            }
        }

        if iteration == warmup {
            eps = if warmup > 0 { adaptation.final_step_size() } else { step_size };
            if !(eps.is_finite() && eps > 0.0) {
                eps = step_size;
            }
            status = ChainStatus::Sampling;
            debug!(chain, ?status, step_size = eps, ?inv_mass, "warmup finished");
        } else if iteration < warmup {
            eps = adaptation.step_size();
        }

        let t = transition(target, &point, eps, &inv_mass, config.max_treedepth, &mut rng);
        // leaves that overflow end the trajectory as divergent, so `point` stays finite
        point = t.point;

        if iteration < warmup {
            if adaptation.update(iteration, &point.q, t.accept_prob) {
                inv_mass = adaptation.inv_mass().to_vec();
                let fresh = find_reasonable_step_size(target, &point, &inv_mass, &mut rng);
                adaptation.restart(fresh);
            }
            continue;
        }

        let row = iteration - warmup;
        draws.row_mut(row).iter_mut().zip(&point.q).for_each(|(d, q)| *d = *q);
        sum_accept += t.accept_prob;
        sum_depth += t.depth;
        stats.n_leapfrog += t.n_leapfrog;
        stats.divergences += usize::from(t.divergent);
        stats.max_treedepth_hits += usize::from(!t.divergent && t.depth >= config.max_treedepth);
    }

    stats.step_size = eps;
    stats.mean_accept_prob = sum_accept / kept.max(1) as f64;
    stats.mean_tree_depth = sum_depth as f64 / kept.max(1) as f64;
    stats.inv_mass = inv_mass;

    if stats.divergences as f64 > config.max_divergence_fraction * kept as f64 {
        let reason = FailureReason::ExcessiveDivergence {
            divergent: stats.divergences,
            draws: kept,
        };
        return ChainOutput::failed(chain, reason, stats);
    }

    status = ChainStatus::Completed;
    debug!(
        chain,
        ?status,
        accept = stats.mean_accept_prob,
        divergences = stats.divergences,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chain completed"
    );
    ChainOutput {
        chain,
        status,
        draws: Some(draws),
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StdNormal(usize);

    impl LogDensity for StdNormal {
        fn dim(&self) -> usize {
            self.0
        }

        fn log_density_and_gradient(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            grad.iter_mut().zip(q).for_each(|(g, q)| *g = -q);
            -0.5 * q.iter().map(|q| q * q).sum::<f64>()
        }
    }

    /// Log density that is nowhere finite.
    struct Nowhere;

    impl LogDensity for Nowhere {
        fn dim(&self) -> usize {
            1
        }

        fn log_density_and_gradient(&self, _q: &[f64], grad: &mut [f64]) -> f64 {
            grad[0] = f64::NAN;
            f64::NEG_INFINITY
        }
    }

    /// Standard normal cut off outside `[-2.2, 2.2]^2`; trajectories that leave the box diverge.
    struct Cliff;

    impl LogDensity for Cliff {
        fn dim(&self) -> usize {
            2
        }

        fn log_density_and_gradient(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            grad.iter_mut().zip(q).for_each(|(g, q)| *g = -q);
            if q.iter().any(|q| q.abs() > 2.2) {
                return f64::NEG_INFINITY;
            }
            -0.5 * q.iter().map(|q| q * q).sum::<f64>()
        }
    }

    fn config(iterations: usize) -> SamplerConfig {
        SamplerConfig {
            chains: 1,
            iterations,
            seed: 9,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn completed_chain_keeps_post_warmup_draws() {
        let out = run_chain(&StdNormal(3), 0, &config(400));
        assert_eq!(out.status, ChainStatus::Completed);
        let draws = out.draws.unwrap();
        assert_eq!(draws.dim(), (200, 3));
        assert!(out.stats.step_size > 0.0);
        assert!(out.stats.mean_accept_prob > 0.5);
    }

    #[test]
    fn infinite_density_fails_at_initialization() {
        let out = run_chain(&Nowhere, 0, &config(10));
        assert_eq!(
            out.status,
            ChainStatus::Failed(FailureReason::NonFiniteInitialization)
        );
        assert!(out.draws.is_none());
    }

    #[test]
    fn zero_timeout_fails_instead_of_truncating() {
        let config = SamplerConfig {
            chain_timeout_secs: Some(1e-9),
            ..config(100_000)
        };
        let out = run_chain(&StdNormal(2), 0, &config);
        assert!(matches!(
            out.status,
            ChainStatus::Failed(FailureReason::Timeout { .. })
        ));
        assert!(out.draws.is_none());
    }

    #[test]
    fn divergence_limit_fails_the_chain() {
        let config = SamplerConfig {
            max_divergence_fraction: 0.0,
            ..config(400)
        };
        let out = run_chain(&Cliff, 0, &config);
        assert!(out.stats.divergences > 0);
        assert_eq!(
            out.status,
            ChainStatus::Failed(FailureReason::ExcessiveDivergence {
                divergent: out.stats.divergences,
                draws: 200,
            })
        );
        assert!(out.draws.is_none());
    }

    #[test]
    fn same_seed_same_draws() {
        let a = run_chain(&StdNormal(2), 1, &config(200)).draws.unwrap();
        let b = run_chain(&StdNormal(2), 1, &config(200)).draws.unwrap();
        let c = run_chain(&StdNormal(2), 2, &config(200)).draws.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
