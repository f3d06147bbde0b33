//! Convergence diagnostics: split rank-normalized R-hat, bulk and tail ESS, and the warnings
//! raised from them and from the sampler statistics.
//!
//! Every function here is total. Inputs too short or too degenerate to judge yield `NaN`,
//! which is treated as "not converged".
//!
//! # References
//! - Vehtari, A., Gelman, A., Simpson, D., Carpenter, B., & Bürkner, P.-C. (2021).
//!   Rank-normalization, folding, and localization: An improved R-hat for assessing convergence
//!   of MCMC. *Bayesian Analysis* 16(2), 667–718.
//! - Geyer, C. J. (1992). Practical Markov chain Monte Carlo. *Statistical Science* 7(4).

use crate::draws::PosteriorDraws;
use crate::regression::{ChainStats, ChainStatus, FailureReason};
use crate::summary::quantile_sorted;
use ndarray::{Array2, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Limits beyond which a fit is flagged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticThresholds {
    /// Largest acceptable R-hat.
    pub rhat: f64,
    /// Smallest acceptable bulk and tail ESS.
    pub min_ess: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            rhat: 1.01,
            min_ess: 400.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeparationKind {
    /// A threshold on the column splits the outcomes with no overlap.
    Complete,
    /// The outcomes only touch at the boundary, or every row with an indicator set shares one
    /// outcome.
    Quasi,
}

impl fmt::Display for SeparationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeparationKind::Complete => f.write_str("complete"),
            SeparationKind::Quasi => f.write_str("quasi-complete"),
        }
    }
}

/// A statistical problem with a fit. Never an error: the fit is still returned.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum ConvergenceWarning {
    #[error("R-hat of `{term}` is {rhat:.4} (threshold {threshold})")]
    HighRhat { term: String, rhat: f64, threshold: f64 },

    #[error("ESS of `{term}` is too low: bulk {ess_bulk:.0}, tail {ess_tail:.0} (minimum {threshold})")]
    LowEss {
        term: String,
        ess_bulk: f64,
        ess_tail: f64,
        threshold: f64,
    },

    #[error("chain {chain}: {count} of {draws} kept transitions diverged")]
    DivergentTransitions { chain: usize, count: usize, draws: usize },

    #[error("chain {chain}: {count} of {draws} kept transitions hit the maximum tree depth {max_treedepth}")]
    TreeDepthSaturated {
        chain: usize,
        count: usize,
        draws: usize,
        max_treedepth: usize,
    },

    #[error("chain {chain} failed: {reason}")]
    ChainFailed { chain: usize, reason: FailureReason },

    #[error("`{term}` separates the outcome ({kind} separation); its posterior is driven by the prior")]
    Separation { term: String, kind: SeparationKind },

    #[error("every observation has the same outcome")]
    ConstantOutcome,

    #[error("design matrix has rank {rank} with {columns} columns")]
    RankDeficient { rank: usize, columns: usize },
}

/// Convergence statistics of one coefficient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDiagnostics {
    pub term: String,
    pub rhat: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
}

/// Status and sampler statistics of one chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub chain: usize,
    pub status: ChainStatus,
    pub stats: ChainStats,
}

/// Everything known about the quality of a fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub parameters: Vec<ParameterDiagnostics>,
    pub chains: Vec<ChainReport>,
    pub warnings: Vec<ConvergenceWarning>,
}

impl DiagnosticsReport {
    /// Assess kept draws and per-chain reports.
    ///
    /// `preflight` carries warnings about the design raised before sampling; they lead the list.
    pub fn from_chains(
        draws: &PosteriorDraws,
        chains: Vec<ChainReport>,
        preflight: Vec<ConvergenceWarning>,
        thresholds: &DiagnosticThresholds,
        max_treedepth: usize,
    ) -> Self {
        let mut warnings = preflight;
        let kept = draws.draws_per_chain();

        for report in &chains {
            match &report.status {
                ChainStatus::Failed(reason) => warnings.push(ConvergenceWarning::ChainFailed {
                    chain: report.chain,
                    reason: reason.clone(),
                }),
                _ => {
                    if report.stats.divergences > 0 {
                        warnings.push(ConvergenceWarning::DivergentTransitions {
                            chain: report.chain,
                            count: report.stats.divergences,
                            draws: kept,
                        });
                    }
                    if report.stats.max_treedepth_hits > 0 {
                        warnings.push(ConvergenceWarning::TreeDepthSaturated {
                            chain: report.chain,
                            count: report.stats.max_treedepth_hits,
                            draws: kept,
                            max_treedepth,
                        });
                    }
                }
            }
        }

        let parameters: Vec<ParameterDiagnostics> = draws
            .terms()
            .iter()
            .enumerate()
            .map(|(j, term)| diagnose(term.clone(), draws.chains_for(j)))
            .collect();

        for p in &parameters {
            // NaN fails both comparisons, so it is flagged too
            if !(p.rhat <= thresholds.rhat) {
                warnings.push(ConvergenceWarning::HighRhat {
                    term: p.term.clone(),
                    rhat: p.rhat,
                    threshold: thresholds.rhat,
                });
            }
            if !(p.ess_bulk >= thresholds.min_ess && p.ess_tail >= thresholds.min_ess) {
                warnings.push(ConvergenceWarning::LowEss {
                    term: p.term.clone(),
                    ess_bulk: p.ess_bulk,
                    ess_tail: p.ess_tail,
                    threshold: thresholds.min_ess,
                });
            }
        }

        for warning in &warnings {
            warn!(%warning, "convergence warning");
        }

        Self {
            parameters,
            chains,
            warnings,
        }
    }

    /// No warning was raised.
    pub fn is_converged(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn parameter(&self, term: &str) -> Option<&ParameterDiagnostics> {
        self.parameters.iter().find(|p| p.term == term)
    }
}

/// R-hat, bulk ESS and tail ESS of one coefficient, from its `[chains, draws]` matrix.
pub fn diagnose(term: impl Into<String>, chains: ArrayView2<f64>) -> ParameterDiagnostics {
    ParameterDiagnostics {
        term: term.into(),
        rhat: rank_normalized_rhat(chains),
        ess_bulk: ess_bulk(chains),
        ess_tail: ess_tail(chains),
    }
}

/// Split every chain into two halves. With an odd length the middle draw is dropped.
fn split_chains(chains: ArrayView2<f64>) -> Array2<f64> {
    let (m, n) = chains.dim();
    let half = n / 2;
    let mut split = Array2::<f64>::zeros((2 * m, half));
    for (c, chain) in chains.axis_iter(Axis(0)).enumerate() {
        split.row_mut(2 * c).assign(&chain.slice(s![..half]));
        split.row_mut(2 * c + 1).assign(&chain.slice(s![n - half..]));
    }
    split
}

fn sorted_values(chains: ArrayView2<f64>) -> Vec<f64> {
    let mut all: Vec<f64> = chains.iter().copied().collect();
    all.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    all
}

/// Classic potential scale reduction of already-split chains.
fn rhat_of(split: ArrayView2<f64>) -> f64 {
    let (m, n) = split.dim();
    if m < 2 || n < 2 {
        return f64::NAN;
    }
    let (m_f, n_f) = (m as f64, n as f64);
    let means: Vec<f64> = split.rows().into_iter().map(|c| c.sum() / n_f).collect();
    let grand = means.iter().sum::<f64>() / m_f;
    let between = n_f / (m_f - 1.0) * means.iter().map(|&cm| (cm - grand).powi(2)).sum::<f64>();
    let within = split
        .rows()
        .into_iter()
        .zip(&means)
        .map(|(c, &cm)| c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n_f - 1.0))
        .sum::<f64>()
        / m_f;
    if !(within > 0.0) {
        return f64::NAN;
    }
    let var_plus = (n_f - 1.0) / n_f * within + between / n_f;
    (var_plus / within).sqrt()
}

/// Replace every draw by the normal score of its pooled rank, `Φ⁻¹((r - 3/8) / (S + 1/4))`,
/// averaging the ranks of ties.
fn rank_normalize(chains: ArrayView2<f64>) -> Array2<f64> {
    let (m, n) = chains.dim();
    let total = m * n;
    let mut order: Vec<(f64, usize)> = chains.iter().copied().zip(0..).collect();
    order.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let normal = Normal::standard();
    let mut scores = vec![0.0; total];
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j < total && order[j].0 == order[i].0 {
            j += 1;
        }
        let rank = (i + j + 1) as f64 / 2.0;
        let z = normal.inverse_cdf((rank - 0.375) / (total as f64 + 0.25));
        for &(_, flat) in &order[i..j] {
            scores[flat] = z;
        }
        i = j;
    }
    Array2::from_shape_vec((m, n), scores).unwrap_or_else(|_| Array2::from_elem((m, n), f64::NAN))
}

/// Split R-hat on the raw draws.
pub fn split_rhat(chains: ArrayView2<f64>) -> f64 {
    rhat_of(split_chains(chains).view())
}

/// Maximum of the bulk (rank-normalized) and tail (rank-normalized folded) split R-hat.
pub fn rank_normalized_rhat(chains: ArrayView2<f64>) -> f64 {
    if chains.is_empty() {
        return f64::NAN;
    }
    let split = split_chains(chains);
    let bulk = rhat_of(rank_normalize(split.view()).view());

    let median = quantile_sorted(&sorted_values(chains), 0.5);
    let folded = split.mapv(|x| (x - median).abs());
    let tail = rhat_of(rank_normalize(folded.view()).view());

    if bulk.is_nan() || tail.is_nan() {
        f64::NAN
    } else {
        bulk.max(tail)
    }
}

/// Bulk effective sample size: ESS of the rank-normalized split chains.
pub fn ess_bulk(chains: ArrayView2<f64>) -> f64 {
    let split = split_chains(chains);
    ess_of(rank_normalize(split.view()).view())
}

/// Tail effective sample size: the smaller ESS of the indicators `x ≤ q05` and `x ≤ q95`.
pub fn ess_tail(chains: ArrayView2<f64>) -> f64 {
    if chains.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted_values(chains);
    let split = split_chains(chains);
    let ess_at = |p: f64| {
        let q = quantile_sorted(&sorted, p);
        let indicator = split.mapv(|x| if x <= q { 1.0 } else { 0.0 });
        ess_of(indicator.view())
    };
    let (lower, upper) = (ess_at(0.05), ess_at(0.95));
    if lower.is_nan() || upper.is_nan() {
        f64::NAN
    } else {
        lower.min(upper)
    }
}

/// Lag-`lag` autocovariance of one chain around `mean`, divided by the chain length.
fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    chain[..n - lag]
        .iter()
        .zip(&chain[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

/// Multi-chain ESS of already-split chains, with Geyer's initial monotone sequence.
///
/// Autocovariances are computed lag by lag and only as far as the positive pair sums reach.
fn ess_of(split: ArrayView2<f64>) -> f64 {
    let (m, n) = split.dim();
    if m == 0 || n < 4 {
        return f64::NAN;
    }
    let (m_f, n_f) = (m as f64, n as f64);
    let chains: Vec<Vec<f64>> = split.rows().into_iter().map(|c| c.to_vec()).collect();
    let means: Vec<f64> = chains.iter().map(|c| c.iter().sum::<f64>() / n_f).collect();

    let mean_acov = |lag: usize| {
        chains
            .iter()
            .zip(&means)
            .map(|(c, &mu)| autocovariance(c, mu, lag))
            .sum::<f64>()
            / m_f
    };

    let acov0 = mean_acov(0);
    let within = acov0 * n_f / (n_f - 1.0);
    let grand = means.iter().sum::<f64>() / m_f;
    let between_over_n = if m > 1 {
        means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() / (m_f - 1.0)
    } else {
        0.0
    };
    let var_plus = within * (n_f - 1.0) / n_f + between_over_n;
    if !(var_plus > 0.0 && var_plus.is_finite()) {
        return f64::NAN;
    }
    let rho = |lag: usize| 1.0 - (within - mean_acov(lag)) / var_plus;

    let mut pair_sum_total = 0.0;
    let mut previous = f64::INFINITY;
    let mut t = 0;
    while 2 * t + 1 < n {
        let even = if t == 0 { 1.0 } else { rho(2 * t) };
        let pair = even + rho(2 * t + 1);
        if pair < 0.0 {
            break;
        }
        let pair = pair.min(previous);
        pair_sum_total += pair;
        previous = pair;
        t += 1;
    }

    let total = m_f * n_f;
    let tau = (-1.0 + 2.0 * pair_sum_total).max(1.0 / total.log10());
    (total / tau).min(total * total.log10())
}
