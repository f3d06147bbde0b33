//! Bayesian logistic regression with the No-U-Turn sampler.
//!
//! # Model
//! - Likelihood: \( y_i \mid \beta \sim \mathrm{Bernoulli}(\sigma(x_i^\top \beta)) \), where \( \sigma \) is the logistic function
//! - Prior: \( \beta_j \sim \mathcal{N}(m_j, s_j^2) \), independently per coefficient
//!
//! The log posterior, up to a constant, is
//! \[
//!   \sum_i \left[ y_i \eta_i - \log(1 + e^{\eta_i}) \right] - \sum_j \frac{(\beta_j - m_j)^2}{2 s_j^2},
//!   \quad \eta = X\beta
//! \]
//! with gradient \( X^\top (y - \sigma(\eta)) - (\beta - m) / s^2 \).
//!
//! # References
//! - Hoffman, M. D., & Gelman, A. (2014). The No-U-Turn Sampler. *JMLR* 15, 1593–1623.
//! - Gelman, A., Jakulin, A., Pittau, M. G., & Su, Y.-S. (2008). A weakly informative default
//!   prior distribution for logistic and other regression models. *Ann. Appl. Stat.* 2(4).

use super::chain::{ChainFailure, ChainOutput, ChainStatus, run_chain};
use super::preflight::check_design;
use crate::config::SamplerConfig;
use crate::design::{DesignMatrix, DesignSchema};
use crate::diagnostics::{ChainReport, ConvergenceWarning, DiagnosticThresholds, DiagnosticsReport};
use crate::draws::PosteriorDraws;
use crate::error::{Error, Result};
use crate::nuts::LogDensity;
use crate::predict::{PredictionSummary, Profile};
use crate::prior::ResolvedPriors;
use crate::summary::PosteriorSummary;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// `log(1 + e^x)` without overflow for large `x` or loss of precision for very negative `x`.
#[inline]
pub(crate) fn log1pexp(x: f64) -> f64 {
    if x > 35.0 {
        x
    } else if x > -10.0 {
        x.exp().ln_1p()
    } else {
        x.exp()
    }
}

/// Logistic function, evaluated on the side that cannot overflow.
#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log posterior of the coefficients, borrowed from a design and its resolved priors.
pub(crate) struct LogitPosterior<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    prior_mean: &'a [f64],
    prior_prec: Vec<f64>,
}

impl<'a> LogitPosterior<'a> {
    pub(crate) fn new(design: &'a DesignMatrix, priors: &'a ResolvedPriors) -> Self {
        Self {
            x: design.x().view(),
            y: design.y().view(),
            prior_mean: &priors.means,
            prior_prec: priors.sds.iter().map(|s| 1.0 / (s * s)).collect(),
        }
    }
}

impl LogDensity for LogitPosterior<'_> {
    fn dim(&self) -> usize {
        self.x.ncols()
    }

    fn log_density_and_gradient(&self, q: &[f64], grad: &mut [f64]) -> f64 {
        let beta = ArrayView1::from(q);
        let eta = self.x.dot(&beta);

        let mut logp = 0.0;
        let resid: Array1<f64> = eta
            .iter()
            .zip(&self.y)
            .map(|(&eta, &y)| {
                logp += y * eta - log1pexp(eta);
                y - sigmoid(eta)
            })
            .collect();
        let score = self.x.t().dot(&resid);

        for j in 0..q.len() {
            let delta = q[j] - self.prior_mean[j];
            logp -= 0.5 * delta * delta * self.prior_prec[j];
            grad[j] = score[j] - delta * self.prior_prec[j];
        }
        logp
    }
}

/// Multi-chain NUTS sampler for Bayesian logistic regression.
///
/// The design and priors are borrowed for the duration of the run and shared by every chain.
///
/// # Example
/// ```rust
/// use choice_logit::{
///     DesignMatrix, DiagnosticThresholds, ModelSpec, ObservationTable, PriorSpec, SamplerConfig,
///     Term, regression::NutsLogit,
/// };
///
/// let table = ObservationTable::new()
///     .with_categorical("decision", ["kick", "go", "kick", "go", "kick", "kick"])?
///     .with_continuous("ydstogo", [9.0, 1.0, 6.0, 2.0, 3.0, 12.0])?;
/// let spec = ModelSpec::new("decision", ["kick", "go"]).term(Term::continuous("ydstogo"));
/// let design = DesignMatrix::build(&table, &spec)?;
/// let priors = PriorSpec::default().resolve(&design)?;
///
/// let config = SamplerConfig { chains: 2, iterations: 400, ..SamplerConfig::default() };
/// let fit = NutsLogit::new(&design, priors, config)?
///     .with_thresholds(DiagnosticThresholds { rhat: 1.1, min_ess: 50.0 })
///     .run()?;
/// assert_eq!(fit.draws().len(), 2 * 200);
/// println!("{}", fit.summary(0.95)?);
/// # Ok::<(), choice_logit::Error>(())
/// ```
pub struct NutsLogit<'a> {
    design: &'a DesignMatrix,
    priors: ResolvedPriors,
    config: SamplerConfig,
    thresholds: DiagnosticThresholds,
}

impl<'a> NutsLogit<'a> {
    /// Create a sampler for `design` under `priors`.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] if `config` does not validate.
    /// - [`Error::PriorShape`] if `priors` was not resolved against a design of this width.
    pub fn new(design: &'a DesignMatrix, priors: ResolvedPriors, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        if priors.len() != design.ncols() {
            return Err(Error::PriorShape {
                expected: design.ncols().saturating_sub(1),
                got: priors.len().saturating_sub(1),
            });
        }
        Ok(Self {
            design,
            priors,
            config,
            thresholds: DiagnosticThresholds::default(),
        })
    }

    /// Replace the R-hat / ESS thresholds used to raise warnings.
    pub fn with_thresholds(mut self, thresholds: DiagnosticThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run every chain and assess the pooled draws.
    ///
    /// Failed chains are dropped from the draws and reported in the diagnostics. The fit only
    /// fails outright when no chain completes.
    ///
    /// # Errors
    /// [`Error::AllChainsFailed`] when every chain failed.
    pub fn run(self) -> Result<LogisticFit> {
        let started = Instant::now();
        let preflight = check_design(self.design);
        for warning in &preflight {
            debug!(%warning, "design check");
        }

        let target = LogitPosterior::new(self.design, &self.priors);
        let chain_ids: Vec<usize> = (0..self.config.chains).collect();

        #[cfg(feature = "rayon")]
        let outputs: Vec<ChainOutput> = chain_ids
            .par_iter()
            .map(|&chain| run_chain(&target, chain, &self.config))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let outputs: Vec<ChainOutput> = chain_ids
            .iter()
            .map(|&chain| run_chain(&target, chain, &self.config))
            .collect();

        let fit = self.assemble(preflight, outputs)?;
        info!(
            chains = fit.diagnostics.chains.len(),
            kept_chains = fit.draws.n_chains(),
            draws = fit.draws.len(),
            warnings = fit.diagnostics.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "logistic fit finished"
        );
        Ok(fit)
    }

    /// Pool the draws of the completed chains and attach their diagnostics.
    fn assemble(self, preflight: Vec<ConvergenceWarning>, outputs: Vec<ChainOutput>) -> Result<LogisticFit> {
        let mut kept = Vec::new();
        let mut failures = Vec::new();
        let mut reports = Vec::with_capacity(outputs.len());
        for output in outputs {
            if let ChainStatus::Failed(reason) = &output.status {
                failures.push(ChainFailure {
                    chain: output.chain,
                    reason: reason.clone(),
                });
            }
            if let Some(draws) = output.draws {
                kept.push((output.chain, draws));
            }
            reports.push(ChainReport {
                chain: output.chain,
                status: output.status,
                stats: output.stats,
            });
        }
        if kept.is_empty() {
            return Err(Error::AllChainsFailed(failures));
        }

        let schema = self.design.schema().clone();
        let draws = PosteriorDraws::from_chains(schema.names(), kept)?;
        let diagnostics = DiagnosticsReport::from_chains(
            &draws,
            reports,
            preflight,
            &self.thresholds,
            self.config.max_treedepth,
        );
        Ok(LogisticFit {
            draws,
            diagnostics,
            priors: self.priors,
            schema,
        })
    }
}

/// Draws, diagnostics and the inputs needed to interpret them.
///
/// Diagnostics are always attached; use [`is_converged`](Self::is_converged) or
/// [`require_converged`](Self::require_converged) to gate on them.
#[derive(Debug, Clone, Serialize)]
pub struct LogisticFit {
    draws: PosteriorDraws,
    diagnostics: DiagnosticsReport,
    priors: ResolvedPriors,
    schema: DesignSchema,
}

impl LogisticFit {
    pub fn draws(&self) -> &PosteriorDraws {
        &self.draws
    }

    pub fn diagnostics(&self) -> &DiagnosticsReport {
        &self.diagnostics
    }

    /// Priors actually used, after autoscaling.
    pub fn priors(&self) -> &ResolvedPriors {
        &self.priors
    }

    pub fn schema(&self) -> &DesignSchema {
        &self.schema
    }

    pub fn warnings(&self) -> &[ConvergenceWarning] {
        &self.diagnostics.warnings
    }

    /// No convergence warning was raised.
    pub fn is_converged(&self) -> bool {
        self.diagnostics.is_converged()
    }

    /// Hand the fit back only if it raised no warning.
    ///
    /// # Errors
    /// [`Error::NotConverged`] carrying every warning.
    pub fn require_converged(self) -> Result<Self> {
        if self.is_converged() {
            Ok(self)
        } else {
            Err(Error::NotConverged(self.diagnostics.warnings))
        }
    }

    /// Posterior mean, sd and credible interval of every coefficient.
    pub fn summary(&self, confidence_level: f64) -> Result<PosteriorSummary> {
        PosteriorSummary::from_draws(&self.draws, confidence_level)
    }

    /// Posterior distribution of the probability of the second outcome level for `profile`.
    pub fn predict(&self, profile: &Profile, confidence_level: f64) -> Result<PredictionSummary> {
        let probabilities = self.draws.choice_probability(&self.schema, profile)?;
        PredictionSummary::from_probabilities(probabilities.view(), confidence_level)
    }
}
