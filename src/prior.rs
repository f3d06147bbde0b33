//! Normal priors on regression coefficients.
//!
//! A [`PriorSpec`] holds a prior for the intercept plus either one prior broadcast to every other
//! coefficient or an explicit list with one prior per non-intercept coefficient. It is resolved
//! against a concrete [`DesignMatrix`] into [`ResolvedPriors`], one `(mean, sd)` pair per column,
//! which is what the sampler consumes.
//!
//! # Autoscaling
//! With `autoscale` set, the prior standard deviation of coefficient `j` becomes
//! `scale / sd(x_j)`, where `sd(x_j)` is the population standard deviation of design column `j`.
//! A `Normal(0, 2.5)` prior on a covariate measured in yards therefore stays as weak as the same
//! prior on a covariate measured in miles. Constant columns (the intercept) are left unscaled.

use crate::design::{DesignMatrix, INTERCEPT};
use crate::error::{Error, Result};
use crate::summary::PosteriorSummary;
use serde::{Deserialize, Serialize};

/// `Normal(mean, scale)`, optionally autoscaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    pub mean: f64,
    pub scale: f64,
    #[serde(default)]
    pub autoscale: bool,
}

impl NormalPrior {
    pub const fn new(mean: f64, scale: f64) -> Self {
        Self {
            mean,
            scale,
            autoscale: false,
        }
    }

    pub const fn autoscaled(mean: f64, scale: f64) -> Self {
        Self {
            mean,
            scale,
            autoscale: true,
        }
    }

    /// `Normal(0, 2.5)` with autoscaling, the conventional weakly informative default.
    pub const fn weakly_informative() -> Self {
        Self::autoscaled(0.0, 2.5)
    }

    fn validate(&self, term: &str) -> Result<()> {
        if !self.mean.is_finite() {
            return Err(Error::InvalidPrior {
                term: term.to_string(),
                reason: format!("mean must be finite, got {}", self.mean),
            });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidPrior {
                term: term.to_string(),
                reason: format!("scale must be positive and finite, got {}", self.scale),
            });
        }
        Ok(())
    }
}

/// `Normal(0, 2.5)` without autoscaling; the default intercept prior.
impl Default for NormalPrior {
    fn default() -> Self {
        Self::new(0.0, 2.5)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoefficientPriors {
    /// One prior for every non-intercept coefficient.
    Broadcast(NormalPrior),
    /// One prior per non-intercept coefficient, in design column order.
    PerCoefficient(Vec<NormalPrior>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub intercept: NormalPrior,
    pub coefficients: CoefficientPriors,
}

impl Default for PriorSpec {
    fn default() -> Self {
        Self::broadcast(NormalPrior::default(), NormalPrior::weakly_informative())
    }
}

impl PriorSpec {
    pub fn broadcast(intercept: NormalPrior, default: NormalPrior) -> Self {
        Self {
            intercept,
            coefficients: CoefficientPriors::Broadcast(default),
        }
    }

    pub fn per_coefficient(intercept: NormalPrior, priors: Vec<NormalPrior>) -> Self {
        Self {
            intercept,
            coefficients: CoefficientPriors::PerCoefficient(priors),
        }
    }

    /// Informative priors centred on a previous fit's posterior.
    ///
    /// Each coefficient gets `Normal(estimate, std_error * inflation)` without autoscaling. An
    /// `inflation` above 1 deliberately weakens the carried-over information, e.g. when the
    /// earlier fit covers a different period.
    ///
    /// # Errors
    /// [`Error::InvalidPrior`] if `inflation` is not positive, the summary does not start with the
    /// intercept, or a row has a zero standard error.
    pub fn from_posterior(summary: &PosteriorSummary, inflation: f64) -> Result<Self> {
        if !(inflation.is_finite() && inflation > 0.0) {
            return Err(Error::InvalidPrior {
                term: INTERCEPT.to_string(),
                reason: format!("inflation must be positive and finite, got {inflation}"),
            });
        }
        let rows = summary.rows();
        let Some((first, rest)) = rows.split_first().filter(|(f, _)| f.term == INTERCEPT) else {
            return Err(Error::InvalidPrior {
                term: INTERCEPT.to_string(),
                reason: "posterior summary does not start with the intercept".into(),
            });
        };
        let to_prior = |row: &crate::summary::CoefficientSummary| {
            let prior = NormalPrior::new(row.estimate, row.std_error * inflation);
            prior.validate(&row.term).map(|_| prior)
        };
        let intercept = to_prior(first)?;
        let coefficients = rest.iter().map(to_prior).collect::<Result<Vec<_>>>()?;
        Ok(Self::per_coefficient(intercept, coefficients))
    }

    /// Resolve against `design`, applying autoscaling.
    ///
    /// # Errors
    /// - [`Error::PriorShape`] if an explicit list does not have exactly one entry per
    ///   non-intercept column.
    /// - [`Error::InvalidPrior`] for a non-finite mean or a non-positive scale.
    pub fn resolve(&self, design: &DesignMatrix) -> Result<ResolvedPriors> {
        let names = design.schema().names();
        let expected = names.len().saturating_sub(1);
        let priors: Vec<NormalPrior> = match &self.coefficients {
            CoefficientPriors::Broadcast(prior) => {
                std::iter::once(self.intercept).chain(std::iter::repeat_n(*prior, expected)).collect()
            }
            CoefficientPriors::PerCoefficient(list) => {
                if list.len() != expected {
                    return Err(Error::PriorShape {
                        expected,
                        got: list.len(),
                    });
                }
                std::iter::once(self.intercept).chain(list.iter().copied()).collect()
            }
        };

        let x = design.x();
        let mut means = Vec::with_capacity(names.len());
        let mut sds = Vec::with_capacity(names.len());
        for (j, (prior, name)) in priors.iter().zip(&names).enumerate() {
            prior.validate(name)?;
            let column_sd = if x.nrows() > 0 {
                x.column(j).std(0.0)
            } else {
                0.0
            };
            let sd = if prior.autoscale && column_sd > 0.0 {
                prior.scale / column_sd
            } else {
                prior.scale
            };
            means.push(prior.mean);
            sds.push(sd);
        }

        Ok(ResolvedPriors {
            terms: names,
            means,
            sds,
        })
    }
}

/// Per-column prior means and standard deviations after autoscaling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPriors {
    pub terms: Vec<String>,
    pub means: Vec<f64>,
    pub sds: Vec<f64>,
}

impl ResolvedPriors {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}
