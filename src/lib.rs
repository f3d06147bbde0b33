//! # Bayesian Logistic Regression for Binary Choices
//!
//! This crate estimates how likely an actor is to pick one of two actions (go for it or kick,
//! run or pass) given categorical and continuous covariates, with Bayesian logistic regression
//! sampled by the No-U-Turn sampler.
//!
//! ## Features
//!
//! - **Design matrices:**
//!   - Explicit, validated term specifications ([`ModelSpec`], [`Term`]) with one-hot encoding of
//!     categorical terms against a reference level; see [`DesignMatrix::build`].
//!
//! - **Priors:**
//!   - Independent Normal priors per coefficient, broadcast or listed, optionally autoscaled by the
//!     spread of their design column; informative priors can be derived from an earlier fit with
//!     [`PriorSpec::from_posterior`].
//!
//! - **Sampling:**
//!   - Multi-chain NUTS with dual-averaging step size and windowed diagonal metric adaptation;
//!     see [`regression::NutsLogit`]. Chains run on the rayon pool under the default `rayon`
//!     feature and are reproducible from the seed either way.
//!
//! - **Diagnostics, summaries and comparisons:**
//!   - Split rank-normalized R-hat, bulk and tail ESS, divergences and design checks
//!     ([`DiagnosticsReport`]); posterior summaries ([`PosteriorSummary`]); labeled concatenation
//!     of several fits ([`ComparisonSet`]); posterior choice probabilities ([`Profile`]).
//!
//! ## Mathematical Background
//!
//! - Hoffman, M. D., & Gelman, A. (2014). The No-U-Turn Sampler. *JMLR* 15, 1593–1623.
//! - Gelman, A., Jakulin, A., Pittau, M. G., & Su, Y.-S. (2008). A weakly informative default
//!   prior distribution for logistic and other regression models. *Ann. Appl. Stat.* 2(4).
//! - Vehtari, A., Gelman, A., Simpson, D., Carpenter, B., & Bürkner, P.-C. (2021).
//!   Rank-normalization, folding, and localization: An improved R-hat. *Bayesian Analysis* 16(2).
//!
//! ## Usage Example
//!
//! ```rust
//! use choice_logit::{FitConfig, ModelSpec, ObservationTable, Profile, SamplerConfig, Term};
//!
//! let table = ObservationTable::new()
//!     .with_categorical("decision", ["kick", "go", "kick", "go", "go", "kick", "kick", "go"])?
//!     .with_categorical("down", [4, 4, 3, 4, 3, 4, 3, 4])?
//!     .with_continuous("ydstogo", [8.0, 1.0, 2.0, 3.0, 1.0, 5.0, 9.0, 2.0])?;
//! let spec = ModelSpec::new("decision", ["kick", "go"])
//!     .term(Term::categorical("down", [3, 4], 3))
//!     .term(Term::continuous("ydstogo"));
//!
//! let config = FitConfig {
//!     sampler: SamplerConfig { chains: 2, iterations: 600, seed: 3, ..SamplerConfig::default() },
//!     ..FitConfig::default()
//! };
//! let fit = choice_logit::fit(&table, &spec, &config)?;
//! println!("{}", fit.summary(config.confidence_level)?);
//!
//! let short = Profile::new().with_level("down", 4).with_number("ydstogo", 1.0);
//! let p_go = fit.predict(&short, 0.9)?;
//! assert!(p_go.mean > 0.0 && p_go.mean < 1.0);
//! # Ok::<(), choice_logit::Error>(())
//! ```

pub(crate) mod adapt;
pub mod compare;
pub mod config;
pub mod design;
pub mod diagnostics;
pub mod draws;
pub mod error;
pub(crate) mod nuts;
pub mod predict;
pub mod prior;
pub mod regression;
pub(crate) mod rng;
pub mod summary;

pub use compare::ComparisonSet;
pub use config::{FitConfig, SamplerConfig};
pub use design::{Column, DesignMatrix, DesignSchema, INTERCEPT, ModelSpec, ObservationTable, Term, TermKind};
pub use diagnostics::{ConvergenceWarning, DiagnosticThresholds, DiagnosticsReport, SeparationKind};
pub use draws::PosteriorDraws;
pub use error::{Error, Result, SchemaError};
pub use predict::{PredictionSummary, Profile, ProfileValue};
pub use prior::{CoefficientPriors, NormalPrior, PriorSpec, ResolvedPriors};
pub use regression::{LogisticFit, NutsLogit};
pub use summary::{CoefficientSummary, PosteriorSummary};

use tracing::debug;

/// Build the design, resolve the configured priors and sample.
///
/// Every structural check (schema, prior shape, configuration) runs before the first sampling
/// iteration.
///
/// # Errors
/// [`Error::Schema`], [`Error::PriorShape`], [`Error::InvalidPrior`], [`Error::InvalidConfig`]
/// for bad inputs; [`Error::AllChainsFailed`] if no chain completes.
pub fn fit(table: &ObservationTable, spec: &ModelSpec, config: &FitConfig) -> Result<LogisticFit> {
    config.validate()?;
    let design = DesignMatrix::build(table, spec)?;
    fit_design(&design, config)
}

/// [`fit`] on an already built design, with the priors described by `config`.
pub fn fit_design(design: &DesignMatrix, config: &FitConfig) -> Result<LogisticFit> {
    fit_with_priors(design, &config.prior_spec(), config)
}

/// [`fit`] on an already built design with an explicit prior specification; the prior fields
/// of `config` are ignored.
pub fn fit_with_priors(design: &DesignMatrix, priors: &PriorSpec, config: &FitConfig) -> Result<LogisticFit> {
    config.validate()?;
    let resolved = priors.resolve(design)?;
    debug!(
        observations = design.nrows(),
        coefficients = design.ncols(),
        prior_sd = ?resolved.sds,
        "priors resolved"
    );
    NutsLogit::new(design, resolved, config.sampler.clone())?
        .with_thresholds(config.thresholds())
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ObservationTable {
        ObservationTable::new()
            .with_categorical("decision", ["kick", "go", "kick", "go", "kick", "go"])
            .unwrap()
            .with_categorical("down", [3, 4, 3, 4, 4, 3])
            .unwrap()
            .with_continuous("ydstogo", [5.0, 1.0, 2.0, 2.0, 8.0, 1.0])
            .unwrap()
    }

    fn spec() -> ModelSpec {
        ModelSpec::new("decision", ["kick", "go"])
            .term(Term::categorical("down", [3, 4], 3))
            .term(Term::continuous("ydstogo"))
    }

    #[test]
    fn wrong_override_length_fails_before_sampling() {
        let config = FitConfig {
            prior_overrides: Some(vec![NormalPrior::new(0.0, 1.0); 3]),
            ..FitConfig::default()
        };
        assert_eq!(
            fit(&table(), &spec(), &config).unwrap_err(),
            Error::PriorShape {
                expected: 2,
                got: 3
            }
        );
    }

    #[test]
    fn schema_errors_surface_through_fit() {
        let spec = spec().term(Term::continuous("score_diff"));
        assert_eq!(
            fit(&table(), &spec, &FitConfig::default()).unwrap_err(),
            Error::Schema(SchemaError::MissingColumn("score_diff".into()))
        );
    }

    #[test]
    fn invalid_config_fails_first() {
        let config = FitConfig {
            confidence_level: 1.0,
            ..FitConfig::default()
        };
        assert!(matches!(
            fit(&table(), &spec(), &config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
