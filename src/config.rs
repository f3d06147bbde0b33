//! Fit configuration.
//!
//! Every option has a default, so a configuration can be deserialized from a partial document
//! (`{"chains": 2, "seed": 7}`) or built with struct update syntax from [`FitConfig::default`].
//! Nothing here is global: a config is passed by value into each fit.

use crate::diagnostics::DiagnosticThresholds;
use crate::error::{Error, Result};
use crate::prior::{NormalPrior, PriorSpec};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the No-U-Turn chain pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of independent chains (≥ 1).
    pub chains: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    /// Warmup iterations per chain. `None` means `iterations / 2`.
    pub warmup: Option<usize>,
    /// Seed for every chain's random stream.
    pub seed: u64,
    /// Maximum NUTS tree depth.
    pub max_treedepth: usize,
    /// Target mean acceptance probability for step-size adaptation.
    pub target_accept: f64,
    /// Wall-clock budget per chain, in seconds.
    pub chain_timeout_secs: Option<f64>,
    /// A chain fails when more than this fraction of its kept transitions diverge.
    pub max_divergence_fraction: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            iterations: 10_000,
            warmup: None,
            seed: 42,
            max_treedepth: 10,
            target_accept: 0.8,
            chain_timeout_secs: None,
            max_divergence_fraction: 0.25,
        }
    }
}

impl SamplerConfig {
    /// Warmup length actually used.
    pub fn warmup(&self) -> usize {
        self.warmup.unwrap_or(self.iterations / 2)
    }

    /// Kept draws per chain, `iterations - warmup`.
    pub fn kept_per_chain(&self) -> usize {
        self.iterations.saturating_sub(self.warmup())
    }

    /// Per-chain wall-clock budget. A value that does not fit a [`Duration`] is rejected by
    /// [`validate`](Self::validate), so this is `None` only when no budget is set.
    pub fn chain_timeout(&self) -> Option<Duration> {
        self.chain_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Reject out-of-range settings before any chain starts.
    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(Error::InvalidConfig("chains must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be at least 1".into()));
        }
        if self.warmup() >= self.iterations {
            return Err(Error::InvalidConfig(format!(
                "warmup ({}) must be smaller than iterations ({})",
                self.warmup(),
                self.iterations
            )));
        }
        if self.max_treedepth == 0 {
            return Err(Error::InvalidConfig("max_treedepth must be at least 1".into()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "target_accept must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        if !(0.0..=1.0).contains(&self.max_divergence_fraction) {
            return Err(Error::InvalidConfig(format!(
                "max_divergence_fraction must lie in [0, 1], got {}",
                self.max_divergence_fraction
            )));
        }
        if let Some(secs) = self.chain_timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "chain_timeout_secs must be positive and finite, got {secs}"
                )));
            }
            if let Err(e) = Duration::try_from_secs_f64(secs) {
                return Err(Error::InvalidConfig(format!(
                    "chain_timeout_secs {secs} is out of range: {e}"
                )));
            }
        }
        Ok(())
    }
}

/// Everything a single fit needs besides the data.
///
/// # Example
/// ```
/// use choice_logit::{FitConfig, NormalPrior};
///
/// let config: FitConfig = serde_json::from_str(r#"{
///     "chains": 2,
///     "iterations": 2000,
///     "seed": 7,
///     "prior_default": { "mean": 0.0, "scale": 1.0, "autoscale": false }
/// }"#).unwrap();
/// assert_eq!(config.sampler.warmup(), 1000);
/// assert_eq!(config.prior_default, NormalPrior::new(0.0, 1.0));
/// assert_eq!(config.confidence_level, 0.95);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    #[serde(flatten)]
    pub sampler: SamplerConfig,
    /// Credible interval level, in (0, 1).
    pub confidence_level: f64,
    /// Prior broadcast to every non-intercept coefficient.
    pub prior_default: NormalPrior,
    pub prior_intercept: NormalPrior,
    /// One prior per non-intercept coefficient; replaces `prior_default` when set.
    pub prior_overrides: Option<Vec<NormalPrior>>,
    /// R-hat above this flags a coefficient as unconverged.
    pub rhat_threshold: f64,
    /// Bulk or tail ESS below this flags a coefficient as poorly mixed.
    pub min_ess: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        let thresholds = DiagnosticThresholds::default();
        Self {
            sampler: SamplerConfig::default(),
            confidence_level: 0.95,
            prior_default: NormalPrior::weakly_informative(),
            prior_intercept: NormalPrior::default(),
            prior_overrides: None,
            rhat_threshold: thresholds.rhat,
            min_ess: thresholds.min_ess,
        }
    }
}

impl FitConfig {
    /// The prior specification described by `prior_intercept`, `prior_default` and
    /// `prior_overrides`.
    pub fn prior_spec(&self) -> PriorSpec {
        match &self.prior_overrides {
            Some(list) => PriorSpec::per_coefficient(self.prior_intercept, list.clone()),
            None => PriorSpec::broadcast(self.prior_intercept, self.prior_default),
        }
    }

    pub fn thresholds(&self) -> DiagnosticThresholds {
        DiagnosticThresholds {
            rhat: self.rhat_threshold,
            min_ess: self.min_ess,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "confidence_level must lie in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if !(self.rhat_threshold.is_finite() && self.rhat_threshold >= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "rhat_threshold must be a finite value of at least 1, got {}",
                self.rhat_threshold
            )));
        }
        if !(self.min_ess.is_finite() && self.min_ess >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "min_ess must be finite and non-negative, got {}",
                self.min_ess
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FitConfig::default();
        assert_eq!(config.sampler.chains, 4);
        assert_eq!(config.sampler.iterations, 10_000);
        assert_eq!(config.sampler.warmup(), 5_000);
        assert_eq!(config.sampler.kept_per_chain(), 5_000);
        assert_eq!(config.confidence_level, 0.95);
        assert!(config.prior_default.autoscale);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn warmup_must_leave_room_for_draws() {
        let config = SamplerConfig {
            iterations: 100,
            warmup: Some(100),
            ..SamplerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn confidence_level_is_open_interval() {
        for level in [0.0, 1.0, -0.5, f64::NAN] {
            let config = FitConfig {
                confidence_level: level,
                ..FitConfig::default()
            };
            assert!(config.validate().is_err(), "level {level} accepted");
        }
    }

    #[test]
    fn zero_chains_rejected() {
        let config = SamplerConfig {
            chains: 0,
            ..SamplerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_timeout_rejected() {
        let config = SamplerConfig {
            chain_timeout_secs: Some(1e20),
            ..SamplerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SamplerConfig {
            chain_timeout_secs: Some(30.0),
            ..SamplerConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn overrides_select_per_coefficient_priors() {
        let config = FitConfig {
            prior_overrides: Some(vec![NormalPrior::new(0.5, 0.1)]),
            ..FitConfig::default()
        };
        assert!(matches!(
            config.prior_spec().coefficients,
            crate::prior::CoefficientPriors::PerCoefficient(ref v) if v.len() == 1
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: FitConfig = serde_json::from_str(r#"{"chains": 2, "warmup": 10}"#).unwrap();
        assert_eq!(config.sampler.chains, 2);
        assert_eq!(config.sampler.warmup(), 10);
        assert_eq!(config.sampler.iterations, 10_000);
        assert_eq!(config.min_ess, 400.0);
    }
}
