//! Bayesian logistic regression sampled with the No-U-Turn sampler.
//!
//! The posterior of the coefficients under independent Normal priors is smooth and log-concave,
//! so it is sampled directly with gradient-informed NUTS; there is no data augmentation and no
//! latent variable per observation.
//!
//! # Available Models
//! - [`NutsLogit`]: multi-chain NUTS over the coefficients of a [`DesignMatrix`](crate::DesignMatrix),
//!   producing a [`LogisticFit`].

pub use chain::{ChainFailure, ChainStats, ChainStatus, FailureReason};
pub use logit::{LogisticFit, NutsLogit};
pub(crate) use logit::sigmoid;

mod chain;
mod logit;
mod preflight;
