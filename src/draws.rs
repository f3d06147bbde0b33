//! Raw posterior draws, kept per chain.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use serde::Serialize;

/// Kept (post-warmup) draws of every completed chain.
///
/// `samples` is shaped `[chains, draws per chain, coefficients]`; `chains` holds the original
/// index of each kept chain, so gaps show which chains failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosteriorDraws {
    terms: Vec<String>,
    chains: Vec<usize>,
    samples: Array3<f64>,
}

impl PosteriorDraws {
    /// Stack per-chain draw matrices (`[draws, coefficients]`) tagged with their chain index.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] if a matrix does not have one column per term, or its row
    /// count differs from the first chain's.
    pub fn from_chains(terms: Vec<String>, chains: Vec<(usize, Array2<f64>)>) -> Result<Self> {
        let n_draws = chains.first().map_or(0, |(_, d)| d.nrows());
        let mut samples = Array3::<f64>::zeros((chains.len(), n_draws, terms.len()));
        let mut ids = Vec::with_capacity(chains.len());
        for (k, (chain, draws)) in chains.into_iter().enumerate() {
            if draws.ncols() != terms.len() {
                return Err(Error::DimensionMismatch {
                    label: format!("chain {chain}"),
                    expected: terms.len(),
                    got: draws.ncols(),
                });
            }
            if draws.nrows() != n_draws {
                return Err(Error::DimensionMismatch {
                    label: format!("chain {chain} draws"),
                    expected: n_draws,
                    got: draws.nrows(),
                });
            }
            samples.slice_mut(s![k, .., ..]).assign(&draws);
            ids.push(chain);
        }
        Ok(Self {
            terms,
            chains: ids,
            samples,
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn n_coefficients(&self) -> usize {
        self.terms.len()
    }

    /// Number of kept chains.
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn draws_per_chain(&self) -> usize {
        self.samples.shape()[1]
    }

    /// Total number of draws, over all kept chains.
    pub fn len(&self) -> usize {
        self.n_chains() * self.draws_per_chain()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Original indices of the kept chains.
    pub fn chain_ids(&self) -> &[usize] {
        &self.chains
    }

    pub fn samples(&self) -> &Array3<f64> {
        &self.samples
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.terms.iter().position(|t| t == term)
    }

    /// Draws of coefficient `j` as a `[chains, draws]` view.
    pub fn chains_for(&self, j: usize) -> ArrayView2<'_, f64> {
        self.samples.index_axis(Axis(2), j)
    }

    /// Draws of coefficient `j`, chains concatenated in order.
    pub fn coefficient(&self, j: usize) -> Array1<f64> {
        self.chains_for(j).iter().copied().collect()
    }

    /// All draws as a `[chains * draws, coefficients]` matrix, chain-major.
    pub fn pooled(&self) -> Array2<f64> {
        let rows = self.len();
        self.samples
            .to_shape((rows, self.n_coefficients()))
            .map(|view| view.to_owned())
            .unwrap_or_else(|_| Array2::zeros((rows, self.n_coefficients())))
    }

    /// Posterior mean of every coefficient.
    pub fn posterior_means(&self) -> Array1<f64> {
        self.pooled()
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.n_coefficients(), f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn draws() -> PosteriorDraws {
        PosteriorDraws::from_chains(
            vec!["a".into(), "b".into()],
            vec![
                (0, array![[1.0, 10.0], [2.0, 20.0]]),
                (2, array![[3.0, 30.0], [4.0, 40.0]]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn chain_major_layout() {
        let d = draws();
        assert_eq!(d.len(), 4);
        assert_eq!(d.chain_ids(), [0, 2]);
        assert_eq!(d.coefficient(1).to_vec(), [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(d.chains_for(0), array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(d.pooled().row(2).to_vec(), [3.0, 30.0]);
        assert_eq!(d.posterior_means().to_vec(), [2.5, 25.0]);
    }

    #[test]
    fn ragged_chains_rejected() {
        let err = PosteriorDraws::from_chains(
            vec!["a".into()],
            vec![(0, array![[1.0], [2.0]]), (1, array![[1.0]])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 1, .. }));
    }
}
