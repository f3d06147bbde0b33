//! Side-by-side comparison of posterior draws from several fits.
//!
//! A [`ComparisonSet`] stacks the draws of two or more fits of the same model (different prior
//! configurations, different training windows) into one long table, each row tagged with the
//! fit it came from and its chain. Draws are copied unmodified and in order.

use crate::draws::PosteriorDraws;
use crate::error::{Error, Result};
use crate::summary::PosteriorSummary;
use ndarray::{Array2, ArrayView2, s};
use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSet {
    terms: Vec<String>,
    labels: Vec<String>,
    /// Row range of each label, in label order.
    ranges: Vec<Range<usize>>,
    /// Original chain index of every row.
    chains: Vec<usize>,
    samples: Array2<f64>,
}

impl ComparisonSet {
    /// Concatenate labeled draw sets, in the order given.
    ///
    /// # Errors
    /// - [`Error::TooFewFits`] with fewer than two sets.
    /// - [`Error::DimensionMismatch`] if a set has a different number of coefficients than the
    ///   first.
    /// - [`Error::TermMismatch`] if a set names its coefficients differently.
    ///
    /// # Example
    /// ```
    /// use choice_logit::{ComparisonSet, PosteriorDraws};
    /// use ndarray::array;
    ///
    /// let terms = vec!["(Intercept)".to_string(), "ydstogo".to_string()];
    /// let weak = PosteriorDraws::from_chains(terms.clone(), vec![(0, array![[0.1, -0.2], [0.2, -0.3]])])?;
    /// let strong = PosteriorDraws::from_chains(terms, vec![(0, array![[0.0, -0.1]]), (1, array![[0.1, -0.1]])])?;
    ///
    /// let set = ComparisonSet::new(vec![("weak", &weak), ("informative", &strong)])?;
    /// assert_eq!(set.len(), 4);
    /// let slopes: Vec<(&str, f64)> = set.coefficient("ydstogo").unwrap().collect();
    /// assert_eq!(slopes[2], ("informative", -0.1));
    /// # Ok::<(), choice_logit::Error>(())
    /// ```
    pub fn new<L: Into<String>>(sets: Vec<(L, &PosteriorDraws)>) -> Result<Self> {
        if sets.len() < 2 {
            return Err(Error::TooFewFits(sets.len()));
        }
        let terms = sets[0].1.terms().to_vec();
        let total: usize = sets.iter().map(|(_, d)| d.len()).sum();

        let mut samples = Array2::<f64>::zeros((total, terms.len()));
        let mut labels = Vec::with_capacity(sets.len());
        let mut ranges = Vec::with_capacity(sets.len());
        let mut chains = Vec::with_capacity(total);
        let mut start = 0;

        for (label, draws) in sets {
            let label = label.into();
            if draws.n_coefficients() != terms.len() {
                return Err(Error::DimensionMismatch {
                    label,
                    expected: terms.len(),
                    got: draws.n_coefficients(),
                });
            }
            if draws.terms() != terms.as_slice() {
                return Err(Error::TermMismatch {
                    label,
                    expected: terms,
                    got: draws.terms().to_vec(),
                });
            }
            let end = start + draws.len();
            samples.slice_mut(s![start..end, ..]).assign(&draws.pooled());
            for &chain in draws.chain_ids() {
                chains.extend(std::iter::repeat_n(chain, draws.draws_per_chain()));
            }
            labels.push(label);
            ranges.push(start..end);
            start = end;
        }

        Ok(Self {
            terms,
            labels,
            ranges,
            chains,
            samples,
        })
    }

    /// Total number of rows, the sum of every set's draws.
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// `[rows, coefficients]` matrix of every draw.
    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    /// Source label of row `row`.
    pub fn label_of(&self, row: usize) -> Option<&str> {
        self.ranges
            .iter()
            .position(|r| r.contains(&row))
            .map(|i| self.labels[i].as_str())
    }

    /// Original chain index of row `row` within its source fit.
    pub fn chain_of(&self, row: usize) -> Option<usize> {
        self.chains.get(row).copied()
    }

    /// Every draw of coefficient `term`, with the label of its source.
    pub fn coefficient(&self, term: &str) -> Option<impl Iterator<Item = (&str, f64)> + '_> {
        let j = self.terms.iter().position(|t| t == term)?;
        Some(self.labels.iter().zip(&self.ranges).flat_map(move |(label, range)| {
            self.samples
                .slice(s![range.clone(), j])
                .into_iter()
                .map(move |&v| (label.as_str(), v))
        }))
    }

    /// The rows that came from `label`.
    pub fn draws_for(&self, label: &str) -> Option<ArrayView2<'_, f64>> {
        let i = self.labels.iter().position(|l| l == label)?;
        Some(self.samples.slice(s![self.ranges[i].clone(), ..]))
    }

    /// One posterior summary per label, in label order.
    pub fn summaries(&self, confidence_level: f64) -> Result<Vec<(String, PosteriorSummary)>> {
        self.labels
            .iter()
            .zip(&self.ranges)
            .map(|(label, range)| {
                let rows = self.samples.slice(s![range.clone(), ..]);
                PosteriorSummary::from_columns(&self.terms, rows, confidence_level)
                    .map(|summary| (label.clone(), summary))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};
    use proptest::prelude::*;

    fn terms() -> Vec<String> {
        vec!["(Intercept)".into(), "x".into()]
    }

    #[test]
    fn one_set_is_too_few() {
        let d = PosteriorDraws::from_chains(terms(), vec![(0, array![[0.0, 1.0]])]).unwrap();
        assert_eq!(ComparisonSet::new(vec![("only", &d)]), Err(Error::TooFewFits(1)));
    }

    #[test]
    fn dimension_mismatch_names_offending_set() {
        let a = PosteriorDraws::from_chains(terms(), vec![(0, array![[0.0, 1.0]])]).unwrap();
        let b = PosteriorDraws::from_chains(vec!["(Intercept)".into()], vec![(0, array![[0.0]])]).unwrap();
        assert_eq!(
            ComparisonSet::new(vec![("a", &a), ("b", &b)]),
            Err(Error::DimensionMismatch {
                label: "b".into(),
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn renamed_terms_rejected() {
        let a = PosteriorDraws::from_chains(terms(), vec![(0, array![[0.0, 1.0]])]).unwrap();
        let b = PosteriorDraws::from_chains(vec!["(Intercept)".into(), "y".into()], vec![(0, array![[0.0, 1.0]])])
            .unwrap();
        assert!(matches!(
            ComparisonSet::new(vec![("a", &a), ("b", &b)]),
            Err(Error::TermMismatch { ref label, .. }) if label == "b"
        ));
    }

    #[test]
    fn rows_keep_label_and_chain() {
        let a = PosteriorDraws::from_chains(terms(), vec![(0, array![[0.0, 1.0]]), (3, array![[2.0, 3.0]])]).unwrap();
        let b = PosteriorDraws::from_chains(terms(), vec![(1, array![[4.0, 5.0]])]).unwrap();
        let set = ComparisonSet::new(vec![("a", &a), ("b", &b)]).unwrap();
        assert_eq!(set.label_of(1), Some("a"));
        assert_eq!(set.chain_of(1), Some(3));
        assert_eq!(set.label_of(2), Some("b"));
        assert_eq!(set.label_of(3), None);
        assert_eq!(set.draws_for("b").unwrap(), array![[4.0, 5.0]]);

        let summaries = set.summaries(0.5).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].1.get("x").unwrap().estimate, 2.0);
    }

    proptest! {
        #[test]
        fn concatenation_keeps_every_draw(sizes in proptest::collection::vec((1usize..4, 1usize..20), 2..5)) {
            let sets: Vec<PosteriorDraws> = sizes
                .iter()
                .enumerate()
                .map(|(k, &(chains, draws))| {
                    let per_chain = (0..chains)
                        .map(|c| {
                            let m = Array2::from_shape_fn((draws, 2), |(i, j)| (k * 10_000 + c * 100 + i) as f64 + j as f64 * 0.5);
                            (c, m)
                        })
                        .collect();
                    PosteriorDraws::from_chains(terms(), per_chain).unwrap()
                })
                .collect();
            let labeled: Vec<(String, &PosteriorDraws)> =
                sets.iter().enumerate().map(|(k, d)| (format!("fit{k}"), d)).collect();
            let set = ComparisonSet::new(labeled).unwrap();

            let expected: usize = sizes.iter().map(|(c, d)| c * d).sum();
            prop_assert_eq!(set.len(), expected);
            let mut row = 0;
            for (k, d) in sets.iter().enumerate() {
                let label = format!("fit{k}");
                let pooled = d.pooled();
                prop_assert_eq!(set.draws_for(&label).unwrap(), pooled.view());
                for _ in 0..d.len() {
                    prop_assert_eq!(set.label_of(row), Some(label.as_str()));
                    row += 1;
                }
            }
        }
    }
}
