//! Posterior summaries: mean, standard deviation and equal-tailed credible interval per
//! coefficient.

use crate::draws::PosteriorDraws;
use crate::error::{Error, Result};
use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Type-7 (linear interpolation) empirical quantile of ascending `sorted` at probability `p`.
pub(crate) fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

pub(crate) fn check_confidence(confidence_level: f64) -> Result<()> {
    if confidence_level > 0.0 && confidence_level < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "confidence_level must lie in (0, 1), got {confidence_level}"
        )))
    }
}

/// One row of a [`PosteriorSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientSummary {
    pub term: String,
    /// Posterior mean.
    pub estimate: f64,
    /// Posterior standard deviation.
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
}

impl CoefficientSummary {
    /// Summarize the draws of one coefficient.
    ///
    /// The interval holds the `(1-c)/2` and `1-(1-c)/2` quantiles, widened to include the mean
    /// when skewed draws put the mean outside a narrow interval.
    pub fn from_values(term: impl Into<String>, values: ArrayView1<f64>, confidence_level: f64) -> Result<Self> {
        check_confidence(confidence_level)?;
        let n = values.len();
        let mut sorted = values.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let estimate = if n == 0 { f64::NAN } else { values.sum() / n as f64 };
        let std_error = if n < 2 { 0.0 } else { values.std(1.0) };
        let tail = (1.0 - confidence_level) / 2.0;
        let lower = quantile_sorted(&sorted, tail).min(estimate);
        let upper = quantile_sorted(&sorted, 1.0 - tail).max(estimate);

        Ok(Self {
            term: term.into(),
            estimate,
            std_error,
            lower,
            upper,
        })
    }
}

/// Per-coefficient posterior summary at one credible level.
///
/// `Display` renders a rounded table; the stored values keep full precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosteriorSummary {
    confidence_level: f64,
    rows: Vec<CoefficientSummary>,
}

impl PosteriorSummary {
    /// Summarize pooled draws.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] unless `0 < confidence_level < 1`.
    ///
    /// # Example
    /// ```
    /// use choice_logit::{PosteriorDraws, PosteriorSummary};
    /// use ndarray::array;
    ///
    /// let draws = PosteriorDraws::from_chains(
    ///     vec!["(Intercept)".into(), "ydstogo".into()],
    ///     vec![(0, array![[0.1, -0.2], [0.3, -0.4]]), (1, array![[0.2, -0.3], [0.4, -0.1]])],
    /// )?;
    /// let summary = PosteriorSummary::from_draws(&draws, 0.9)?;
    /// let row = summary.get("ydstogo").unwrap();
    /// assert!((row.estimate + 0.25).abs() < 1e-12);
    /// assert!(row.lower <= row.estimate && row.estimate <= row.upper);
    /// # Ok::<(), choice_logit::Error>(())
    /// ```
    pub fn from_draws(draws: &PosteriorDraws, confidence_level: f64) -> Result<Self> {
        Self::from_columns(draws.terms(), draws.pooled().view(), confidence_level)
    }

    /// Summarize a `[draws, coefficients]` matrix with one name per column.
    pub fn from_columns(terms: &[String], values: ArrayView2<f64>, confidence_level: f64) -> Result<Self> {
        check_confidence(confidence_level)?;
        if terms.len() != values.ncols() {
            return Err(Error::DimensionMismatch {
                label: "summary".into(),
                expected: terms.len(),
                got: values.ncols(),
            });
        }
        let rows = terms
            .iter()
            .zip(values.columns())
            .map(|(term, column)| CoefficientSummary::from_values(term.clone(), column, confidence_level))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            confidence_level,
            rows,
        })
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn rows(&self) -> &[CoefficientSummary] {
        &self.rows
    }

    pub fn get(&self, term: &str) -> Option<&CoefficientSummary> {
        self.rows.iter().find(|r| r.term == term)
    }
}

impl fmt::Display for PosteriorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = self.confidence_level * 100.0;
        writeln!(
            f,
            "{:<15} {:<12} {:<12} {:<12} {:<12}",
            "Term",
            "Estimate",
            "Std. Error",
            format!("{pct:.0}% lower"),
            format!("{pct:.0}% upper")
        )?;
        writeln!(f, "{}", "-".repeat(67))?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<15} {:<12.4} {:<12.4} {:<12.4} {:<12.4}",
                row.term, row.estimate, row.std_error, row.lower, row.upper
            )?;
        }
        Ok(())
    }
}
