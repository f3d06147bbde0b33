//! Posterior choice probabilities for new covariate profiles.
//!
//! A [`Profile`] names a value for every model term, e.g. fourth down with two yards to go. It is
//! encoded by [`DesignSchema::encode`] exactly like a training row, and every posterior draw of
//! the coefficients gives one probability `σ(xᵀβ)` of the second outcome level.

use crate::design::DesignSchema;
use crate::draws::PosteriorDraws;
use crate::error::{Error, Result};
use crate::regression::sigmoid;
use crate::summary::{check_confidence, quantile_sorted};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Value of one term in a [`Profile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProfileValue {
    Level(String),
    Number(f64),
}

/// Covariate values for a single hypothetical observation.
///
/// # Example
/// ```
/// use choice_logit::Profile;
///
/// let profile = Profile::new().with_level("down", 4).with_number("ydstogo", 2.0);
/// assert_eq!(profile.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    values: BTreeMap<String, ProfileValue>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, term: impl Into<String>, level: impl ToString) -> Self {
        self.values.insert(term.into(), ProfileValue::Level(level.to_string()));
        self
    }

    pub fn with_number(mut self, term: impl Into<String>, value: f64) -> Self {
        self.values.insert(term.into(), ProfileValue::Number(value));
        self
    }

    pub fn get(&self, term: &str) -> Option<&ProfileValue> {
        self.values.get(term)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PosteriorDraws {
    /// Probability of the second outcome level for `profile`, one value per draw, chain-major.
    ///
    /// # Errors
    /// [`Error::Schema`] if the profile cannot be encoded, [`Error::DimensionMismatch`] if
    /// `schema` does not describe these draws.
    pub fn choice_probability(&self, schema: &DesignSchema, profile: &Profile) -> Result<Array1<f64>> {
        if schema.names() != self.terms() {
            return Err(Error::DimensionMismatch {
                label: "profile schema".into(),
                expected: self.n_coefficients(),
                got: schema.len(),
            });
        }
        let x = schema.encode(profile)?;
        let eta = self.pooled().dot(&x);
        Ok(eta.mapv(sigmoid))
    }
}

/// Posterior mean and credible interval of a choice probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
}

impl PredictionSummary {
    /// # Errors
    /// [`Error::InvalidConfig`] unless `0 < confidence_level < 1`.
    pub fn from_probabilities(probabilities: ArrayView1<f64>, confidence_level: f64) -> Result<Self> {
        check_confidence(confidence_level)?;
        let mut sorted = probabilities.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mean = probabilities.mean().unwrap_or(f64::NAN);
        let tail = (1.0 - confidence_level) / 2.0;
        Ok(Self {
            mean,
            lower: quantile_sorted(&sorted, tail).min(mean),
            upper: quantile_sorted(&sorted, 1.0 - tail).max(mean),
            confidence_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{DesignMatrix, ModelSpec, ObservationTable, Term};
    use crate::error::SchemaError;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn schema() -> DesignSchema {
        let table = ObservationTable::new()
            .with_categorical("decision", ["go", "kick", "kick"])
            .unwrap()
            .with_categorical("down", [4, 3, 4])
            .unwrap()
            .with_continuous("ydstogo", [1.0, 8.0, 3.0])
            .unwrap();
        let spec = ModelSpec::new("decision", ["kick", "go"])
            .term(Term::categorical("down", [3, 4], 3))
            .term(Term::continuous("ydstogo"));
        DesignMatrix::build(&table, &spec).unwrap().schema().clone()
    }

    #[test]
    fn profile_encodes_like_training_rows() {
        let schema = schema();
        let row = schema
            .encode(&Profile::new().with_level("down", 4).with_number("ydstogo", 2.0))
            .unwrap();
        assert_eq!(row.to_vec(), [1.0, 1.0, 2.0]);
        let row = schema
            .encode(&Profile::new().with_level("down", 3).with_number("ydstogo", 7.5))
            .unwrap();
        assert_eq!(row.to_vec(), [1.0, 0.0, 7.5]);
    }

    #[test]
    fn bad_profiles_are_schema_errors() {
        let schema = schema();
        assert_eq!(
            schema.encode(&Profile::new().with_level("down", 4)),
            Err(SchemaError::MissingProfileValue("ydstogo".into()))
        );
        assert!(matches!(
            schema.encode(&Profile::new().with_level("down", 2).with_number("ydstogo", 1.0)),
            Err(SchemaError::UnknownLevel { ref value, .. }) if value == "2"
        ));
        assert!(matches!(
            schema.encode(&Profile::new().with_number("down", 4.0).with_number("ydstogo", 1.0)),
            Err(SchemaError::WrongKind { .. })
        ));
    }

    #[test]
    fn one_probability_per_draw() {
        let schema = schema();
        let draws = PosteriorDraws::from_chains(
            schema.names(),
            vec![(0, array![[0.0, 0.0, 0.0], [1.0, -1.0, 0.5]]), (1, array![[-2.0, 1.0, 0.0]])],
        )
        .unwrap();
        let profile = Profile::new().with_level("down", 4).with_number("ydstogo", 2.0);
        let p = draws.choice_probability(&schema, &profile).unwrap();
        assert_eq!(p.len(), 3);
        assert_relative_eq!(p[0], 0.5);
        assert_relative_eq!(p[1], sigmoid(1.0), epsilon = 1e-15);
        assert_relative_eq!(p[2], sigmoid(-1.0), epsilon = 1e-15);

        let summary = PredictionSummary::from_probabilities(p.view(), 0.9).unwrap();
        assert!(summary.lower <= summary.mean && summary.mean <= summary.upper);
        assert!(summary.lower > 0.0 && summary.upper < 1.0);
    }
}
