//! Observation tables, term specifications, and the design matrix built from them.
//!
//! The model is described by an explicit, ordered [`ModelSpec`]: an outcome column with its two
//! levels and a list of [`Term`]s, each categorical (with a reference level) or continuous. The
//! spec is validated once and resolved into a fixed [`DesignSchema`]:
//!
//! - column 0 is the intercept, named [`INTERCEPT`];
//! - each categorical term contributes one indicator column per non-reference level, named
//!   `{term}{level}` (so `down` with levels `1..4` and reference `1` gives `down2`, `down3`,
//!   `down4`);
//! - each continuous term contributes one column named after the term.

use crate::error::SchemaError;
use crate::predict::{Profile, ProfileValue};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the intercept column.
pub const INTERCEPT: &str = "(Intercept)";

/// One column of an [`ObservationTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Categorical(Vec<String>),
    Continuous(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Categorical(v) => v.len(),
            Column::Continuous(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Column::Categorical(_) => "categorical",
            Column::Continuous(_) => "continuous",
        }
    }
}

/// Column-oriented table of cleaned observations.
///
/// Every column has the same number of rows. Columns the model does not reference (grouping
/// fields such as team or week) may be present and are ignored.
///
/// # Example
/// ```
/// use choice_logit::ObservationTable;
///
/// let table = ObservationTable::new()
///     .with_categorical("decision", ["kick", "go", "kick"])?
///     .with_categorical("down", [4, 4, 3])?
///     .with_continuous("ydstogo", [2.0, 1.0, 7.0])?;
/// assert_eq!(table.len(), 3);
/// # Ok::<(), choice_logit::SchemaError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    columns: BTreeMap<String, Column>,
    rows: Option<usize>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. The first column fixes the row count.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<(), SchemaError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        match self.rows {
            Some(expected) if expected != column.len() => {
                return Err(SchemaError::LengthMismatch {
                    column: name,
                    expected,
                    got: column.len(),
                });
            }
            _ => self.rows = Some(column.len()),
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert) for a categorical column.
    pub fn with_categorical<I, T>(mut self, name: impl Into<String>, values: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.insert(name, Column::Categorical(values))?;
        Ok(self)
    }

    /// Builder form of [`insert`](Self::insert) for a continuous column.
    pub fn with_continuous<I>(mut self, name: impl Into<String>, values: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = f64>,
    {
        self.insert(name, Column::Continuous(values.into_iter().collect()))?;
        Ok(self)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.rows.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The binary outcome: its column and two ordered levels. The first level is coded 0, the
/// second 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub column: String,
    pub levels: [String; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermKind {
    Categorical { levels: Vec<String>, reference: String },
    Continuous,
}

/// One covariate of the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub kind: TermKind,
}

impl Term {
    pub fn categorical<I, T>(name: impl Into<String>, levels: I, reference: impl ToString) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self {
            name: name.into(),
            kind: TermKind::Categorical {
                levels: levels.into_iter().map(|l| l.to_string()).collect(),
                reference: reference.to_string(),
            },
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TermKind::Continuous,
        }
    }
}

/// Ordered model specification.
///
/// # Example
/// ```
/// use choice_logit::{ModelSpec, Term};
///
/// let spec = ModelSpec::new("decision", ["kick", "go"])
///     .term(Term::categorical("down", [1, 2, 3, 4], 1))
///     .term(Term::continuous("ydstogo"));
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub outcome: OutcomeSpec,
    pub terms: Vec<Term>,
}

impl ModelSpec {
    pub fn new(outcome_column: impl Into<String>, levels: [impl ToString; 2]) -> Self {
        let [first, second] = levels;
        Self {
            outcome: OutcomeSpec {
                column: outcome_column.into(),
                levels: [first.to_string(), second.to_string()],
            },
            terms: Vec::new(),
        }
    }

    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |term: &str, reason: String| SchemaError::InvalidTerm {
            term: term.to_string(),
            reason,
        };
        if self.outcome.levels[0] == self.outcome.levels[1] {
            return Err(invalid(
                &self.outcome.column,
                "the two outcome levels must differ".into(),
            ));
        }
        for (i, term) in self.terms.iter().enumerate() {
            if term.name == self.outcome.column {
                return Err(invalid(&term.name, "term is also the outcome column".into()));
            }
            if self.terms[..i].iter().any(|t| t.name == term.name) {
                return Err(invalid(&term.name, "term is declared twice".into()));
            }
            if let TermKind::Categorical { levels, reference } = &term.kind {
                if levels.len() < 2 {
                    return Err(invalid(&term.name, "needs at least two levels".into()));
                }
                for (j, level) in levels.iter().enumerate() {
                    if levels[..j].contains(level) {
                        return Err(invalid(&term.name, format!("level `{level}` is repeated")));
                    }
                }
                if !levels.contains(reference) {
                    return Err(invalid(
                        &term.name,
                        format!("reference level `{reference}` is not a declared level"),
                    ));
                }
            }
        }

        // generated names such as `down` + `2` must not clash with another column
        let schema = DesignSchema::from_spec(self);
        for (j, column) in schema.columns.iter().enumerate() {
            if schema.columns[..j].iter().any(|c| c.name == column.name) {
                let owner = match &column.source {
                    ColumnSource::Level { term, .. } | ColumnSource::Continuous { term } => term.as_str(),
                    ColumnSource::Intercept => INTERCEPT,
                };
                return Err(invalid(
                    owner,
                    format!("design column `{}` is generated more than once", column.name),
                ));
            }
        }
        Ok(())
    }
}

/// Where a design column comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    Intercept,
    Level { term: String, level: String },
    Continuous { term: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignColumn {
    pub name: String,
    pub source: ColumnSource,
}

/// The fixed column layout of a design matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignSchema {
    columns: Vec<DesignColumn>,
    /// Reference level of every categorical term.
    references: BTreeMap<String, String>,
}

impl DesignSchema {
    /// Resolve a validated spec into its column layout.
    fn from_spec(spec: &ModelSpec) -> Self {
        let mut columns = vec![DesignColumn {
            name: INTERCEPT.to_string(),
            source: ColumnSource::Intercept,
        }];
        let mut references = BTreeMap::new();
        for term in &spec.terms {
            match &term.kind {
                TermKind::Categorical { levels, reference } => {
                    references.insert(term.name.clone(), reference.clone());
                    columns.extend(levels.iter().filter(|l| *l != reference).map(|level| {
                        DesignColumn {
                            name: format!("{}{}", term.name, level),
                            source: ColumnSource::Level {
                                term: term.name.clone(),
                                level: level.clone(),
                            },
                        }
                    }));
                }
                TermKind::Continuous => columns.push(DesignColumn {
                    name: term.name.clone(),
                    source: ColumnSource::Continuous {
                        term: term.name.clone(),
                    },
                }),
            }
        }
        Self { columns, references }
    }

    pub fn columns(&self) -> &[DesignColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

impl DesignSchema {
    /// Encode `profile` as one design row, in column order.
    ///
    /// # Errors
    /// [`SchemaError::MissingProfileValue`] if a term has no value; [`SchemaError::WrongKind`] if
    /// a categorical term gets a number or vice versa; [`SchemaError::UnknownLevel`] (row 0) for an
    /// undeclared level; [`SchemaError::NonFinite`] for a non-finite number.
    pub fn encode(&self, profile: &Profile) -> Result<Array1<f64>, SchemaError> {
        let mut row = Array1::<f64>::zeros(self.len());
        // levels seen per categorical term, to detect values outside every dummy
        let mut matched: BTreeMap<&str, bool> = BTreeMap::new();

        for (j, column) in self.columns().iter().enumerate() {
            match &column.source {
                ColumnSource::Intercept => row[j] = 1.0,
                ColumnSource::Level { term, level } => {
                    let value = match profile.get(term) {
                        Some(ProfileValue::Level(value)) => value,
                        Some(ProfileValue::Number(_)) => {
                            return Err(SchemaError::WrongKind {
                                column: term.clone(),
                                expected: "categorical",
                                found: "continuous",
                            });
                        }
                        None => return Err(SchemaError::MissingProfileValue(term.clone())),
                    };
                    let hit = value == level;
                    row[j] = if hit { 1.0 } else { 0.0 };
                    *matched.entry(term.as_str()).or_default() |= hit;
                }
                ColumnSource::Continuous { term } => match profile.get(term) {
                    Some(ProfileValue::Number(value)) if value.is_finite() => row[j] = *value,
                    Some(ProfileValue::Number(_)) => {
                        return Err(SchemaError::NonFinite {
                            column: term.clone(),
                            row: 0,
                        });
                    }
                    Some(ProfileValue::Level(_)) => {
                        return Err(SchemaError::WrongKind {
                            column: term.clone(),
                            expected: "continuous",
                            found: "categorical",
                        });
                    }
                    None => return Err(SchemaError::MissingProfileValue(term.clone())),
                },
            }
        }
        self.check_reference_levels(profile, &matched)?;
        Ok(row)
    }

    /// A categorical value that matched no dummy column must be the reference level.
    fn check_reference_levels(
        &self,
        profile: &Profile,
        matched: &BTreeMap<&str, bool>,
    ) -> Result<(), SchemaError> {
        for (&term, &hit) in matched {
            if hit {
                continue;
            }
            let Some(ProfileValue::Level(value)) = profile.get(term) else {
                continue;
            };
            if self.references.get(term).is_none_or(|reference| reference != value) {
                return Err(SchemaError::UnknownLevel {
                    column: term.to_string(),
                    row: 0,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Numeric design matrix and matching {0,1} outcome vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignMatrix {
    x: Array2<f64>,
    y: Array1<f64>,
    schema: DesignSchema,
}

impl DesignMatrix {
    /// Encode `table` according to `spec`.
    ///
    /// # Errors
    /// [`SchemaError`] if the spec is inconsistent, a declared column is absent or of the wrong
    /// kind, a categorical value (outcome included) is not a declared level, or a continuous
    /// value is not finite.
    ///
    /// # Example
    /// ```
    /// use choice_logit::{DesignMatrix, ModelSpec, ObservationTable, Term};
    ///
    /// let table = ObservationTable::new()
    ///     .with_categorical("decision", ["kick", "go", "kick", "go"])?
    ///     .with_categorical("down", [3, 4, 4, 3])?
    ///     .with_continuous("ydstogo", [2.0, 1.0, 7.0, 3.0])?;
    /// let spec = ModelSpec::new("decision", ["kick", "go"])
    ///     .term(Term::categorical("down", [3, 4], 3))
    ///     .term(Term::continuous("ydstogo"));
    ///
    /// let design = DesignMatrix::build(&table, &spec)?;
    /// assert_eq!(design.schema().names(), ["(Intercept)", "down4", "ydstogo"]);
    /// assert_eq!(design.y().to_vec(), [0.0, 1.0, 0.0, 1.0]);
    /// # Ok::<(), choice_logit::SchemaError>(())
    /// ```
    pub fn build(table: &ObservationTable, spec: &ModelSpec) -> Result<Self, SchemaError> {
        spec.validate()?;
        let n = table.len();
        let y = encode_outcome(table, &spec.outcome)?;

        let schema = DesignSchema::from_spec(spec);
        let mut x = Array2::<f64>::zeros((n, schema.len()));
        x.column_mut(0).fill(1.0);

        let mut col = 1;
        for term in &spec.terms {
            let column = table
                .column(&term.name)
                .ok_or_else(|| SchemaError::MissingColumn(term.name.clone()))?;
            match (&term.kind, column) {
                (TermKind::Categorical { levels, reference }, Column::Categorical(values)) => {
                    let dummies: Vec<&String> = levels.iter().filter(|l| *l != reference).collect();
                    for (row, value) in values.iter().enumerate() {
                        if !levels.contains(value) {
                            return Err(SchemaError::UnknownLevel {
                                column: term.name.clone(),
                                row,
                                value: value.clone(),
                            });
                        }
                        if let Some(k) = dummies.iter().position(|l| *l == value) {
                            x[(row, col + k)] = 1.0;
                        }
                    }
                    col += dummies.len();
                }
                (TermKind::Continuous, Column::Continuous(values)) => {
                    for (row, &value) in values.iter().enumerate() {
                        if !value.is_finite() {
                            return Err(SchemaError::NonFinite {
                                column: term.name.clone(),
                                row,
                            });
                        }
                        x[(row, col)] = value;
                    }
                    col += 1;
                }
                (kind, column) => {
                    return Err(SchemaError::WrongKind {
                        column: term.name.clone(),
                        expected: match kind {
                            TermKind::Categorical { .. } => "categorical",
                            TermKind::Continuous => "continuous",
                        },
                        found: column.kind_name(),
                    });
                }
            }
        }
        debug_assert_eq!(col, schema.len());

        Ok(Self { x, y, schema })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn schema(&self) -> &DesignSchema {
        &self.schema
    }

    /// Number of observations.
    pub fn nrows(&self) -> usize {
        self.x.nrows()
    }

    /// Number of coefficients, intercept included.
    pub fn ncols(&self) -> usize {
        self.x.ncols()
    }
}

fn encode_outcome(table: &ObservationTable, outcome: &OutcomeSpec) -> Result<Array1<f64>, SchemaError> {
    let column = table
        .column(&outcome.column)
        .ok_or_else(|| SchemaError::MissingColumn(outcome.column.clone()))?;
    let Column::Categorical(values) = column else {
        return Err(SchemaError::WrongKind {
            column: outcome.column.clone(),
            expected: "categorical",
            found: column.kind_name(),
        });
    };
    values
        .iter()
        .enumerate()
        .map(|(row, value)| match outcome.levels.iter().position(|l| l == value) {
            Some(code) => Ok(code as f64),
            None => Err(SchemaError::UnknownLevel {
                column: outcome.column.clone(),
                row,
                value: value.clone(),
            }),
        })
        .collect()
}
