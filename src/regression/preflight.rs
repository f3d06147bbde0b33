//! Checks run on the design before sampling.
//!
//! Rank deficiency and separation do not stop a fit (proper priors keep the posterior proper),
//! but they make the posterior prior-dominated along some direction, so they are reported.

use crate::design::DesignMatrix;
use crate::diagnostics::{ConvergenceWarning, SeparationKind};
use nalgebra::DMatrix;
use ndarray::ArrayView1;

pub(crate) fn check_design(design: &DesignMatrix) -> Vec<ConvergenceWarning> {
    let mut warnings = Vec::new();
    if design.nrows() == 0 {
        return warnings;
    }
    let columns = design.ncols();
    let rank = numerical_rank(design);
    if rank < columns {
        warnings.push(ConvergenceWarning::RankDeficient { rank, columns });
    }

    let y = design.y();
    let ones = y.iter().filter(|&&v| v == 1.0).count();
    if ones == 0 || ones == y.len() {
        warnings.push(ConvergenceWarning::ConstantOutcome);
        return warnings;
    }

    let names = design.schema().names();
    for (j, name) in names.iter().enumerate() {
        let column = design.x().column(j);
        if let Some(kind) = separation(column, y.view()) {
            warnings.push(ConvergenceWarning::Separation {
                term: name.clone(),
                kind,
            });
        }
    }
    warnings
}

/// Number of singular values above the usual `max(n, p) * eps * s_max` tolerance.
fn numerical_rank(design: &DesignMatrix) -> usize {
    let x = design.x();
    let dm = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)]);
    let singular = dm.singular_values();
    let s_max = singular.iter().cloned().fold(0.0, f64::max);
    let tol = s_max * x.nrows().max(x.ncols()) as f64 * f64::EPSILON;
    singular.iter().filter(|&&s| s > tol).count()
}

/// Does column `x` separate the outcome on its own?
///
/// Constant columns never do. Indicator columns quasi-separate when every row with the indicator
/// set, or every row with it unset, has the same outcome, and separate completely when the indicator equals the outcome (or its
/// complement). Other columns separate when a threshold splits the outcomes; ties at the
/// threshold make it quasi-separation.
fn separation(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<SeparationKind> {
    let (mut min0, mut max0, mut min1, mut max1) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for (&xi, &yi) in x.iter().zip(y) {
        if yi == 1.0 {
            min1 = min1.min(xi);
            max1 = max1.max(xi);
        } else {
            min0 = min0.min(xi);
            max0 = max0.max(xi);
        }
    }
    let (lo, hi) = (min0.min(min1), max0.max(max1));
    if lo == hi {
        return None;
    }

    if max0 < min1 || max1 < min0 {
        return Some(SeparationKind::Complete);
    }

    let indicator = x.iter().all(|&v| v == 0.0 || v == 1.0);
    if indicator {
        // rows on either side of the indicator all share one outcome
        let set_side = (max1 == 1.0) != (max0 == 1.0);
        let unset_side = (min1 == 0.0) != (min0 == 0.0);
        return (set_side || unset_side).then_some(SeparationKind::Quasi);
    }

    (max0 <= min1 || max1 <= min0).then_some(SeparationKind::Quasi)
}
