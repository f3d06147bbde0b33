//! No-U-Turn sampler kernel.
//!
//! Implements one NUTS transition with a diagonal Euclidean metric: the trajectory is doubled in
//! a random direction until the no-U-turn criterion fires, a divergence is detected, or the
//! maximum tree depth is reached. The next state is drawn from the trajectory by multinomial
//! sampling on `exp(-H)`, uniformly progressive inside a subtree and biased towards the newest
//! subtree at the top level.
//!
//! # References
//! - Hoffman, M. D., & Gelman, A. (2014). The No-U-Turn Sampler. *JMLR* 15, 1593–1623.
//! - Betancourt, M. (2017). A Conceptual Introduction to Hamiltonian Monte Carlo.
//!   arXiv:1701.02434.

use crate::rng::ChainRng;

/// Energy error beyond which a trajectory is declared divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// A differentiable log density over `R^dim`.
pub trait LogDensity {
    fn dim(&self) -> usize;

    /// Write the gradient into `grad` and return the log density (up to a constant).
    ///
    /// Non-finite return values are allowed; the sampler treats them as zero density.
    fn log_density_and_gradient(&self, q: &[f64], grad: &mut [f64]) -> f64;
}

/// Position, momentum and cached density evaluation.
#[derive(Debug, Clone)]
pub(crate) struct PhasePoint {
    pub(crate) q: Vec<f64>,
    pub(crate) p: Vec<f64>,
    pub(crate) logp: f64,
    pub(crate) grad: Vec<f64>,
}

impl PhasePoint {
    pub(crate) fn new<T: LogDensity + ?Sized>(target: &T, q: Vec<f64>) -> Self {
        let mut grad = vec![0.0; q.len()];
        let logp = target.log_density_and_gradient(&q, &mut grad);
        Self {
            p: vec![0.0; q.len()],
            q,
            logp,
            grad,
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.logp.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }

    fn kinetic(&self, inv_mass: &[f64]) -> f64 {
        0.5 * self
            .p
            .iter()
            .zip(inv_mass)
            .map(|(p, m)| p * p * m)
            .sum::<f64>()
    }

    /// `H = -log p(q) + p' M^{-1} p / 2`; infinite when the density is not finite.
    fn hamiltonian(&self, inv_mass: &[f64]) -> f64 {
        if !self.logp.is_finite() {
            return f64::INFINITY;
        }
        -self.logp + self.kinetic(inv_mass)
    }

    fn resample_momentum(&mut self, inv_mass: &[f64], rng: &mut ChainRng) {
        for (p, m) in self.p.iter_mut().zip(inv_mass) {
            *p = rng.sample_norm() / m.sqrt();
        }
    }
}

/// One leapfrog step of size `eps` (negative integrates backwards).
fn leapfrog<T: LogDensity + ?Sized>(target: &T, point: &mut PhasePoint, eps: f64, inv_mass: &[f64]) {
    let half = 0.5 * eps;
    for (p, g) in point.p.iter_mut().zip(&point.grad) {
        *p += half * g;
    }
    for ((q, p), m) in point.q.iter_mut().zip(&point.p).zip(inv_mass) {
        *q += eps * m * p;
    }
    point.logp = target.log_density_and_gradient(&point.q, &mut point.grad);
    for (p, g) in point.p.iter_mut().zip(&point.grad) {
        *p += half * g;
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

/// The trajectory between `left` and `right` makes a U-turn.
fn is_turning(left: &PhasePoint, right: &PhasePoint, inv_mass: &[f64]) -> bool {
    let (mut dot_left, mut dot_right) = (0.0, 0.0);
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * inv_mass[i] * left.p[i];
        dot_right += dq * inv_mass[i] * right.p[i];
    }
    dot_left < 0.0 || dot_right < 0.0
}

struct Subtree {
    left: PhasePoint,
    right: PhasePoint,
    proposal: PhasePoint,
    log_sum_weight: f64,
    n_leapfrog: usize,
    sum_accept_prob: f64,
    divergent: bool,
    turning: bool,
}

impl Subtree {
    /// The edge a new subtree grows from.
    fn edge(&self, direction: f64) -> &PhasePoint {
        if direction > 0.0 { &self.right } else { &self.left }
    }

    fn set_edge(&mut self, direction: f64, point: PhasePoint) {
        if direction > 0.0 {
            self.right = point;
        } else {
            self.left = point;
        }
    }
}

/// Settings shared by every node of one trajectory.
struct Trajectory<'t, T: LogDensity + ?Sized> {
    target: &'t T,
    eps: f64,
    inv_mass: &'t [f64],
    h0: f64,
}

impl<T: LogDensity + ?Sized> Trajectory<'_, T> {
    fn leaf(&self, edge: &PhasePoint, direction: f64) -> Subtree {
        let mut point = edge.clone();
        leapfrog(self.target, &mut point, direction * self.eps, self.inv_mass);
        let h = point.hamiltonian(self.inv_mass);
        let energy_error = h - self.h0;
        let (log_weight, accept_prob, divergent) = if energy_error.is_nan() || !point.is_finite() {
            (f64::NEG_INFINITY, 0.0, true)
        } else {
            (
                -energy_error,
                (-energy_error).exp().min(1.0),
                energy_error > DIVERGENCE_THRESHOLD,
            )
        };
        Subtree {
            left: point.clone(),
            right: point.clone(),
            proposal: point,
            log_sum_weight: log_weight,
            n_leapfrog: 1,
            sum_accept_prob: accept_prob,
            divergent,
            turning: false,
        }
    }

    /// Build a balanced subtree of `2^depth` leapfrog steps from `edge`.
    fn build(&self, edge: &PhasePoint, depth: usize, direction: f64, rng: &mut ChainRng) -> Subtree {
        if depth == 0 {
            return self.leaf(edge, direction);
        }

        let mut inner = self.build(edge, depth - 1, direction, rng);
        if inner.divergent || inner.turning {
            return inner;
        }

        let outer_edge = inner.edge(direction).clone();
        let outer = self.build(&outer_edge, depth - 1, direction, rng);
        inner.n_leapfrog += outer.n_leapfrog;
        inner.sum_accept_prob += outer.sum_accept_prob;
        if outer.divergent || outer.turning {
            inner.divergent |= outer.divergent;
            inner.turning |= outer.turning;
            return inner;
        }

        let Subtree {
            left,
            right,
            proposal,
            log_sum_weight: outer_weight,
            ..
        } = outer;
        let log_sum_weight = log_sum_exp(inner.log_sum_weight, outer_weight);
        if rng.sample_unif() < (outer_weight - log_sum_weight).exp() {
            inner.proposal = proposal;
        }
        inner.log_sum_weight = log_sum_weight;
        inner.set_edge(direction, if direction > 0.0 { right } else { left });
        inner.turning = is_turning(&inner.left, &inner.right, self.inv_mass);
        inner
    }
}

/// Outcome of one transition.
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub(crate) point: PhasePoint,
    /// Mean Metropolis acceptance statistic over the trajectory.
    pub(crate) accept_prob: f64,
    pub(crate) divergent: bool,
    pub(crate) depth: usize,
    pub(crate) n_leapfrog: usize,
}

/// Run one NUTS transition from `current`.
pub(crate) fn transition<T: LogDensity + ?Sized>(
    target: &T,
    current: &PhasePoint,
    eps: f64,
    inv_mass: &[f64],
    max_depth: usize,
    rng: &mut ChainRng,
) -> Transition {
    let mut start = current.clone();
    start.resample_momentum(inv_mass, rng);
    let trajectory = Trajectory {
        target,
        eps,
        inv_mass,
        h0: start.hamiltonian(inv_mass),
    };

    let mut tree = Subtree {
        left: start.clone(),
        right: start.clone(),
        proposal: start,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        sum_accept_prob: 0.0,
        divergent: false,
        turning: false,
    };

    let mut depth = 0;
    while depth < max_depth {
        let direction = rng.sample_direction();
        let edge = tree.edge(direction).clone();
        let subtree = trajectory.build(&edge, depth, direction, rng);
        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        depth += 1;

        if subtree.divergent {
            tree.divergent = true;
            break;
        }
        if subtree.turning {
            break;
        }

        let Subtree {
            left,
            right,
            proposal,
            log_sum_weight,
            ..
        } = subtree;
        // biased progressive sampling favours the newer subtree
        if rng.sample_unif() < (log_sum_weight - tree.log_sum_weight).exp() {
            tree.proposal = proposal;
        }
        tree.log_sum_weight = log_sum_exp(tree.log_sum_weight, log_sum_weight);
        tree.set_edge(direction, if direction > 0.0 { right } else { left });

        if is_turning(&tree.left, &tree.right, inv_mass) {
            break;
        }
    }

    Transition {
        point: tree.proposal,
        accept_prob: tree.sum_accept_prob / tree.n_leapfrog.max(1) as f64,
        divergent: tree.divergent,
        depth,
        n_leapfrog: tree.n_leapfrog,
    }
}

/// Heuristic initial step size: double or halve until a single leapfrog step has an acceptance
/// ratio that crosses 1/2.
pub(crate) fn find_reasonable_step_size<T: LogDensity + ?Sized>(
    target: &T,
    current: &PhasePoint,
    inv_mass: &[f64],
    rng: &mut ChainRng,
) -> f64 {
    let mut eps: f64 = 1.0;
    let mut start = current.clone();
    start.resample_momentum(inv_mass, rng);
    let h0 = start.hamiltonian(inv_mass);

    let log_ratio = |eps: f64| {
        let mut point = start.clone();
        leapfrog(target, &mut point, eps, inv_mass);
        let delta = h0 - point.hamiltonian(inv_mass);
        if delta.is_nan() { f64::NEG_INFINITY } else { delta }
    };

    let direction = if log_ratio(eps) > 0.5f64.ln() { 1.0 } else { -1.0 };
    for _ in 0..100 {
        let next = eps * 2f64.powf(direction);
        if !(1e-10..=1e3).contains(&next) {
            break;
        }
        let crossed = if direction > 0.0 {
            log_ratio(next) <= 0.5f64.ln()
        } else {
            log_ratio(next) > 0.5f64.ln()
        };
        eps = next;
        if crossed {
            break;
        }
    }
    eps
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Independent normals with the given standard deviations.
    struct Gaussian {
        sd: Vec<f64>,
    }

    impl LogDensity for Gaussian {
        fn dim(&self) -> usize {
            self.sd.len()
        }

        fn log_density_and_gradient(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            let mut logp = 0.0;
            for i in 0..q.len() {
                let z = q[i] / self.sd[i];
                logp -= 0.5 * z * z;
                grad[i] = -q[i] / (self.sd[i] * self.sd[i]);
            }
            logp
        }
    }

    #[test]
    fn leapfrog_conserves_energy_for_small_steps() {
        let target = Gaussian { sd: vec![1.0, 2.0] };
        let inv_mass = [1.0, 1.0];
        let mut point = PhasePoint::new(&target, vec![0.5, -1.0]);
        point.p = vec![0.3, 0.7];
        let h0 = point.hamiltonian(&inv_mass);
        for _ in 0..100 {
            leapfrog(&target, &mut point, 0.01, &inv_mass);
        }
        assert_relative_eq!(point.hamiltonian(&inv_mass), h0, epsilon = 1e-4);
    }

    #[test]
    fn transitions_recover_gaussian_moments() {
        let target = Gaussian { sd: vec![1.0, 3.0] };
        let inv_mass = [1.0, 9.0];
        let mut rng = ChainRng::new(11, 0);
        let mut point = PhasePoint::new(&target, vec![0.0, 0.0]);
        let eps = find_reasonable_step_size(&target, &point, &inv_mass, &mut rng);
        assert!(eps > 0.0 && eps.is_finite());

        let n = 4000;
        let (mut sum, mut sum_sq) = ([0.0; 2], [0.0; 2]);
        for _ in 0..n {
            let t = transition(&target, &point, eps.min(0.9), &inv_mass, 10, &mut rng);
            assert!(!t.divergent);
            point = t.point;
            for i in 0..2 {
                sum[i] += point.q[i];
                sum_sq[i] += point.q[i] * point.q[i];
            }
        }
        for (i, sd) in [1.0, 3.0].into_iter().enumerate() {
            let mean = sum[i] / n as f64;
            let var = sum_sq[i] / n as f64 - mean * mean;
            assert!(mean.abs() < 0.2 * sd, "mean[{i}] = {mean}");
            assert!((var.sqrt() - sd).abs() < 0.15 * sd, "sd[{i}] = {}", var.sqrt());
        }
    }

    #[test]
    fn huge_step_is_flagged_divergent() {
        let target = Gaussian { sd: vec![0.01] };
        let mut rng = ChainRng::new(5, 0);
        let point = PhasePoint::new(&target, vec![0.01]);
        let t = transition(&target, &point, 50.0, &[1.0], 10, &mut rng);
        assert!(t.divergent);
        assert_eq!(t.point.q, point.q);
    }
}
