//! Warmup adaptation: dual-averaging step size and a windowed diagonal metric.
//!
//! The schedule follows the usual three-phase layout. A fast initial buffer adapts only the
//! step size, a series of doubling slow windows estimate the posterior variance of every
//! coefficient (the inverse metric), and a fast terminal buffer re-tunes the step size for the
//! final metric.
//!
//! # References
//! - Hoffman, M. D., & Gelman, A. (2014). The No-U-Turn Sampler. *JMLR* 15, 1593–1623.

const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;

/// Nesterov dual averaging of `log(step_size)`.
#[derive(Debug, Clone)]
pub(crate) struct DualAveraging {
    target: f64,
    mu: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    counter: f64,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    pub(crate) fn new(step_size: f64, target: f64) -> Self {
        let mut dual = Self {
            target,
            mu: 0.0,
            log_eps: 0.0,
            log_eps_bar: 0.0,
            h_bar: 0.0,
            counter: 0.0,
        };
        dual.restart(step_size);
        dual
    }

    pub(crate) fn restart(&mut self, step_size: f64) {
        self.mu = (10.0 * step_size).ln();
        self.log_eps = step_size.ln();
        self.log_eps_bar = 0.0;
        self.h_bar = 0.0;
        self.counter = 0.0;
    }

    pub(crate) fn update(&mut self, accept_prob: f64) {
        let accept_prob = if accept_prob.is_finite() { accept_prob.clamp(0.0, 1.0) } else { 0.0 };
        self.counter += 1.0;
        let eta = 1.0 / (self.counter + Self::T0);
        self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.target - accept_prob);
        self.log_eps = self.mu - self.counter.sqrt() / Self::GAMMA * self.h_bar;
        let weight = self.counter.powf(-Self::KAPPA);
        self.log_eps_bar = weight * self.log_eps + (1.0 - weight) * self.log_eps_bar;
    }

    /// Step size to use for the next warmup iteration.
    pub(crate) fn step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Averaged step size, used once warmup ends.
    pub(crate) fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// Welford running mean/variance per coordinate.
#[derive(Debug, Clone)]
struct RunningVariance {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningVariance {
    fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn add(&mut self, q: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(q) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Sample variance shrunk towards 1e-3, as a diagonal inverse metric.
    fn regularized(&self) -> Vec<f64> {
        let n = self.n as f64;
        self.m2
            .iter()
            .map(|&m2| {
                let var = if self.n > 1 { m2 / (n - 1.0) } else { 1.0 };
                (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }

    fn reset(&mut self) {
        self.n = 0;
        self.mean.iter_mut().for_each(|v| *v = 0.0);
        self.m2.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Slow windows `[start, end)` for a warmup of `warmup` iterations.
///
/// Short warmups (under 20 iterations) adapt the step size only. Warmups too short for the
/// default buffers use 15% / 75% / 10% of the iterations for the three phases.
pub(crate) fn slow_windows(warmup: usize) -> Vec<(usize, usize)> {
    if warmup < 20 {
        return Vec::new();
    }
    let (init, term, base) = if INIT_BUFFER + TERM_BUFFER + BASE_WINDOW > warmup {
        let init = (0.15 * warmup as f64) as usize;
        let term = (0.1 * warmup as f64) as usize;
        (init, term, warmup - init - term)
    } else {
        (INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
    };

    let end_slow = warmup - term;
    let mut windows = Vec::new();
    let mut start = init;
    let mut size = base;
    while start < end_slow {
        let mut end = (start + size).min(end_slow);
        // stretch the last window instead of leaving one too short to estimate anything
        if end + 2 * size > end_slow {
            end = end_slow;
        }
        windows.push((start, end));
        start = end;
        size *= 2;
    }
    windows
}

/// Step size and diagonal inverse metric tuned during warmup.
#[derive(Debug, Clone)]
pub(crate) struct WindowedAdaptation {
    dual: DualAveraging,
    variance: RunningVariance,
    inv_mass: Vec<f64>,
    windows: Vec<(usize, usize)>,
}

impl WindowedAdaptation {
    pub(crate) fn new(dim: usize, warmup: usize, target_accept: f64, step_size: f64) -> Self {
        Self {
            dual: DualAveraging::new(step_size, target_accept),
            variance: RunningVariance::new(dim),
            inv_mass: vec![1.0; dim],
            windows: slow_windows(warmup),
        }
    }

    /// Record warmup iteration `iteration`. Returns `true` when a slow window just closed and
    /// the inverse metric changed; the caller should then pick a fresh step size and
    /// [`restart`](Self::restart).
    pub(crate) fn update(&mut self, iteration: usize, q: &[f64], accept_prob: f64) -> bool {
        self.dual.update(accept_prob);
        let Some(&(_, end)) = self
            .windows
            .iter()
            .find(|(start, end)| (*start..*end).contains(&iteration))
        else {
            return false;
        };
        self.variance.add(q);
        if iteration + 1 == end {
            self.inv_mass = self.variance.regularized();
            self.variance.reset();
            return true;
        }
        false
    }

    pub(crate) fn restart(&mut self, step_size: f64) {
        self.dual.restart(step_size);
    }

    pub(crate) fn step_size(&self) -> f64 {
        self.dual.step_size()
    }

    pub(crate) fn final_step_size(&self) -> f64 {
        self.dual.final_step_size()
    }

    pub(crate) fn inv_mass(&self) -> &[f64] {
        &self.inv_mass
    }
}
