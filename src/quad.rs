//! Gauss-Legendre quadrature nodes and weights.
//!
//! The occultation and reflected-light solution vectors integrate smooth
//! polynomial-in-(x, y, z) integrands over circular and lune-shaped regions.
//! After splitting at the exact geometric boundaries those integrands are
//! analytic, so fixed-order Gauss-Legendre rules converge rapidly.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

/// Default rule order used by the solution-vector integrals.
pub const DEFAULT_ORDER: usize = 48;

static RULE_CACHE: Lazy<Mutex<HashMap<usize, GaussLegendre>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A Gauss-Legendre rule on the canonical interval [-1, 1].
#[derive(Debug, Clone)]
pub struct GaussLegendre {
    pub nodes: Vec<f64>,
    pub weights: Vec<f64>,
}

impl GaussLegendre {
    /// Computes an `n`-point rule by Newton iteration on the Legendre
    /// polynomial recurrence.
    pub fn new(n: usize) -> Self {
        assert!(n >= 2, "need at least a 2-point rule");
        let mut nodes = vec![0.0; n];
        let mut weights = vec![0.0; n];

        // Roots come in symmetric pairs; solve for the non-negative half.
        let m = n.div_ceil(2);
        for i in 0..m {
            // Chebyshev-based initial guess
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
            let mut dp = 0.0;
            for _ in 0..64 {
                let (p, d) = legendre_with_derivative(n, x);
                dp = d;
                let dx = p / d;
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            let w = 2.0 / ((1.0 - x * x) * dp * dp);
            nodes[i] = -x;
            nodes[n - 1 - i] = x;
            weights[i] = w;
            weights[n - 1 - i] = w;
        }

        GaussLegendre { nodes, weights }
    }

    /// Returns the cached rule of order `n`, computing it on first use.
    pub fn cached(n: usize) -> Self {
        let mut cache = RULE_CACHE.lock().unwrap_or_else(|e| e.into_inner());
        cache.entry(n).or_insert_with(|| GaussLegendre::new(n)).clone()
    }

    /// Integrates `f` over `[a, b]`.
    pub fn integrate<F: FnMut(f64) -> f64>(&self, a: f64, b: f64, mut f: F) -> f64 {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        let mut sum = 0.0;
        for (&x, &w) in self.nodes.iter().zip(&self.weights) {
            sum += w * f(mid + half * x);
        }
        half * sum
    }

    /// Maps the rule onto `[a, b]`, yielding (point, weight) pairs.
    pub fn mapped(&self, a: f64, b: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(move |(&x, &w)| (mid + half * x, half * w))
    }
}

/// Evaluates (P_n(x), P_n'(x)) via the three-term recurrence.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    for k in 2..=n {
        let kf = k as f64;
        let p2 = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = p2;
    }
    let d = n as f64 * (x * p1 - p0) / (x * x - 1.0);
    (p1, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weights_sum_to_interval_length() {
        for n in [2, 8, 32, 48] {
            let rule = GaussLegendre::new(n);
            let total: f64 = rule.weights.iter().sum();
            assert_relative_eq!(total, 2.0, epsilon = 1e-13);
        }
    }

    #[test]
    fn integrates_polynomials_exactly() {
        // An n-point rule is exact through degree 2n - 1.
        let rule = GaussLegendre::new(5);
        let result = rule.integrate(0.0, 1.0, |x| x.powi(9));
        assert_relative_eq!(result, 0.1, epsilon = 1e-13);
    }

    #[test]
    fn integrates_transcendental_to_high_accuracy() {
        let rule = GaussLegendre::new(48);
        let result = rule.integrate(0.0, std::f64::consts::PI, f64::sin);
        assert_relative_eq!(result, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn cached_rule_matches_fresh_rule() {
        let fresh = GaussLegendre::new(16);
        let cached = GaussLegendre::cached(16);
        assert_eq!(fresh.nodes, cached.nodes);
    }
}
