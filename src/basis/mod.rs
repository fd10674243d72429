//! Precomputed change-of-basis matrices for a fixed set of map degrees.
//!
//! Everything downstream of a surface map works in one of two bases: real
//! spherical harmonics for rotation, and the reduced `x^i y^j z^k`
//! polynomial basis for evaluation and integration over the visible disk.
//! A [`Basis`] bundles the dense matrices connecting the two at every
//! degree a map operator needs, plus the phase-curve integrals of the
//! polynomial terms. Construction cost grows steeply with degree, so
//! instances are memoized per `(ydeg, udeg, fdeg, drorder)` and shared
//! read-only.

pub mod poly;

use nalgebra::{DMatrix, DVector, RowDVector, Vector3};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

pub use poly::{lm, n_terms, poly_exponents, polymul};

/// Normalization applied to the harmonic-to-polynomial change of basis so
/// that a unit `Y00` map has unit luminosity.
pub const MAP_NORM: f64 = 2.0 / 1.772_453_850_905_516; // 2 / sqrt(π)

fn sqrt_pi() -> f64 {
    PI.sqrt()
}

/// Support grid used to fit the differential-rotation shear operator.
struct ShearGrid {
    /// Unit directions on the sphere.
    points: Vec<Vector3<f64>>,
    /// Pseudo-inverse of the harmonic design matrix on the grid, `Ny x K`.
    pinv: DMatrix<f64>,
}

/// Change-of-basis matrices and solution rows for one degree configuration.
pub struct Basis {
    pub ydeg: usize,
    pub udeg: usize,
    pub fdeg: usize,
    pub drorder: usize,
    /// Total degree `ydeg + udeg + fdeg`.
    pub deg: usize,
    /// Number of spherical-harmonic coefficients, `(ydeg+1)²`.
    pub ny: usize,
    /// Number of polynomial terms at the total degree, `(deg+1)²`.
    pub n: usize,
    /// Harmonics to polynomials at degree `ydeg`, `Ny x Ny`.
    pub a1: DMatrix<f64>,
    /// Harmonics to polynomials at the total degree, `N x N`.
    pub a1_big: DMatrix<f64>,
    /// Inverse of `a1_big`, polynomials back to harmonics.
    pub a1_inv: DMatrix<f64>,
    /// Harmonics to polynomials at the filter degree, `Nf x Nf`.
    pub a1_f: DMatrix<f64>,
    /// Limb-darkening coefficients to profile polynomial,
    /// `(udeg+1)² x (udeg+1)`.
    pub u1: DMatrix<f64>,
    /// Disk integrals of the polynomial terms at the total degree, `1 x N`.
    pub rt: RowDVector<f64>,
    /// Phase-curve row in the harmonic basis, `rt · a1_big` truncated to
    /// the first `Ny` entries.
    pub rta1: RowDVector<f64>,
    shear: Option<ShearGrid>,
}

impl Basis {
    pub fn new(ydeg: usize, udeg: usize, fdeg: usize, drorder: usize) -> Self {
        let deg = ydeg + udeg + fdeg;
        let ny = n_terms(ydeg);
        let n = n_terms(deg);
        let a1_big = poly::compute_a1(deg, MAP_NORM);
        let a1_inv = a1_big
            .clone()
            .lu()
            .try_inverse()
            .expect("change-of-basis matrix is invertible by construction");
        let a1 = a1_big.view((0, 0), (ny, ny)).into_owned();
        let nf = n_terms(fdeg);
        let a1_f = a1_big.view((0, 0), (nf, nf)).into_owned();
        let u1_full = poly::compute_u1(deg, &a1_big, MAP_NORM);
        let u1 = u1_full.view((0, 0), (n_terms(udeg), udeg + 1)).into_owned();
        let rt = phase_row(deg);
        let full = &rt * &a1_big;
        let rta1 = RowDVector::from_iterator(ny, full.iter().take(ny).copied());
        let shear = if drorder > 0 {
            Some(ShearGrid::new(ydeg, &a1))
        } else {
            None
        };
        log::info!(
            "built basis matrices for ydeg={} udeg={} fdeg={} drorder={}",
            ydeg,
            udeg,
            fdeg,
            drorder
        );
        Basis {
            ydeg,
            udeg,
            fdeg,
            drorder,
            deg,
            ny,
            n,
            a1,
            a1_big,
            a1_inv,
            a1_f,
            u1,
            rt,
            rta1,
            shear,
        }
    }

    /// Fetches (building on first use) the shared basis for a degree
    /// configuration.
    pub fn cached(ydeg: usize, udeg: usize, fdeg: usize, drorder: usize) -> Arc<Basis> {
        static CACHE: Lazy<Mutex<HashMap<(usize, usize, usize, usize), Arc<Basis>>>> =
            Lazy::new(|| Mutex::new(HashMap::new()));
        let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry((ydeg, udeg, fdeg, drorder))
            .or_insert_with(|| Arc::new(Basis::new(ydeg, udeg, fdeg, drorder)))
            .clone()
    }

    /// Evaluates the polynomial basis at a set of surface points, one row
    /// per point, `npts x (deg+1)²`.
    pub fn poly_basis(&self, x: &[f64], y: &[f64], z: &[f64]) -> DMatrix<f64> {
        poly_basis_at(self.deg, x, y, z)
    }

    /// The filter operator `F(u, f)` on the polynomial basis: multiplies a
    /// degree-`ydeg` polynomial by the combined limb-darkening and filter
    /// polynomial, lifting it to the total degree. `N x Ny`.
    pub fn filter_operator(&self, u: &DVector<f64>, f: &DVector<f64>) -> DMatrix<f64> {
        // Normalize the limb-darkening profile so it conserves total flux
        let mut pu = &self.u1 * u;
        let mut disk = 0.0;
        for (i, v) in pu.iter().enumerate() {
            disk += self.rt[i] * v;
        }
        pu *= PI / disk;
        let pf = &self.a1_f * f;
        let pu: Vec<f64> = pu.iter().copied().collect();
        let pf: Vec<f64> = pf.iter().copied().collect();
        let pfilter = polymul(self.udeg, &pu, self.fdeg, &pf, self.udeg + self.fdeg);
        let mut out = DMatrix::<f64>::zeros(self.n, self.ny);
        let mut unit = vec![0.0; self.ny];
        for col in 0..self.ny {
            unit[col] = 1.0;
            let prod = polymul(self.udeg + self.fdeg, &pfilter, self.ydeg, &unit, self.deg);
            for row in 0..self.n {
                out[(row, col)] = prod[row];
            }
            unit[col] = 0.0;
        }
        out
    }

    /// The identity filter vector: `F(u0, f0)` with `u0 = [-1, 0, ...]`
    /// and `f0 = [π, 0, ...]` is a no-op.
    pub fn identity_filter(fdeg: usize) -> DVector<f64> {
        let mut f = DVector::zeros(n_terms(fdeg));
        f[0] = PI;
        f
    }

    /// The limb-darkening vector describing a uniform profile.
    pub fn uniform_profile(udeg: usize) -> DVector<f64> {
        let mut u = DVector::zeros(udeg + 1);
        u[0] = -1.0;
        u
    }

    /// Applies the differential-rotation shear to each row of `m` for the
    /// matching entry of `wta`. Row `i` of the result is row `i` of `m`
    /// composed with the operator that advances the point at height `z`
    /// about the spin axis by `wta[i] * z²`.
    pub fn tensordot_d(&self, m: &DMatrix<f64>, wta: &[f64]) -> DMatrix<f64> {
        let grid = match &self.shear {
            Some(g) => g,
            // drorder == 0 means no shear was requested
            None => return m.clone(),
        };
        let mut out = DMatrix::<f64>::zeros(m.nrows(), m.ncols());
        for (i, &w) in wta.iter().enumerate() {
            let d = grid.operator(self.ydeg, &self.a1, w);
            let row = m.row(i) * d;
            out.row_mut(i).copy_from(&row);
        }
        out
    }
}

impl ShearGrid {
    fn new(ydeg: usize, a1: &DMatrix<f64>) -> Self {
        let ny = n_terms(ydeg);
        let k = (4 * ny).max(256);
        // Fibonacci lattice: near-uniform coverage of the sphere
        let golden = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut points = Vec::with_capacity(k);
        for i in 0..k {
            let z = 1.0 - (2 * i + 1) as f64 / k as f64;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = 2.0 * PI * (i as f64 / golden).fract();
            points.push(Vector3::new(r * phi.cos(), r * phi.sin(), z));
        }
        let b = harmonic_design(ydeg, a1, &points);
        let btb = b.transpose() * &b;
        let pinv = btb
            .lu()
            .try_inverse()
            .expect("shear grid normal matrix is full rank")
            * b.transpose();
        ShearGrid { points, pinv }
    }

    /// Least-squares fit of the sheared map back onto degree-`ydeg`
    /// harmonics, `Ny x Ny`.
    fn operator(&self, ydeg: usize, a1: &DMatrix<f64>, w: f64) -> DMatrix<f64> {
        let sheared: Vec<Vector3<f64>> = self
            .points
            .iter()
            .map(|p| {
                let angle = w * p.z * p.z;
                let (s, c) = angle.sin_cos();
                Vector3::new(c * p.x - s * p.y, s * p.x + c * p.y, p.z)
            })
            .collect();
        let bw = harmonic_design(ydeg, a1, &sheared);
        &self.pinv * bw
    }
}

/// Rows of spherical-harmonic values at a set of unit directions.
fn harmonic_design(ydeg: usize, a1: &DMatrix<f64>, points: &[Vector3<f64>]) -> DMatrix<f64> {
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
    poly_basis_at(ydeg, &xs, &ys, &zs) * a1
}

/// Evaluates the polynomial basis at each point, `npts x (deg+1)²`.
pub fn poly_basis_at(deg: usize, x: &[f64], y: &[f64], z: &[f64]) -> DMatrix<f64> {
    let n = n_terms(deg);
    let mut out = DMatrix::<f64>::zeros(x.len(), n);
    for j in 0..x.len() {
        for col in 0..n {
            let (i, jj, k) = poly_exponents(col);
            out[(j, col)] = x[j].powi(i as i32) * y[j].powi(jj as i32) * z[j].powi(k as i32);
        }
    }
    out
}

/// Disk integrals `∫∫ x^i y^j z^k dx dy` over the unit disk for every
/// polynomial term, row vector of length `(deg+1)²`.
pub fn phase_row(deg: usize) -> RowDVector<f64> {
    // In polar coordinates the integral separates into an angular moment
    // of cos^i sin^j and a radial Beta integral, giving
    //   Γ(i/2 + 1/2) Γ(j/2 + 1/2) Γ(k/2 + 1) / Γ((i + j + k)/2 + 2)
    // for even i, j and zero otherwise.
    let n = n_terms(deg);
    let mut rt = RowDVector::zeros(n);
    for col in 0..n {
        let (i, j, k) = poly_exponents(col);
        if i % 2 != 0 || j % 2 != 0 {
            continue;
        }
        let a = i / 2;
        let b = j / 2;
        rt[col] = if k == 0 {
            gamma_half(a) * gamma_half(b) / factorial(a + b + 1)
        } else {
            gamma_half(a) * gamma_half(b) * (sqrt_pi() / 2.0) / gamma_half(a + b + 2)
        };
    }
    rt
}

// gamma(q + 1/2), integer q
fn gamma_half(q: u32) -> f64 {
    let mut v = sqrt_pi();
    for i in 0..q {
        v *= i as f64 + 0.5;
    }
    v
}

fn factorial(q: u32) -> f64 {
    let mut v = 1.0;
    for i in 2..=q {
        v *= i as f64;
    }
    v
}
