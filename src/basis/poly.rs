//! Polynomial-basis algebra for real spherical harmonics.
//!
//! Surface maps live in three related bases: the real spherical harmonics
//! `Y_{lm}`, indexed `n = l² + l + m`, and the polynomial basis in the
//! sky-frame Cartesian coordinates, whose `n`-th term is `x^i y^j z^k` with
//! `k ∈ {0, 1}` (higher powers of `z` reduce via `z² = 1 - x² - y²`). The
//! routines here build the dense change-of-basis matrix `A1` (harmonics to
//! polynomials) and the limb-darkening matrix `U1` (limb-darkening
//! coefficients to polynomials), along with the polynomial product
//! operations they are assembled from.

use nalgebra::DMatrix;
use std::f64::consts::PI;

/// Number of coefficients for a map of degree `deg`.
pub fn n_terms(deg: usize) -> usize {
    (deg + 1) * (deg + 1)
}

/// Inverse of `n = l² + l + m`: the `(l, m)` pair for a flat index.
pub fn lm(n: usize) -> (usize, i64) {
    let l = (n as f64).sqrt() as usize;
    let l = if (l + 1) * (l + 1) <= n { l + 1 } else { l };
    let m = n as i64 - (l * l + l) as i64;
    (l, m)
}

/// Exponents `(i, j, k)` of the `n`-th polynomial basis term `x^i y^j z^k`.
pub fn poly_exponents(n: usize) -> (u32, u32, u32) {
    let (l, m) = lm(n);
    let mu = (l as i64 - m) as u32;
    let nu = (l as i64 + m) as u32;
    if nu % 2 == 0 {
        (mu / 2, nu / 2, 0)
    } else {
        ((mu - 1) / 2, (nu - 1) / 2, 1)
    }
}

/// Multiplies a polynomial of degree `lmax` by `z`, reducing `z²` terms.
///
/// The input is read through index `(lmax+1)² - 1`; the output has degree
/// `lmax + 1` and must be at least `(lmax+2)²` long.
pub fn polymulz(lmax: usize, p: &[f64], pz: &mut [f64]) {
    for v in pz.iter_mut() {
        *v = 0.0;
    }
    let mut n = 0;
    for l in 0..=lmax {
        for m in -(l as i64)..=(l as i64) {
            let v = p[n];
            n += 1;
            if v == 0.0 {
                continue;
            }
            let lz = l + 1;
            let nz = (lz * lz + lz) as i64 + m;
            if (l as i64 + m) % 2 != 0 {
                // z * (odd term) picks up a z² which reduces to 1 - x² - y²
                pz[(nz - 4 * lz as i64 + 2) as usize] += v;
                pz[(nz - 2) as usize] -= v;
                pz[(nz + 2) as usize] -= v;
            } else {
                pz[nz as usize] += v;
            }
        }
    }
}

/// Product of two polynomials in the reduced basis, truncated at `lmax12`.
pub fn polymul(lmax1: usize, p1: &[f64], lmax2: usize, p2: &[f64], lmax12: usize) -> Vec<f64> {
    let mut out = vec![0.0; n_terms(lmax12)];
    let mut n1 = 0;
    for l1 in 0..=lmax1 {
        for m1 in -(l1 as i64)..=(l1 as i64) {
            let v1 = p1[n1];
            n1 += 1;
            if v1 == 0.0 {
                continue;
            }
            let odd1 = (l1 as i64 + m1) % 2 != 0;
            let mut n2 = 0;
            for l2 in 0..=lmax2 {
                if l1 + l2 > lmax12 {
                    break;
                }
                for m2 in -(l2 as i64)..=(l2 as i64) {
                    let v2 = p2[n2];
                    n2 += 1;
                    if v2 == 0.0 {
                        continue;
                    }
                    let l = l1 + l2;
                    let nn = (l * l + l) as i64 + m1 + m2;
                    let fac = v1 * v2;
                    if odd1 && (l2 as i64 + m2) % 2 != 0 {
                        out[(nn - 4 * l as i64 + 2) as usize] += fac;
                        out[(nn - 2) as usize] -= fac;
                        out[(nn + 2) as usize] -= fac;
                    } else {
                        out[nn as usize] += fac;
                    }
                }
            }
        }
    }
    out
}

/// The `P(z)` (associated-Legendre) part of each harmonic, one column per
/// `Y_{lm}`, rows indexed by polynomial term.
fn legendre_table(lmax: usize) -> DMatrix<f64> {
    let n = n_terms(lmax);
    let mut tab = DMatrix::<f64>::zeros(n, n);
    let mut fac = 1.0;
    let mut term = 1.0;
    for m in 0..=lmax {
        // P_m^m contributes the constant (-1)^m (2m-1)!!
        tab[(0, m * m + 2 * m)] = fac;
        tab[(0, m * m)] = fac;
        for l in (m + 1)..=lmax {
            let ip = l * l + l + m;
            let im = l * l + l - m;
            let prev: Vec<f64> = tab.column((l - 1) * (l - 1) + (l - 1) + m).iter().copied().collect();
            let mut zprev = vec![0.0; n];
            polymulz(l - 1, &prev, &mut zprev);
            let c1 = (2 * l - 1) as f64 / (l - m) as f64;
            for row in 0..n {
                tab[(row, ip)] = c1 * zprev[row];
            }
            if l > m + 1 {
                let c2 = (l + m - 1) as f64 / (l - m) as f64;
                let pp = (l - 2) * (l - 2) + (l - 2) + m;
                for row in 0..n {
                    let sub = c2 * tab[(row, pp)];
                    tab[(row, ip)] -= sub;
                }
            }
            for row in 0..n {
                tab[(row, im)] = tab[(row, ip)];
            }
        }
        fac *= -term;
        term += 2.0;
    }
    tab
}

/// The `θ(x, y)` (azimuthal) part of each harmonic.
fn theta_table(lmax: usize) -> DMatrix<f64> {
    let n = n_terms(lmax);
    let mut tab = DMatrix::<f64>::zeros(n, n);
    for m in 0..=lmax {
        let mf = m as f64;
        let mut term1 = 1.0;
        let mut term2 = mf;
        let mut j = 0;
        while j <= m {
            let jf = j as f64;
            if j > 0 {
                term1 *= -(mf - jf + 1.0) * (mf - jf + 2.0) / (jf * (jf - 1.0));
                term2 *= -(mf - jf) * (mf - jf + 1.0) / (jf * (jf + 1.0));
            }
            let np1 = m * m + 2 * j;
            let np2 = m * m + 2 * (j + 1);
            for l in m..=lmax {
                let n1 = l * l + l + m;
                let n2 = l * l + l - m;
                tab[(np1, n1)] = term1;
                if np2 < n {
                    tab[(np2, n2)] = term2;
                }
            }
            j += 2;
        }
    }
    tab
}

/// Orthonormalization amplitudes, one scalar per harmonic.
fn amp_factors(lmax: usize) -> Vec<f64> {
    let n = n_terms(lmax);
    let mut c = vec![0.0; n];
    for l in 0..=lmax {
        let mut v = (2.0 * (2 * l + 1) as f64).sqrt();
        c[l * l + l] = v;
        for m in 1..=l {
            v = -v / (((l + m) * (l - m + 1)) as f64).sqrt();
            c[l * l + l + m] = v;
            c[l * l + l - m] = v;
        }
        c[l * l + l] *= std::f64::consts::FRAC_1_SQRT_2;
    }
    let scale = 2.0 * PI.sqrt();
    for v in c.iter_mut() {
        *v /= scale;
    }
    c
}

/// Dense change-of-basis matrix `A1`: spherical-harmonic coefficients to
/// polynomial coefficients, scaled by the map normalization `norm`.
pub fn compute_a1(lmax: usize, norm: f64) -> DMatrix<f64> {
    let n = n_terms(lmax);
    let z = legendre_table(lmax);
    let xy = theta_table(lmax);
    let c = amp_factors(lmax);
    let mut a1 = DMatrix::<f64>::zeros(n, n);
    for col in 0..n {
        let pz: Vec<f64> = z.column(col).iter().copied().collect();
        let pxy: Vec<f64> = xy.column(col).iter().copied().collect();
        let prod = polymul(lmax, &pz, lmax, &pxy, lmax);
        let scale = c[col] * norm;
        for row in 0..n {
            a1[(row, col)] = prod[row] * scale;
        }
    }
    a1
}

/// Change of basis from limb-darkening coefficients `u` to polynomial
/// coefficients of the radial intensity profile, `(lmax+1)² x (lmax+1)`.
pub fn compute_u1(lmax: usize, a1: &DMatrix<f64>, norm: f64) -> DMatrix<f64> {
    let nu = lmax + 1;
    let n = n_terms(lmax);

    // L^T: (1 - mu)^l expanded in powers of mu, with the profile sign
    let mut lt = DMatrix::<f64>::zeros(nu, nu);
    for l in 0..=lmax {
        let mut lchoosek = 1.0;
        for k in 0..=l {
            lt[(k, l)] = if (k + 1) % 2 == 0 { lchoosek } else { -lchoosek };
            lchoosek *= (l - k) as f64 / (k + 1) as f64;
        }
    }

    // Y^T: the m = 0 harmonics as polynomials in mu
    let mut yt = DMatrix::<f64>::zeros(nu, nu);
    let mut twol = 1.0;
    let mut lfac = 1.0;
    let mut fac0 = 1.0;
    let mut l = 0;
    while l <= lmax {
        let amp = twol * ((2 * l + 1) as f64 / (4.0 * PI)).sqrt() / lfac;
        let mut lchoosek = 1.0;
        let mut fac = fac0;
        let mut k = 0;
        while k <= l {
            yt[(k, l)] = amp * lchoosek * fac;
            fac *= (k + l + 1) as f64 / (k as f64 - l as f64 + 1.0);
            lchoosek *= ((l - k) as f64 * (l as f64 - k as f64 - 1.0)) / ((k + 1) * (k + 2)) as f64;
            k += 2;
        }
        fac0 *= -0.25 * ((l + 1) * (l + 1)) as f64;
        lfac *= ((l + 1) * (l + 2)) as f64;
        twol *= 4.0;
        l += 2;
    }
    twol = 2.0;
    lfac = 1.0;
    fac0 = 0.5;
    let mut l = 1;
    while l <= lmax {
        let amp = twol * ((2 * l + 1) as f64 / (4.0 * PI)).sqrt() / lfac;
        let mut lchoosek = l as f64;
        let mut fac = fac0;
        let mut k = 1;
        while k <= l {
            yt[(k, l)] = amp * lchoosek * fac;
            fac *= (k + l + 1) as f64 / (k as f64 - l as f64 + 1.0);
            lchoosek *= ((l - k) as f64 * (l as f64 - k as f64 - 1.0)) / ((k + 1) * (k + 2)) as f64;
            k += 2;
        }
        fac0 *= -0.25 * ((l + 2) * l) as f64;
        lfac *= ((l + 1) * (l + 2)) as f64;
        twol *= 4.0;
        l += 2;
    }

    // Y^T is upper triangular with nonzero diagonal; back-substitute
    // Y^T U0 = L^T column by column, then undo the map normalization.
    let mut u0 = DMatrix::<f64>::zeros(nu, nu);
    for col in 0..nu {
        for row in (0..nu).rev() {
            let mut rhs = lt[(row, col)];
            for k in (row + 1)..nu {
                rhs -= yt[(row, k)] * u0[(k, col)];
            }
            u0[(row, col)] = rhs / yt[(row, row)];
        }
    }
    u0 /= norm;

    // Scatter the m = 0 harmonic rows and change basis to polynomials
    let mut x = DMatrix::<f64>::zeros(n, nu);
    for l in 0..=lmax {
        x[(l * l + l, l)] = 1.0;
    }
    a1 * (x * u0)
}
