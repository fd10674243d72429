//! Solution vectors for occultation and reflected-light integrals.
//!
//! A design-matrix row is an integral of each polynomial basis term over
//! some region of the projected disk: the full disk for phase curves, the
//! disk minus the occultor for occultations, and the illuminated portion
//! for reflected light. The occultor geometry is always reduced to a
//! canonical frame first (occultor center on the `+y` axis at impact
//! parameter `b`), so the integrals here are functions of `b` and the
//! occultor radius alone. Rows are evaluated by piecewise Gauss-Legendre
//! quadrature with panel splits at every geometric transition, with a
//! square-root substitution wherever a panel endpoint touches the limb, so
//! each panel integrand is smooth and the rule converges at full order.

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::basis::{n_terms, phase_row, poly_exponents};
use crate::quad::{GaussLegendre, DEFAULT_ORDER};

/// Occultation solution row in the polynomial basis: the integral of each
/// basis term over the visible (unocculted) part of the unit disk, with
/// the occultor centered at `(0, b)` with radius `ro`.
pub fn occultation_row(deg: usize, b: f64, ro: f64) -> RowDVector<f64> {
    let rt = phase_row(deg);
    if ro <= 0.0 || b >= 1.0 + ro {
        return rt;
    }
    if b + 1.0 <= ro {
        // occultor covers the whole disk
        return RowDVector::zeros(n_terms(deg));
    }
    rt - lens_row(deg, b, ro)
}

/// Integral of each polynomial term over the lens-shaped overlap of the
/// unit disk and the occultor disk at `(0, b)` with radius `ro`.
fn lens_row(deg: usize, b: f64, ro: f64) -> RowDVector<f64> {
    let n = n_terms(deg);
    let mut out = RowDVector::zeros(n);
    let rule = GaussLegendre::cached(DEFAULT_ORDER);

    // Angular panels about the occultor center, split where the occultor
    // rim crosses the limb and where a ray stops intersecting the disk.
    let mut cuts = vec![-std::f64::consts::FRAC_PI_2, 3.0 * std::f64::consts::FRAC_PI_2];
    let s = (1.0 - b * b - ro * ro) / (2.0 * b * ro);
    if s.abs() <= 1.0 {
        let psi = s.asin();
        cuts.push(psi);
        cuts.push(std::f64::consts::PI - psi);
    }
    if b > 1.0 {
        let psi = (1.0 / b).acos();
        for v in [psi, -psi, std::f64::consts::PI - psi, std::f64::consts::PI + psi] {
            if v > cuts[0] && v < cuts[1] {
                cuts.push(v);
            }
        }
    }
    cuts.sort_by(|p, q| p.total_cmp(q));
    cuts.dedup_by(|p, q| (*p - *q).abs() < 1e-14);

    let mut term = vec![0.0; n];
    for pair in cuts.windows(2) {
        for (psi, wpsi) in rule.mapped(pair[0], pair[1]) {
            let (sp, cp) = psi.sin_cos();
            let disc = 1.0 - b * b * cp * cp;
            if disc <= 0.0 {
                continue;
            }
            let root = disc.sqrt();
            let lo_root = -b * sp - root;
            let hi_root = -b * sp + root;
            let lo = lo_root.max(0.0);
            let hi = hi_root.min(ro);
            if hi <= lo {
                continue;
            }
            // endpoints on the limb carry a sqrt singularity in z
            let sing_lo = lo_root > 0.0;
            let sing_hi = hi_root < ro;
            for v in term.iter_mut() {
                *v = 0.0;
            }
            radial_terms(b, cp, sp, lo, hi, sing_lo, sing_hi, &rule, &mut term);
            for (acc, v) in out.iter_mut().zip(&term) {
                *acc += wpsi * v;
            }
        }
    }
    out
}

/// Accumulates `∫ ρ x^i y^j z^k dρ` over `[lo, hi]` for every basis term,
/// substituting `ρ = end ∓ u²` at limb endpoints to remove the `sqrt`
/// singularity in `z`.
#[allow(clippy::too_many_arguments)]
fn radial_terms(
    b: f64,
    cp: f64,
    sp: f64,
    lo: f64,
    hi: f64,
    sing_lo: bool,
    sing_hi: bool,
    rule: &GaussLegendre,
    out: &mut [f64],
) {
    if sing_lo && sing_hi {
        let mid = 0.5 * (lo + hi);
        radial_terms(b, cp, sp, lo, mid, true, false, rule, out);
        radial_terms(b, cp, sp, mid, hi, false, true, rule, out);
        return;
    }
    if sing_hi {
        let umax = (hi - lo).sqrt();
        for (u, w) in rule.mapped(0.0, umax) {
            accumulate_point(b, cp, sp, hi - u * u, w * 2.0 * u, out);
        }
    } else if sing_lo {
        let umax = (hi - lo).sqrt();
        for (u, w) in rule.mapped(0.0, umax) {
            accumulate_point(b, cp, sp, lo + u * u, w * 2.0 * u, out);
        }
    } else {
        for (rho, w) in rule.mapped(lo, hi) {
            accumulate_point(b, cp, sp, rho, w, out);
        }
    }
}

fn accumulate_point(b: f64, cp: f64, sp: f64, rho: f64, w: f64, out: &mut [f64]) {
    let x = rho * cp;
    let y = b + rho * sp;
    let z = (1.0 - x * x - y * y).max(0.0).sqrt();
    let weight = w * rho;
    for (n, v) in out.iter_mut().enumerate() {
        let (i, j, k) = poly_exponents(n);
        *v += weight * x.powi(i as i32) * y.powi(j as i32) * z.powi(k as i32);
    }
}

/// Reflected-light phase solution row: the integral of each polynomial
/// term weighted by the illumination profile
/// `max(0, sqrt(1 - b²) y - b z)` over the unit disk, where `b` is the
/// terminator parameter. `b = 1` is midnight (all dark), `b = -1` is noon
/// (`I = z`). The distance normalization `(2/3) r²` is applied by the
/// caller.
pub fn reflected_phase_row(deg: usize, bterm: f64) -> RowDVector<f64> {
    let n = n_terms(deg);
    if bterm >= 1.0 {
        return RowDVector::zeros(n);
    }
    let b = bterm.max(-1.0);
    let sb = (1.0 - b * b).max(0.0).sqrt();
    let rule = GaussLegendre::cached(DEFAULT_ORDER);
    let mut out = RowDVector::zeros(n);

    // Dayside in polar coordinates about the disk center. Along a ray at
    // azimuth phi the illumination sqrt(1-b²) r sin(phi) - b sqrt(1-r²)
    // changes sign at most once, at
    // r_t = |b| / sqrt((1-b²) sin²phi + b²). The lit interval per branch:
    //   b <= 0, sin(phi) >= 0: the whole ray [0, 1]
    //   b <= 0, sin(phi) <  0: inside the terminator, [0, r_t]
    //   b >  0, sin(phi) >  0: the crescent beyond it, [r_t, 1]
    //   b >  0, sin(phi) <= 0: dark
    for half in [(0.0, std::f64::consts::PI), (std::f64::consts::PI, 2.0 * std::f64::consts::PI)]
    {
        for (phi, wphi) in rule.mapped(half.0, half.1) {
            let (sphi, cphi) = phi.sin_cos();
            let denom = sb * sb * sphi * sphi + b * b;
            let rt = if denom > 0.0 {
                (b.abs() / denom.sqrt()).min(1.0)
            } else {
                0.0
            };
            let (lo, hi) = if b <= 0.0 {
                if sphi >= 0.0 {
                    (0.0, 1.0)
                } else {
                    (0.0, rt)
                }
            } else if sphi > 0.0 && rt < 1.0 {
                (rt, 1.0)
            } else {
                continue;
            };
            if hi <= lo {
                continue;
            }
            let at_limb = hi > 1.0 - 1e-12;
            let mut body = |r: f64, w: f64| {
                let x = r * cphi;
                let y = r * sphi;
                let z = (1.0 - r * r).max(0.0).sqrt();
                let illum = (sb * y - b * z).max(0.0);
                let weight = wphi * w * r * illum;
                for (nn, v) in out.iter_mut().enumerate() {
                    let (i, j, k) = poly_exponents(nn);
                    *v += weight * x.powi(i as i32) * y.powi(j as i32) * z.powi(k as i32);
                }
            };
            if at_limb {
                // substitute r = 1 - u² to smooth the sqrt kink in z
                let umax = (hi - lo).sqrt();
                for (u, w) in rule.mapped(0.0, umax) {
                    body(hi - u * u, w * 2.0 * u);
                }
            } else {
                for (r, w) in rule.mapped(lo, hi) {
                    body(r, w);
                }
            }
        }
    }
    out
}

/// Converts limb-darkening coefficients `u` (with `u[0] = -1`) to the
/// Agol `c` basis used by the analytic occultation integral.
pub fn get_cl(u: &DVector<f64>) -> DVector<f64> {
    let n = u.len();
    // a_k: expansion of the profile in powers of (1 - mu)
    let mut a = DVector::<f64>::zeros(n);
    for (i, &ui) in u.iter().enumerate() {
        let mut bin = 1.0;
        let mut sign = 1.0;
        for j in 0..=i {
            a[j] -= ui * bin * sign;
            sign = -sign;
            bin *= (i - j) as f64 / (j + 1) as f64;
        }
    }
    let mut c = DVector::<f64>::zeros(n);
    if n >= 3 {
        for j in (2..n).rev() {
            c[j] = a[j] / (j + 2) as f64 + if j + 2 < n { c[j + 2] } else { 0.0 };
        }
    }
    if n >= 2 {
        c[1] = a[1] + if n >= 4 { 3.0 * c[3] } else { 0.0 };
    }
    c[0] = a[0] + if n >= 3 { 2.0 * c[2] } else { 0.0 };
    c
}

/// Flux lost to an occultor for a limb-darkened profile given as a
/// polynomial vector (length `(udeg+1)²`), unnormalized.
pub fn limbdark_occulted_flux(udeg: usize, profile: &[f64], b: f64, ro: f64) -> f64 {
    let lens = lens_row(udeg, b, ro);
    lens.iter().zip(profile).map(|(s, p)| s * p).sum()
}

/// Whether the limb-darkening law `u` corresponds to a nonnegative,
/// monotonically limb-darkened intensity profile. Checks that the profile
/// polynomial `q(x) = -Σ u_n x^n` in `x = 1 - mu` has no roots inside the
/// unit interval and is positive at the center.
pub fn limbdark_is_physical(u: &DVector<f64>) -> bool {
    // q coefficients, constant term first
    let q: Vec<f64> = u.iter().map(|v| -v).collect();
    if q[0] <= 0.0 {
        return false;
    }
    let eval = |x: f64| {
        let mut acc = 0.0;
        for &coef in q.iter().rev() {
            acc = acc * x + coef;
        }
        acc
    };
    if eval(1.0) < 0.0 {
        return false;
    }
    let deg = match q.iter().rposition(|v| v.abs() > 1e-14) {
        Some(d) if d > 0 => d,
        _ => return true,
    };
    // companion matrix of the monic polynomial
    let lead = q[deg];
    let mut comp = DMatrix::<f64>::zeros(deg, deg);
    for i in 1..deg {
        comp[(i, i - 1)] = 1.0;
    }
    for i in 0..deg {
        comp[(i, deg - 1)] = -q[i] / lead;
    }
    let eigs = comp.complex_eigenvalues();
    for e in eigs.iter() {
        if e.im.abs() < 1e-10 && e.re > 1e-10 && e.re < 1.0 - 1e-10 {
            return false;
        }
    }
    true
}

/// Legendre coefficients `b_l` of a Gaussian spot profile
/// `exp(-Δθ² / (2 σ²))` in the cosine of the angular distance from the
/// spot center.
pub fn spot_profile(ydeg: usize, sigma: f64) -> Vec<f64> {
    let rule = GaussLegendre::cached(128);
    let mut coeffs = Vec::with_capacity(ydeg + 1);
    for l in 0..=ydeg {
        let val = rule.integrate(-1.0, 1.0, |c| {
            let dtheta = c.clamp(-1.0, 1.0).acos();
            let profile = (-dtheta * dtheta / (2.0 * sigma * sigma)).exp();
            profile * legendre_p(l, c)
        });
        coeffs.push((2 * l + 1) as f64 / 2.0 * val);
    }
    coeffs
}

fn legendre_p(l: usize, x: f64) -> f64 {
    match l {
        0 => 1.0,
        1 => x,
        _ => {
            let mut pm = 1.0;
            let mut p = x;
            for k in 2..=l {
                let next = ((2 * k - 1) as f64 * x * p - (k - 1) as f64 * pm) / k as f64;
                pm = p;
                p = next;
            }
            p
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn uniform_map_loses_occultor_area() {
        // Small occultor fully inside the disk: the constant term loses
        // exactly π ro².
        let row = occultation_row(2, 0.3, 0.1);
        let rt = phase_row(2);
        assert_relative_eq!(rt[0] - row[0], PI * 0.01, epsilon = 1e-10);
    }

    #[test]
    fn occultation_row_continuous_at_contact() {
        let rt = phase_row(2);
        let row = occultation_row(2, 1.0999999, 0.1);
        for i in 0..9 {
            assert_relative_eq!(row[i], rt[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn occultation_row_vanishes_under_total_cover() {
        let row = occultation_row(2, 0.0, 1.5);
        for i in 0..9 {
            assert_relative_eq!(row[i], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn grazing_occultor_lens_area() {
        // b = 1, ro = 0.5: overlap area of two circles, standard formula
        let row = occultation_row(0, 1.0, 0.5);
        let d: f64 = 1.0;
        let (r1, r2): (f64, f64) = (1.0, 0.5);
        let part1 = r1 * r1 * ((d * d + r1 * r1 - r2 * r2) / (2.0 * d * r1)).acos();
        let part2 = r2 * r2 * ((d * d + r2 * r2 - r1 * r1) / (2.0 * d * r2)).acos();
        let part3 = 0.5
            * ((-d + r1 + r2) * (d + r1 - r2) * (d - r1 + r2) * (d + r1 + r2)).sqrt();
        let lens = part1 + part2 - part3;
        assert_relative_eq!(PI - row[0], lens, epsilon = 1e-5);
    }

    #[test]
    fn occultor_larger_than_disk() {
        // Occultor much larger than the disk, partially covering it.
        // Visible area is the disk minus the overlap.
        let b: f64 = 2.0;
        let ro: f64 = 1.8;
        let row = occultation_row(0, b, ro);
        let (r1, r2) = (1.0_f64, ro);
        let part1 = r1 * r1 * ((b * b + r1 * r1 - r2 * r2) / (2.0 * b * r1)).acos();
        let part2 = r2 * r2 * ((b * b + r2 * r2 - r1 * r1) / (2.0 * b * r2)).acos();
        let part3 = 0.5
            * ((-b + r1 + r2) * (b + r1 - r2) * (b - r1 + r2) * (b + r1 + r2)).sqrt();
        let lens = part1 + part2 - part3;
        assert_relative_eq!(row[0], PI - lens, epsilon = 1e-7);
    }

    #[test]
    fn reflected_row_noon_is_z_weighted() {
        // b = -1: illumination is exactly z, so the constant term
        // integrates to ∫∫ z = 2π/3 and the z term to ∫∫ z² = π/2.
        let row = reflected_phase_row(1, -1.0);
        assert_relative_eq!(row[0], 2.0 * PI / 3.0, epsilon = 1e-9);
        assert_relative_eq!(row[2], PI / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn reflected_row_midnight_is_dark() {
        let row = reflected_phase_row(2, 1.0);
        for i in 0..9 {
            assert_eq!(row[i], 0.0);
        }
    }

    #[test]
    fn reflected_row_quarter_phase() {
        // b = 0: illumination is y on the y > 0 half-disk; the constant
        // term integrates to ∫∫_{y>0} y = 2/3.
        let row = reflected_phase_row(1, 0.0);
        assert_relative_eq!(row[0], 2.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn reflected_row_continuous_in_b() {
        let eps = 1e-7;
        let lo = reflected_phase_row(2, 0.4 - eps);
        let hi = reflected_phase_row(2, 0.4 + eps);
        for i in 0..9 {
            assert_relative_eq!(lo[i], hi[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn cl_conversion_uniform() {
        let u = DVector::from_vec(vec![-1.0]);
        let c = get_cl(&u);
        assert_relative_eq!(c[0], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn cl_conversion_quadratic() {
        // verify total flux π (c0 + 2 c1 / 3) against the direct disk
        // integral of the quadratic profile
        let u = DVector::from_vec(vec![-1.0, 0.1, 0.1]);
        let c = get_cl(&u);
        // direct: ∫ I(mu) dA = 2π ∫0^1 I(mu(r)) r dr with mu = sqrt(1-r²);
        // substitute r = 1 - u² so mu is smooth at the limb
        let rule = GaussLegendre::new(64);
        let direct = rule.integrate(0.0, 1.0, |u: f64| {
            let r = 1.0 - u * u;
            let mu = (1.0 - r * r).max(0.0).sqrt();
            let i = 1.0 - 0.1 * (1.0 - mu) - 0.1 * (1.0 - mu) * (1.0 - mu);
            2.0 * PI * i * r * 2.0 * u
        });
        assert_relative_eq!(PI * (c[0] + 2.0 * c[1] / 3.0), direct, epsilon = 1e-8);
    }

    #[test]
    fn physical_laws() {
        assert!(limbdark_is_physical(&DVector::from_vec(vec![-1.0, 0.3, 0.2])));
        assert!(limbdark_is_physical(&DVector::from_vec(vec![-1.0])));
        // u1 = 2 drives the limb negative
        assert!(!limbdark_is_physical(&DVector::from_vec(vec![-1.0, 2.0])));
    }

    #[test]
    fn spot_profile_limits() {
        // A very wide spot is nearly constant: power concentrates in l=0
        let wide = spot_profile(4, 100.0);
        assert_relative_eq!(wide[0], 1.0, epsilon = 1e-3);
        for b in wide.iter().skip(1) {
            assert!(b.abs() < 1e-2);
        }
        // A narrow spot has slowly decaying coefficients
        let narrow = spot_profile(4, 0.1);
        assert!(narrow[1].abs() > 1e-3);
    }
}
