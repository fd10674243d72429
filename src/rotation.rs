//! Rotation operators on spherical-harmonic coefficient vectors.
//!
//! Maps are stored in a body-fixed frame and rotated into the sky frame at
//! evaluation time. Rotations about the vertical are cheap (each `±m` pair
//! mixes like a sine/cosine pair), while general axis-angle rotations go
//! through the per-degree Wigner matrices built by the Ivanic-Ruedenberg
//! recursion from the Cartesian rotation matrix.
//!
//! The coefficient convention: `y' = R y` describes the map actively
//! rotated by the Cartesian rotation `r`, i.e. the rotated map evaluated
//! at a point equals the original map at the inversely rotated point.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::basis::Basis;
use crate::error::{Error, Result};

use std::f64::consts::FRAC_PI_2;

/// Rotation phase angle, one per output row or a single scalar shared by
/// all rows.
#[derive(Clone, Copy)]
pub enum Phase<'a> {
    Scalar(f64),
    Batched(&'a [f64]),
}

/// Rodrigues rotation matrix for a (not necessarily unit) axis.
pub fn axis_angle(axis: &Vector3<f64>, theta: f64) -> Matrix3<f64> {
    let ax = axis.normalize();
    let (sint, cost) = theta.sin_cos();
    let omc = 1.0 - cost;
    Matrix3::new(
        cost + ax.x * ax.x * omc,
        ax.x * ax.y * omc - ax.z * sint,
        ax.x * ax.z * omc + ax.y * sint,
        ax.y * ax.x * omc + ax.z * sint,
        cost + ax.y * ax.y * omc,
        ax.y * ax.z * omc - ax.x * sint,
        ax.z * ax.x * omc - ax.y * sint,
        ax.z * ax.y * omc + ax.x * sint,
        cost + ax.z * ax.z * omc,
    )
}

/// Per-degree Wigner rotation matrices for the real harmonics, degree 0
/// through `ydeg`, from the Cartesian rotation `r`.
pub fn wigner_blocks(ydeg: usize, r: &Matrix3<f64>) -> Vec<DMatrix<f64>> {
    let mut blocks = Vec::with_capacity(ydeg + 1);
    blocks.push(DMatrix::from_element(1, 1, 1.0));
    if ydeg == 0 {
        return blocks;
    }

    // Degree one in the (Y_{1,-1}, Y_{1,0}, Y_{1,1}) ~ (y, z, x) ordering
    let map = [1usize, 2, 0];
    let mut r1 = DMatrix::<f64>::zeros(3, 3);
    for i in 0..3 {
        for j in 0..3 {
            r1[(i, j)] = r[(map[i], map[j])];
        }
    }
    blocks.push(r1);

    for l in 2..=ydeg {
        let li = l as i64;
        let l1 = li - 1;
        let dim = 2 * l + 1;
        let mut cur = DMatrix::<f64>::zeros(dim, dim);
        let r1 = &blocks[1];
        let prev = &blocks[l - 1];
        let ri = |a: i64, b: i64| r1[((a + 1) as usize, (b + 1) as usize)];
        let pr = |a: i64, b: i64| prev[((a + l1) as usize, (b + l1) as usize)];
        let p = |i: i64, mu: i64, mp: i64| -> f64 {
            if mp == li {
                ri(i, 1) * pr(mu, l1) - ri(i, -1) * pr(mu, -l1)
            } else if mp == -li {
                ri(i, 1) * pr(mu, -l1) + ri(i, -1) * pr(mu, l1)
            } else {
                ri(i, 0) * pr(mu, mp)
            }
        };
        for m in -li..=li {
            let am = m.abs();
            for mp in -li..=li {
                let denom = if mp.abs() < li {
                    ((li + mp) * (li - mp)) as f64
                } else {
                    (2 * li * (2 * li - 1)) as f64
                };
                let cu = (((li + m) * (li - m)) as f64 / denom).sqrt();
                let cv = if m == 0 {
                    -0.5 * (2.0 * ((li - 1) * li) as f64 / denom).sqrt()
                } else {
                    0.5 * (((li + am - 1) * (li + am)) as f64 / denom).sqrt()
                };
                let cw = if m == 0 {
                    0.0
                } else {
                    -0.5 * (((li - am - 1) * (li - am)) as f64 / denom).sqrt()
                };
                let mut val = 0.0;
                if cu != 0.0 {
                    val += cu * p(0, m, mp);
                }
                if cv != 0.0 {
                    let big_v = if m == 0 {
                        p(1, 1, mp) + p(-1, -1, mp)
                    } else if m > 0 {
                        let d1: f64 = if m == 1 { 1.0 } else { 0.0 };
                        p(1, m - 1, mp) * (1.0 + d1).sqrt() - p(-1, -m + 1, mp) * (1.0 - d1)
                    } else {
                        let d1: f64 = if m == -1 { 1.0 } else { 0.0 };
                        p(1, m + 1, mp) * (1.0 - d1) + p(-1, -m - 1, mp) * (1.0 + d1).sqrt()
                    };
                    val += cv * big_v;
                }
                if cw != 0.0 {
                    let big_w = if m > 0 {
                        p(1, m + 1, mp) + p(-1, -m - 1, mp)
                    } else {
                        p(1, m - 1, mp) - p(-1, -m + 1, mp)
                    };
                    val += cw * big_w;
                }
                cur[((m + li) as usize, (mp + li) as usize)] = val;
            }
        }
        blocks.push(cur);
    }
    blocks
}

/// Post-multiplies each row of `m` by the block-diagonal Wigner matrix of
/// the axis-angle rotation. The degree is inferred from the column count.
pub fn dot_r(m: &DMatrix<f64>, axis: &Vector3<f64>, theta: f64) -> DMatrix<f64> {
    let ydeg = degree_of(m.ncols());
    let blocks = wigner_blocks(ydeg, &axis_angle(axis, theta));
    let mut out = DMatrix::<f64>::zeros(m.nrows(), m.ncols());
    for (l, block) in blocks.iter().enumerate() {
        let off = l * l;
        let dim = 2 * l + 1;
        let prod = m.view((0, off), (m.nrows(), dim)) * block;
        out.view_mut((0, off), (m.nrows(), dim)).copy_from(&prod);
    }
    out
}

/// Applies the Wigner rotation to a coefficient column: `y' = R y`.
pub fn rotate_coefficients(y: &DVector<f64>, r: &Matrix3<f64>) -> DVector<f64> {
    let ydeg = degree_of(y.len());
    let blocks = wigner_blocks(ydeg, r);
    let mut out = DVector::<f64>::zeros(y.len());
    for (l, block) in blocks.iter().enumerate() {
        let off = l * l;
        let dim = 2 * l + 1;
        let seg = block * y.view((off, 0), (dim, 1));
        out.view_mut((off, 0), (dim, 1)).copy_from(&seg);
    }
    out
}

/// Rotation of each row about the vertical by its own angle. A `±m` pair
/// of coefficients mixes like a sine/cosine pair, so no Wigner recursion
/// is needed. A single-row `m` broadcasts against the angle vector.
pub fn tensordot_rz(m: &DMatrix<f64>, theta: &[f64]) -> Result<DMatrix<f64>> {
    let broadcast = m.nrows() == 1 && theta.len() > 1;
    if !broadcast && m.nrows() != theta.len() {
        return Err(Error::Dimension(format!(
            "{} rows against {} phase angles",
            m.nrows(),
            theta.len()
        )));
    }
    let ncols = m.ncols();
    let deg = degree_of(ncols);
    let mut out = DMatrix::<f64>::zeros(theta.len(), ncols);
    for (i, &th) in theta.iter().enumerate() {
        let src = if broadcast { 0 } else { i };
        for l in 0..=deg {
            let center = l * l + l;
            out[(i, center)] = m[(src, center)];
            for mm in 1..=l {
                let (s, c) = (mm as f64 * th).sin_cos();
                let plus = m[(src, center + mm)];
                let minus = m[(src, center - mm)];
                out[(i, center + mm)] = plus * c + minus * s;
                out[(i, center - mm)] = -plus * s + minus * c;
            }
        }
    }
    Ok(out)
}

fn degree_of(ncoeff: usize) -> usize {
    (ncoeff as f64).sqrt().round() as usize - 1
}

/// Post-multiplies `m` by the operator taking a body-frame coefficient
/// vector to the sky frame at each phase angle: tilt to the sky frame,
/// spin to the phase, and optionally shear by differential rotation.
pub fn right_project(
    basis: &Basis,
    m: &DMatrix<f64>,
    inc: f64,
    obl: f64,
    theta: Phase,
    alpha: f64,
) -> Result<DMatrix<f64>> {
    if basis.ydeg == 0 {
        return Ok(m.clone());
    }
    let tilt_axis = Vector3::new(-obl.cos(), -obl.sin(), 0.0);
    let mut m = dot_r(m, &tilt_axis, -(FRAC_PI_2 - inc));
    m = dot_r(&m, &Vector3::z(), obl);
    m = dot_r(&m, &Vector3::x(), -FRAC_PI_2);
    m = match theta {
        Phase::Batched(th) => tensordot_rz(&m, th)?,
        Phase::Scalar(th) => dot_r(&m, &Vector3::z(), th),
    };
    m = dot_r(&m, &Vector3::x(), FRAC_PI_2);
    if basis.drorder > 0 {
        let th = match theta {
            Phase::Batched(th) => th,
            Phase::Scalar(_) => return Err(Error::ScalarPhaseDifferentialRotation),
        };
        let wta: Vec<f64> = th.iter().map(|t| -t * alpha).collect();
        m = basis.tensordot_d(&m, &wta);
    }
    Ok(m)
}

/// Pre-multiplies `m` by the sky-frame operator, via
/// `R · M = (Mᵀ · Rᵀ)ᵀ`.
pub fn left_project(
    basis: &Basis,
    m: &DMatrix<f64>,
    inc: f64,
    obl: f64,
    theta: Phase,
    alpha: f64,
) -> Result<DMatrix<f64>> {
    if basis.ydeg == 0 {
        return Ok(m.clone());
    }
    let mut mt = m.transpose();
    if basis.drorder > 0 {
        let th = match theta {
            Phase::Batched(th) => th,
            Phase::Scalar(_) => return Err(Error::ScalarPhaseDifferentialRotation),
        };
        let wta: Vec<f64> = th.iter().map(|t| t * alpha).collect();
        mt = basis.tensordot_d(&mt, &wta);
    }
    mt = dot_r(&mt, &Vector3::x(), -FRAC_PI_2);
    mt = match theta {
        Phase::Batched(th) => {
            let neg: Vec<f64> = th.iter().map(|t| -t).collect();
            tensordot_rz(&mt, &neg)?
        }
        Phase::Scalar(th) => dot_r(&mt, &Vector3::z(), -th),
    };
    mt = dot_r(&mt, &Vector3::x(), FRAC_PI_2);
    mt = dot_r(&mt, &Vector3::z(), -obl);
    let tilt_axis = Vector3::new(-obl.cos(), -obl.sin(), 0.0);
    mt = dot_r(&mt, &tilt_axis, FRAC_PI_2 - inc);
    Ok(mt.transpose())
}

/// Converts latitude/longitude (radians) to body-fixed Cartesian points,
/// with longitude zero at the sub-observer meridian.
pub fn latlon_to_xyz(lat: &[f64], lon: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut xs = Vec::with_capacity(lat.len());
    let mut ys = Vec::with_capacity(lat.len());
    let mut zs = Vec::with_capacity(lat.len());
    for (&la, &lo) in lat.iter().zip(lon) {
        let r = axis_angle(&Vector3::y(), lo) * axis_angle(&Vector3::x(), -la);
        let p = r * Vector3::z();
        xs.push(p.x);
        ys.push(p.y);
        zs.push(p.z);
    }
    (xs, ys, zs)
}
