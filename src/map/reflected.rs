//! The reflected-light map operator.
//!
//! Flux is the surface map weighted by the illumination from an external
//! source at sky offset `(xo, yo, zo)` in units of the body radius. The
//! terminator is the great circle whose sky projection has semi-minor
//! axis `b = -zo / |r|`; the illumination rises linearly with height
//! above it and is zero on the night side. Occultations of a body seen in
//! reflected light are not modeled.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use ndarray::Array3;

use crate::basis::{poly_basis_at, Basis};
use crate::error::{Error, Result};
use crate::rotation::{latlon_to_xyz, left_project, right_project, tensordot_rz, Phase};
use crate::solution::reflected_phase_row;

use super::{occultation_regime, ortho_grid, rect_grid, MapProjection, OccultationRegime};

pub struct ReflectedOps {
    pub basis: Arc<Basis>,
}

impl ReflectedOps {
    pub fn new(ydeg: usize, udeg: usize, fdeg: usize, drorder: usize) -> Self {
        ReflectedOps {
            basis: Basis::cached(ydeg, udeg, fdeg, drorder),
        }
    }

    /// The reflected-light design matrix. Any sample where the source
    /// position doubles as an occultor overlapping the disk is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn design_matrix(
        &self,
        theta: &[f64],
        xo: &[f64],
        yo: &[f64],
        zo: &[f64],
        ro: f64,
        inc: f64,
        obl: f64,
        u: &DVector<f64>,
        f: &DVector<f64>,
        alpha: f64,
    ) -> Result<DMatrix<f64>> {
        let nt = theta.len();
        if xo.len() != nt || yo.len() != nt || zo.len() != nt {
            return Err(Error::Dimension(format!(
                "theta has {} samples but source track has {}/{}/{}",
                nt,
                xo.len(),
                yo.len(),
                zo.len()
            )));
        }
        for i in 0..nt {
            let b = xo[i].hypot(yo[i]);
            if occultation_regime(b, zo[i], ro) == OccultationRegime::Occulted {
                return Err(Error::ReflectedOccultation);
            }
        }
        let basis = &self.basis;

        // Illumination-weighted phase integrals in the frame with the
        // source along +y, then rotated to the true source azimuth.
        let mut rt = DMatrix::<f64>::zeros(nt, basis.n);
        let mut r2 = vec![0.0; nt];
        for i in 0..nt {
            r2[i] = xo[i] * xo[i] + yo[i] * yo[i] + zo[i] * zo[i];
            let bterm = -zo[i] / r2[i].sqrt();
            rt.row_mut(i)
                .copy_from(&reflected_phase_row(basis.deg, bterm));
        }
        let rta1 = rt * &basis.a1_big;
        let theta_z: Vec<f64> = (0..nt).map(|i| xo[i].atan2(yo[i])).collect();
        let rta1rz = tensordot_rz(&rta1, &theta_z)?;
        let fm = basis.filter_operator(u, f);
        let rta1rz = rta1rz * (&basis.a1_inv * fm * &basis.a1);
        let mut x = right_project(basis, &rta1rz, inc, obl, Phase::Batched(theta), alpha)?;

        // Inverse-square weighting by the distance to the source; the 2/3
        // makes a uniform unit map at noon give unit flux.
        for i in 0..nt {
            let scale = 1.0 / ((2.0 / 3.0) * r2[i]);
            for v in x.row_mut(i).iter_mut() {
                *v *= scale;
            }
        }
        Ok(x)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn flux(
        &self,
        theta: &[f64],
        xo: &[f64],
        yo: &[f64],
        zo: &[f64],
        ro: f64,
        inc: f64,
        obl: f64,
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
        alpha: f64,
    ) -> Result<DMatrix<f64>> {
        let x = self.design_matrix(theta, xo, yo, zo, ro, inc, obl, u, f, alpha)?;
        Ok(x * y)
    }

    /// Illumination profile at a set of sky-frame points for one source
    /// position, including the night-side clamp and the distance
    /// normalization.
    pub fn illumination(&self, xs: &[f64], ys: &[f64], zs: &[f64], xo: f64, yo: f64, zo: f64) -> Vec<f64> {
        let r2 = xo * xo + yo * yo + zo * zo;
        let b = -zo / r2.sqrt();
        let sr = xo.hypot(yo);
        let (cosw, sinw) = if sr > 0.0 {
            (yo / sr, -xo / sr)
        } else {
            (1.0, 0.0)
        };
        let sb = (1.0 - b * b).max(0.0).sqrt();
        let scale = 1.0 / ((2.0 / 3.0) * r2);
        xs.iter()
            .zip(ys)
            .zip(zs)
            .map(|((&x, &y), &z)| {
                let val = if b >= 1.0 {
                    0.0
                } else if b <= -1.0 {
                    z
                } else {
                    let yrot = -x * sinw + y * cosw;
                    sb * yrot - b * z
                };
                val.max(0.0) * scale
            })
            .collect()
    }

    /// Intensity at body-fixed points, weighted by the illumination. Off
    /// the night side the result is zero; NaN surface points stay NaN.
    #[allow(clippy::too_many_arguments)]
    pub fn intensity(
        &self,
        lat: &[f64],
        lon: &[f64],
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
        xo: f64,
        yo: f64,
        zo: f64,
    ) -> DMatrix<f64> {
        let (xs, ys, zs) = latlon_to_xyz(lat, lon);
        let pt = poly_basis_at(self.basis.deg, &xs, &ys, &zs);
        let fm = self.basis.filter_operator(u, f);
        let a1y = fm * (&self.basis.a1 * y);
        let mut out = pt * a1y;
        let illum = self.illumination(&xs, &ys, &zs, xo, yo, zo);
        for i in 0..out.nrows() {
            for j in 0..out.ncols() {
                let v = out[(i, j)];
                if !v.is_nan() {
                    out[(i, j)] = v * illum[i];
                }
            }
        }
        out
    }

    /// Intensity with no illumination source, i.e. the bare surface map.
    pub fn unweighted_intensity(
        &self,
        lat: &[f64],
        lon: &[f64],
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
    ) -> DMatrix<f64> {
        let (xs, ys, zs) = latlon_to_xyz(lat, lon);
        let pt = poly_basis_at(self.basis.deg, &xs, &ys, &zs);
        let fm = self.basis.filter_operator(u, f);
        pt * (fm * (&self.basis.a1 * y))
    }

    /// Image cube, optionally weighted by the illumination from one
    /// source position per call.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        res: usize,
        projection: MapProjection,
        illuminate: bool,
        theta: &[f64],
        inc: f64,
        obl: f64,
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
        alpha: f64,
        xo: &[f64],
        yo: &[f64],
        zo: &[f64],
    ) -> Result<Array3<f64>> {
        let nframes = theta.len().max(1);
        let (xs, ys, zs) = match projection {
            MapProjection::Orthographic => ortho_grid(res),
            MapProjection::Rectangular => rect_grid(res),
        };
        let pt = poly_basis_at(self.basis.deg, &xs, &ys, &zs);
        let mut cube = Array3::<f64>::zeros((nframes, res, res));
        for frame in 0..nframes {
            let th = [theta.get(frame).copied().unwrap_or(0.0)];
            let yf = match projection {
                MapProjection::Orthographic => {
                    left_project(&self.basis, y, inc, obl, Phase::Batched(&th), alpha)?
                }
                MapProjection::Rectangular => y.clone(),
            };
            let fm = match projection {
                MapProjection::Orthographic => self.basis.filter_operator(u, f),
                MapProjection::Rectangular => self.basis.filter_operator(
                    &Basis::uniform_profile(self.basis.udeg),
                    &Basis::identity_filter(self.basis.fdeg),
                ),
            };
            let img = &pt * (fm * (&self.basis.a1 * yf));
            let illum = if illuminate {
                Some(self.illumination(
                    &xs,
                    &ys,
                    &zs,
                    xo.get(frame).copied().unwrap_or(0.0),
                    yo.get(frame).copied().unwrap_or(0.0),
                    zo.get(frame).copied().unwrap_or(1.0),
                ))
            } else {
                None
            };
            for (idx, px) in img.column(0).iter().enumerate() {
                let mut v = *px;
                if let Some(il) = &illum {
                    if !v.is_nan() {
                        v *= il[idx];
                    }
                }
                cube[(frame, idx / res, idx % res)] = v;
            }
        }
        Ok(cube)
    }
}
