//! The general spherical-harmonic map operator.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};
use ndarray::Array3;

use crate::basis::{poly_basis_at, Basis};
use crate::error::{Error, Result};
use crate::rotation::{
    axis_angle, latlon_to_xyz, left_project, right_project, rotate_coefficients, tensordot_rz,
    Phase,
};
use crate::solution::{limbdark_is_physical, occultation_row, spot_profile};

use super::{occultation_regime, ortho_grid, rect_grid, MapProjection, OccultationRegime};

/// Operator over maps expanded in real spherical harmonics up to `ydeg`,
/// with optional limb darkening (`udeg`), an optional multiplicative
/// filter (`fdeg`), and optional differential rotation (`drorder`).
pub struct YlmOps {
    pub basis: Arc<Basis>,
    /// Whether a limb-darkening or filter stage is active.
    pub filter: bool,
}

impl YlmOps {
    pub fn new(ydeg: usize, udeg: usize, fdeg: usize, drorder: usize) -> Self {
        let basis = Basis::cached(ydeg, udeg, fdeg, drorder);
        let filter = udeg > 0 || fdeg > 0;
        YlmOps { basis, filter }
    }

    pub fn ydeg(&self) -> usize {
        self.basis.ydeg
    }

    pub fn ncoeff(&self) -> usize {
        self.basis.ny
    }

    /// The design matrix: one row per sample, one column per harmonic
    /// coefficient. Rotation-only samples get the phase-curve row, samples
    /// with an overlapping occultor get the occultation row; no sample
    /// visits both formulas.
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
                "theta has {} samples but occultor track has {}/{}/{}",
                nt,
                xo.len(),
                yo.len(),
                zo.len()
            )));
        }
        let basis = &self.basis;
        let mut x = DMatrix::<f64>::zeros(nt, basis.ny);

        let mut i_rot = Vec::new();
        let mut i_occ = Vec::new();
        for i in 0..nt {
            let b = xo[i].hypot(yo[i]);
            match occultation_regime(b, zo[i], ro) {
                OccultationRegime::NoOcclusion => i_rot.push(i),
                OccultationRegime::Occulted => i_occ.push(i),
            }
        }

        let f_op = if self.filter {
            Some(basis.filter_operator(u, f))
        } else {
            None
        };

        // Rotation rows: the phase-curve integral right-projected to the
        // sky frame at each sample's phase.
        if !i_rot.is_empty() {
            let rta1 = match &f_op {
                Some(fm) => {
                    let filtered = &basis.rt * fm;
                    DMatrix::from_rows(&[(filtered * &basis.a1).row(0).into_owned()])
                }
                None => DMatrix::from_rows(&[basis.rta1.clone()]),
            };
            let th: Vec<f64> = i_rot.iter().map(|&i| theta[i]).collect();
            let rows = right_project(basis, &rta1, inc, obl, Phase::Batched(&th), alpha)?;
            for (k, &i) in i_rot.iter().enumerate() {
                // a degree-zero map projects to the same single row for
                // every phase
                let r = if rows.nrows() == 1 { 0 } else { k };
                x.row_mut(i).copy_from(&rows.row(r));
            }
        }

        // Occultation rows: the visible-region integral, rotated so the
        // occultor lies on the +y axis, imported back into the harmonic
        // basis, then projected like the rotation rows.
        if !i_occ.is_empty() {
            let mut st = DMatrix::<f64>::zeros(i_occ.len(), basis.n);
            for (k, &i) in i_occ.iter().enumerate() {
                let b = xo[i].hypot(yo[i]);
                st.row_mut(k)
                    .copy_from(&occultation_row(basis.deg, b, ro));
            }
            let sta = st * &basis.a1_big;
            let theta_z: Vec<f64> = i_occ.iter().map(|&i| xo[i].atan2(yo[i])).collect();
            let star = tensordot_rz(&sta, &theta_z)?;
            let star = match &f_op {
                Some(fm) => star * (&basis.a1_inv * fm * &basis.a1),
                None => star,
            };
            let th: Vec<f64> = i_occ.iter().map(|&i| theta[i]).collect();
            let rows = right_project(basis, &star, inc, obl, Phase::Batched(&th), alpha)?;
            for (k, &i) in i_occ.iter().enumerate() {
                x.row_mut(i).copy_from(&rows.row(k));
            }
        }

        Ok(x)
    }

    /// Light curve: design matrix dotted into the coefficients, one
    /// column per wavelength channel.
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

    /// Pixelization matrix: evaluates each harmonic at the given surface
    /// points, no filter or illumination applied.
    pub fn pixelization(&self, lat: &[f64], lon: &[f64]) -> DMatrix<f64> {
        let (x, y, z) = latlon_to_xyz(lat, lon);
        let pt = poly_basis_at(self.basis.ydeg, &x, &y, &z);
        pt * &self.basis.a1
    }

    /// Point intensity at body-fixed latitude/longitude.
    pub fn intensity(
        &self,
        lat: &[f64],
        lon: &[f64],
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
    ) -> DMatrix<f64> {
        let (xs, ys, zs) = latlon_to_xyz(lat, lon);
        let pt = poly_basis_at(self.basis.deg, &xs, &ys, &zs);
        let mut a1y = &self.basis.a1 * y;
        if self.filter {
            a1y = self.basis.filter_operator(u, f) * a1y;
        } else {
            a1y = pad_poly(&a1y, self.basis.n);
        }
        pt * a1y
    }

    /// Image cube `(frames, res, res)`. Orthographic projection rotates
    /// the map into the observer frame per frame and applies the filter;
    /// the rectangular projection shows the raw body-fixed map.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        res: usize,
        projection: MapProjection,
        theta: &[f64],
        inc: f64,
        obl: f64,
        y: &DMatrix<f64>,
        u: &DVector<f64>,
        f: &DVector<f64>,
        alpha: f64,
    ) -> Result<Array3<f64>> {
        let nw = y.ncols();
        let spectral = nw > 1;
        let (xs, ys, zs) = match projection {
            MapProjection::Orthographic => ortho_grid(res),
            MapProjection::Rectangular => rect_grid(res),
        };
        let pt = poly_basis_at(self.basis.deg, &xs, &ys, &zs);

        let to_image = |yf: &DMatrix<f64>| -> Result<DMatrix<f64>> {
            let mut a1y = &self.basis.a1 * yf;
            if self.filter && projection == MapProjection::Orthographic {
                a1y = self.basis.filter_operator(u, f) * a1y;
            } else {
                a1y = pad_poly(&a1y, self.basis.n);
            }
            Ok(&pt * a1y)
        };

        if spectral {
            // one frame per wavelength channel, all at the first phase
            let th = vec![theta.first().copied().unwrap_or(0.0); nw];
            let yf = match projection {
                MapProjection::Orthographic => {
                    left_project(&self.basis, y, inc, obl, Phase::Batched(&th), alpha)?
                }
                MapProjection::Rectangular => y.clone(),
            };
            let img = to_image(&yf)?;
            let mut cube = Array3::<f64>::zeros((nw, res, res));
            for frame in 0..nw {
                for (idx, px) in img.column(frame).iter().enumerate() {
                    cube[(frame, idx / res, idx % res)] = *px;
                }
            }
            return Ok(cube);
        }

        let nframes = theta.len().max(1);
        let mut cube = Array3::<f64>::zeros((nframes, res, res));
        for frame in 0..nframes {
            let th = [theta.get(frame).copied().unwrap_or(0.0)];
            let yf = match projection {
                MapProjection::Orthographic => {
                    left_project(&self.basis, y, inc, obl, Phase::Batched(&th), alpha)?
                }
                MapProjection::Rectangular => y.clone(),
            };
            let img = to_image(&yf)?;
            for (idx, px) in img.column(0).iter().enumerate() {
                cube[(frame, idx / res, idx % res)] = *px;
            }
        }
        Ok(cube)
    }

    /// Adds a Gaussian spot to the map, renormalizing so `y[0]` stays 1
    /// and folding the scale change into the returned luminosity.
    #[allow(clippy::too_many_arguments)]
    pub fn add_spot(
        &self,
        y: &DVector<f64>,
        luminosity: f64,
        amp: f64,
        sigma: f64,
        lat: f64,
        lon: f64,
    ) -> (DVector<f64>, f64) {
        let profile = spot_profile(self.basis.ydeg, sigma);
        let mut spot = DVector::<f64>::zeros(self.basis.ny);
        for (l, b) in profile.iter().enumerate() {
            let norm = (4.0 * std::f64::consts::PI / (2 * l + 1) as f64).sqrt();
            spot[l * l + l] = amp * b * norm;
        }
        let r = axis_angle(&Vector3::y(), lon) * axis_angle(&Vector3::x(), -lat);
        let spot = rotate_coefficients(&spot, &r);
        let mut y_new = y + spot;
        let scale = y_new[0];
        let l_new = luminosity * scale;
        y_new /= scale;
        (y_new, l_new)
    }

    /// Global minimum of the surface intensity: `(lat, lon, value)`.
    /// Multi-channel maps are not supported here.
    pub fn minimum(&self, y: &DMatrix<f64>) -> Result<(f64, f64, f64)> {
        if y.ncols() > 1 {
            return Err(Error::SpectralMinimization);
        }
        let yv = y.column(0).into_owned();
        let intensity_at = |lat: f64, lon: f64| -> f64 {
            let p = self.pixelization(&[lat], &[lon]);
            (p * &yv)[(0, 0)]
        };

        // Coarse pass over a Fibonacci lattice, then shrinking local grids
        let k = 512 * (self.basis.ydeg + 1);
        let golden = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut best = (0.0, 0.0, f64::INFINITY);
        for i in 0..k {
            let z = 1.0 - (2 * i + 1) as f64 / k as f64;
            let lat = z.asin();
            let lon = (2.0 * std::f64::consts::PI * (i as f64 / golden).fract())
                .rem_euclid(2.0 * std::f64::consts::PI)
                - std::f64::consts::PI;
            let v = intensity_at(lat, lon);
            if v < best.2 {
                best = (lat, lon, v);
            }
        }
        let mut span = std::f64::consts::PI / (k as f64).sqrt();
        for _ in 0..12 {
            let (clat, clon, _) = best;
            for i in -2i32..=2 {
                for j in -2i32..=2 {
                    let lat = (clat + span * i as f64)
                        .clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2);
                    let lon = clon + span * j as f64;
                    let v = intensity_at(lat, lon);
                    if v < best.2 {
                        best = (lat, lon, v);
                    }
                }
            }
            span *= 0.5;
        }
        Ok(best)
    }

    pub fn limbdark_is_physical(&self, u: &DVector<f64>) -> bool {
        limbdark_is_physical(u)
    }
}

/// Zero-pads polynomial coefficient columns up to `n` rows.
fn pad_poly(m: &DMatrix<f64>, n: usize) -> DMatrix<f64> {
    if m.nrows() == n {
        return m.clone();
    }
    let mut out = DMatrix::<f64>::zeros(n, m.ncols());
    out.view_mut((0, 0), (m.nrows(), m.ncols())).copy_from(m);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn uniform_y(ny: usize) -> DMatrix<f64> {
        let mut y = DMatrix::<f64>::zeros(ny, 1);
        y[(0, 0)] = 1.0;
        y
    }

    #[test]
    fn uniform_map_has_flat_phase_curve() {
        let ops = YlmOps::new(2, 0, 0, 0);
        let theta: Vec<f64> = (0..16).map(|i| i as f64 * 0.4).collect();
        let xo = vec![10.0; 16];
        let yo = vec![0.0; 16];
        let zo = vec![1.0; 16];
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let flux = ops
            .flux(&theta, &xo, &yo, &zo, 0.0, 1.0, 0.2, &uniform_y(9), &u, &f, 0.0)
            .unwrap();
        for v in flux.iter() {
            assert_relative_eq!(*v, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn small_occultor_blocks_its_area() {
        let ops = YlmOps::new(1, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let ro = 0.1;
        let flux = ops
            .flux(
                &[0.0],
                &[0.2],
                &[0.1],
                &[1.0],
                ro,
                std::f64::consts::FRAC_PI_2,
                0.0,
                &uniform_y(4),
                &u,
                &f,
                0.0,
            )
            .unwrap();
        assert_relative_eq!(flux[(0, 0)], 1.0 - ro * ro, epsilon = 1e-8);
    }

    #[test]
    fn flux_is_continuous_across_contact() {
        let ops = YlmOps::new(2, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let y = {
            let mut y = uniform_y(9);
            y[(3, 0)] = 0.2;
            y[(6, 0)] = -0.1;
            y
        };
        let eps = 1e-8;
        let flux = ops
            .flux(
                &[0.3, 0.3],
                &[1.1 - eps, 1.1 + eps],
                &[0.0, 0.0],
                &[1.0, 1.0],
                0.1,
                1.0,
                0.1,
                &y,
                &u,
                &f,
                0.0,
            )
            .unwrap();
        assert_relative_eq!(flux[(0, 0)], flux[(1, 0)], epsilon = 1e-5);
    }

    #[test]
    fn design_matrix_linearity() {
        let ops = YlmOps::new(2, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let theta = [0.3, 1.2];
        let xo = [0.2, 5.0];
        let yo = [0.1, 0.0];
        let zo = [1.0, 1.0];
        let x = ops
            .design_matrix(&theta, &xo, &yo, &zo, 0.25, 1.1, 0.2, &u, &f, 0.0)
            .unwrap();
        let mut ya = DMatrix::<f64>::zeros(9, 1);
        ya[(0, 0)] = 1.0;
        ya[(4, 0)] = 0.3;
        let mut yb = DMatrix::<f64>::zeros(9, 1);
        yb[(0, 0)] = 1.0;
        yb[(7, 0)] = -0.2;
        let fa = ops
            .flux(&theta, &xo, &yo, &zo, 0.25, 1.1, 0.2, &ya, &u, &f, 0.0)
            .unwrap();
        let fb = ops
            .flux(&theta, &xo, &yo, &zo, 0.25, 1.1, 0.2, &yb, &u, &f, 0.0)
            .unwrap();
        let combined = &x * (2.0 * &ya + 3.0 * &yb);
        for i in 0..2 {
            assert_relative_eq!(
                combined[(i, 0)],
                2.0 * fa[(i, 0)] + 3.0 * fb[(i, 0)],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn limb_darkening_preserves_unocculted_flux() {
        let ops = YlmOps::new(2, 2, 0, 0);
        let mut u = Basis::uniform_profile(2);
        u[1] = 0.4;
        u[2] = 0.2;
        let f = Basis::identity_filter(0);
        let y = uniform_y(9);
        let flux = ops
            .flux(&[0.7], &[5.0], &[0.0], &[1.0], 0.0, 1.0, 0.0, &y, &u, &f, 0.0)
            .unwrap();
        assert_relative_eq!(flux[(0, 0)], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn occulted_limb_darkened_flux_drops_more_at_center() {
        // With limb darkening the center of the disk is brighter, so a
        // central occultor removes more flux than an off-center one of
        // the same size.
        let ops = YlmOps::new(1, 2, 0, 0);
        let mut u = Basis::uniform_profile(2);
        u[1] = 0.5;
        let f = Basis::identity_filter(0);
        let y = uniform_y(4);
        let flux = ops
            .flux(
                &[0.0, 0.0],
                &[0.0, 0.7],
                &[0.0, 0.0],
                &[1.0, 1.0],
                0.1,
                1.0,
                0.0,
                &y,
                &u,
                &f,
                0.0,
            )
            .unwrap();
        assert!(flux[(0, 0)] < flux[(1, 0)]);
    }

    #[test]
    fn intensity_of_uniform_map() {
        let ops = YlmOps::new(1, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let i = ops.intensity(&[0.3], &[1.0], &uniform_y(4), &u, &f);
        assert_relative_eq!(i[(0, 0)], 1.0 / PI, epsilon = 1e-12);
    }

    #[test]
    fn spot_darkens_its_center() {
        let ops = YlmOps::new(8, 0, 0, 0);
        let y0 = DVector::from_fn(81, |i, _| if i == 0 { 1.0 } else { 0.0 });
        let (y, l) = ops.add_spot(&y0, 1.0, -0.1, 0.2, 0.5, 1.0);
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-14);
        assert!(l < 1.0);
        let ym = DMatrix::from_column_slice(81, 1, y.as_slice());
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let at_spot = ops.intensity(&[0.5], &[1.0], &ym, &u, &f)[(0, 0)];
        let far_side = ops.intensity(&[-0.5], &[1.0 + PI], &ym, &u, &f)[(0, 0)];
        assert!(at_spot < far_side);
    }

    #[test]
    fn minimum_finds_the_spot() {
        let ops = YlmOps::new(6, 0, 0, 0);
        let y0 = DVector::from_fn(49, |i, _| if i == 0 { 1.0 } else { 0.0 });
        let (y, _) = ops.add_spot(&y0, 1.0, -0.2, 0.3, 0.4, -0.7);
        let ym = DMatrix::from_column_slice(49, 1, y.as_slice());
        let (lat, lon, val) = ops.minimum(&ym).unwrap();
        assert_relative_eq!(lat, 0.4, epsilon = 0.05);
        assert_relative_eq!(lon, -0.7, epsilon = 0.05);
        assert!(val < 1.0 / PI);
    }

    #[test]
    fn minimum_rejects_spectral_maps() {
        let ops = YlmOps::new(1, 0, 0, 0);
        let y = DMatrix::<f64>::zeros(4, 2);
        assert!(matches!(ops.minimum(&y), Err(Error::SpectralMinimization)));
    }

    #[test]
    fn render_rectangular_uniform() {
        let ops = YlmOps::new(1, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let cube = ops
            .render(
                8,
                MapProjection::Rectangular,
                &[0.0],
                1.0,
                0.0,
                &uniform_y(4),
                &u,
                &f,
                0.0,
            )
            .unwrap();
        for v in cube.iter() {
            assert_relative_eq!(*v, 1.0 / PI, epsilon = 1e-12);
        }
    }

    #[test]
    fn render_orthographic_offdisk_nan() {
        let ops = YlmOps::new(1, 0, 0, 0);
        let u = Basis::uniform_profile(0);
        let f = Basis::identity_filter(0);
        let cube = ops
            .render(
                16,
                MapProjection::Orthographic,
                &[0.0],
                1.0,
                0.0,
                &uniform_y(4),
                &u,
                &f,
                0.0,
            )
            .unwrap();
        assert!(cube[(0, 0, 0)].is_nan());
        assert!(cube[(0, 8, 8)].is_finite());
    }
}
