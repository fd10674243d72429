//! The purely limb-darkened map operator.
//!
//! The only surface freedom is a 1-D radial intensity law, so the design
//! matrix collapses to a single column: the light curve itself.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use ndarray::Array3;

use crate::basis::Basis;
use crate::error::Result;
use crate::solution::{get_cl, limbdark_is_physical, limbdark_occulted_flux};

use super::{occultation_regime, OccultationRegime};

pub struct LimbDarkenedOps {
    basis: Arc<Basis>,
    udeg: usize,
}

impl LimbDarkenedOps {
    pub fn new(udeg: usize) -> Self {
        LimbDarkenedOps {
            basis: Basis::cached(0, udeg, 0, 0),
            udeg,
        }
    }

    /// Light curve, normalized so the unocculted flux is exactly 1.
    pub fn flux(
        &self,
        xo: &[f64],
        yo: &[f64],
        zo: &[f64],
        ro: f64,
        u: &DVector<f64>,
    ) -> DVector<f64> {
        let c = get_cl(u);
        let norm = if self.udeg == 0 {
            std::f64::consts::PI * c[0]
        } else {
            std::f64::consts::PI * (c[0] + 2.0 * c[1] / 3.0)
        };
        // profile polynomial over the disk
        let profile: Vec<f64> = (&self.basis.u1 * u).iter().copied().collect();

        let mut flux = DVector::from_element(xo.len(), 1.0);
        for i in 0..xo.len() {
            let b = xo[i].hypot(yo[i]);
            if occultation_regime(b, zo[i], ro) == OccultationRegime::Occulted {
                let lost = limbdark_occulted_flux(self.udeg, &profile, b, ro);
                flux[i] = 1.0 - lost / norm;
            }
        }
        flux
    }

    /// Radial intensity profile `I(mu)`, unnormalized.
    pub fn intensity(&self, mu: &[f64], u: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(mu.len());
        for (i, &m) in mu.iter().enumerate() {
            let x = 1.0 - m;
            let mut pow = 1.0;
            let mut acc = 0.0;
            for &un in u.iter() {
                acc -= un * pow;
                pow *= x;
            }
            out[i] = acc;
        }
        out
    }

    /// Design matrix for system assembly: a single column holding the
    /// flux, since the coefficient vector of a limb-darkened map is `[1]`.
    pub fn design_matrix(
        &self,
        xo: &[f64],
        yo: &[f64],
        zo: &[f64],
        ro: f64,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        let flux = self.flux(xo, yo, zo, ro, u);
        Ok(DMatrix::from_column_slice(flux.len(), 1, flux.as_slice()))
    }

    /// Image cube: the same radial profile in every frame. Pixels off the
    /// disk are NaN.
    pub fn render(&self, res: usize, nframes: usize, u: &DVector<f64>) -> Array3<f64> {
        let step = 2.0 / res as f64;
        let mut img = Array3::<f64>::zeros((nframes.max(1), res, res));
        for row in 0..res {
            let y = -1.0 + step * row as f64;
            for col in 0..res {
                let x = -1.0 + step * col as f64;
                let mu = (1.0 - x * x - y * y).sqrt();
                let val = if mu.is_nan() {
                    f64::NAN
                } else {
                    self.intensity(&[mu], u)[0]
                };
                for frame in 0..nframes.max(1) {
                    img[(frame, row, col)] = val;
                }
            }
        }
        img
    }

    pub fn limbdark_is_physical(&self, u: &DVector<f64>) -> bool {
        limbdark_is_physical(u)
    }
}
