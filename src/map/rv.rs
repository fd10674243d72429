//! The radial-velocity map operator.
//!
//! The observed RV anomaly (e.g. the Rossiter-McLaughlin signal) is the
//! brightness-weighted line-of-sight velocity over the visible disk. The
//! velocity field of a (differentially) rotating sphere expands exactly
//! into harmonics of degree at most 3, so it rides through the ordinary
//! design-matrix machinery as a multiplicative filter and the anomaly is
//! the ratio of the velocity-weighted flux to the ordinary flux.

use nalgebra::{DMatrix, DVector};

use crate::basis::Basis;
use crate::error::Result;

use super::YlmOps;

/// Degree of the velocity-field filter.
const RV_FDEG: usize = 3;

pub struct RvOps {
    pub ops: YlmOps,
}

impl RvOps {
    pub fn new(ydeg: usize, udeg: usize, drorder: usize) -> Self {
        RvOps {
            ops: YlmOps::new(ydeg, udeg, RV_FDEG, drorder),
        }
    }

    /// Harmonic coefficients of the line-of-sight velocity field for a
    /// sphere with equatorial velocity `veq`, inclination `inc`,
    /// obliquity `obl`, and differential-rotation shear `alpha`.
    pub fn rv_filter(inc: f64, obl: f64, veq: f64, alpha: f64) -> DVector<f64> {
        let a = inc.sin() * obl.cos();
        let b = inc.sin() * obl.sin();
        let c = inc.cos();
        let shear = -(a * a) * alpha - b * b * alpha - c * c * alpha + 5.0;
        let mut f = DVector::<f64>::zeros(16);
        f[1] = veq * 3.0_f64.sqrt() * b * shear / 15.0;
        f[3] = veq * 3.0_f64.sqrt() * a * shear / 15.0;
        f[9] = veq * alpha * 70.0_f64.sqrt() * b * (3.0 * a * a - b * b) / 70.0;
        f[10] = veq * alpha * 2.0 * 105.0_f64.sqrt() * c * (-(a * a) + b * b) / 105.0;
        f[11] = veq * alpha * 42.0_f64.sqrt() * b * (a * a + b * b - 4.0 * c * c) / 210.0;
        f[13] = veq * alpha * 42.0_f64.sqrt() * a * (a * a + b * b - 4.0 * c * c) / 210.0;
        f[14] = veq * alpha * 4.0 * 105.0_f64.sqrt() * a * b * c / 105.0;
        f[15] = veq * alpha * 70.0_f64.sqrt() * a * (a * a - 3.0 * b * b) / 70.0;
        f * std::f64::consts::PI
    }

    /// The RV anomaly at each sample: velocity-weighted flux over
    /// ordinary flux, with exact zeros wherever the ordinary flux is
    /// exactly zero.
    #[allow(clippy::too_many_arguments)]
    pub fn rv(
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
        veq: f64,
        alpha: f64,
    ) -> Result<DVector<f64>> {
        let f = Self::rv_filter(inc, obl, veq, alpha);
        let weighted = self
            .ops
            .flux(theta, xo, yo, zo, ro, inc, obl, y, u, &f, alpha)?;
        let f0 = Basis::identity_filter(RV_FDEG);
        let plain = self
            .ops
            .flux(theta, xo, yo, zo, ro, inc, obl, y, u, &f0, alpha)?;
        let mut out = DVector::<f64>::zeros(theta.len());
        for i in 0..theta.len() {
            let denom = plain[(i, 0)];
            out[i] = if denom == 0.0 {
                0.0
            } else {
                weighted[(i, 0)] / denom
            };
        }
        Ok(out)
    }
}
