//! Surface-map operators: design matrices, fluxes, intensities, images.
//!
//! Each operator owns a shared [`Basis`](crate::basis::Basis) and exposes
//! the same surface: a design matrix mapping harmonic coefficients to
//! observed flux at each time sample, point intensities, and rendered
//! image cubes. The variants differ in what weights the disk integral:
//! nothing ([`YlmOps`]), a 1-D limb-darkening law ([`LimbDarkenedOps`]),
//! the projected illumination from an external source ([`ReflectedOps`]),
//! or the line-of-sight velocity field ([`RvOps`]).

mod limb_darkened;
mod reflected;
mod rv;
mod ylm;

pub use limb_darkened::LimbDarkenedOps;
pub use reflected::ReflectedOps;
pub use rv::RvOps;
pub use ylm::YlmOps;

use nalgebra::Vector3;

use crate::rotation::axis_angle;

/// Whether an occultor configuration actually blocks any starlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccultationRegime {
    /// The occultor misses the disk, sits behind the body, or has zero
    /// size; only rotation shapes the flux.
    NoOcclusion,
    /// The occultor overlaps the projected disk.
    Occulted,
}

/// Classifies one sample. `b` is the sky-projected center distance in
/// units of the occulted body's radius, `zo` the line-of-sight offset
/// (positive in front), `ro` the occultor radius.
pub fn occultation_regime(b: f64, zo: f64, ro: f64) -> OccultationRegime {
    if b >= 1.0 + ro || zo <= 0.0 || ro == 0.0 {
        OccultationRegime::NoOcclusion
    } else {
        OccultationRegime::Occulted
    }
}

/// Image-plane layout for rendered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapProjection {
    /// The visible hemisphere as seen by the observer; pixels off the
    /// disk are NaN.
    Orthographic,
    /// Equirectangular latitude/longitude covering the full sphere.
    Rectangular,
}

/// Sky-plane Cartesian grid for orthographic rendering. Points outside
/// the unit disk carry `z = NaN`, which propagates into the image.
pub(crate) fn ortho_grid(res: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = res * res;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    let mut zs = Vec::with_capacity(n);
    let step = 2.0 / res as f64;
    for row in 0..res {
        let y = -1.0 + step * row as f64;
        for col in 0..res {
            let x = -1.0 + step * col as f64;
            xs.push(x);
            ys.push(y);
            zs.push((1.0 - x * x - y * y).sqrt());
        }
    }
    (xs, ys, zs)
}

/// Body-frame Cartesian grid over an equirectangular lat/lon raster,
/// tipped so the map pole lies along the vertical image axis.
pub(crate) fn rect_grid(res: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = res * res;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    let mut zs = Vec::with_capacity(n);
    let dlat = std::f64::consts::PI / res as f64;
    let r = axis_angle(&Vector3::x(), -std::f64::consts::FRAC_PI_2);
    for row in 0..res {
        let lat = -std::f64::consts::FRAC_PI_2 + dlat * row as f64;
        for col in 0..res {
            let lon = -1.5 * std::f64::consts::PI + 2.0 * dlat * col as f64;
            let p = Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin());
            let p = r * p;
            xs.push(p.x);
            ys.push(p.y);
            zs.push(p.z);
        }
    }
    (xs, ys, zs)
}
