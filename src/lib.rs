//! Spherical-harmonic light curves for rotating, occulted, and
//! illuminated celestial bodies.
//!
//! A surface map is a vector of real spherical-harmonic coefficients.
//! The crate builds the linear operator (the design matrix) that takes
//! those coefficients to observed flux for any mix of rotation,
//! occultation, limb darkening, multiplicative filters, reflected
//! light, and radial-velocity weighting, and assembles whole Keplerian
//! systems of such bodies including pairwise occultations and
//! finite-exposure smearing.
//!
//! The flux in every configuration stays exactly linear in the map
//! coefficients, so the design matrix is the primary object and flux is
//! always a matrix product away.

pub mod basis;
pub mod error;
pub mod kepler;
pub mod map;
pub mod quad;
pub mod rotation;
pub mod solution;
pub mod system;

pub use basis::Basis;
pub use error::{Error, Result};
pub use kepler::{KeplerianOrbit, OrbitSolver};
pub use map::{LimbDarkenedOps, MapProjection, ReflectedOps, RvOps, YlmOps};
pub use system::{BodyOps, MapState, Primary, Secondary, System};
