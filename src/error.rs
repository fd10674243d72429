//! Crate-wide error taxonomy.
//!
//! Fatal unsupported configurations are raised data-dependently: a variant
//! like [`Error::ReflectedOccultation`] is only produced when at least one
//! time sample actually falls in the occulted regime, never eagerly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("occultations in reflected light are not supported")]
    ReflectedOccultation,

    #[error("secondary-secondary occultations in reflected light are not supported")]
    ReflectedMutualOccultation,

    #[error("differential rotation requires a batched phase angle")]
    ScalarPhaseDifferentialRotation,

    #[error("intensity minimization is not supported for maps with multiple wavelength channels")]
    SpectralMinimization,

    #[error("exposure integration order must be 0, 1, or 2 (got {0})")]
    InvalidExposureOrder(usize),

    #[error("orbit solver does not support {0}")]
    OrbitCapability(&'static str),

    #[error("dimension mismatch: {0}")]
    Dimension(String),
}

pub type Result<T> = std::result::Result<T, Error>;
