#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera model with optional polynomial lens distortion.
pub mod camera;

/// Error types for the calibration module.
pub mod error;

/// Multi-camera calibration sets loaded from per-camera files.
pub mod rig;

pub use camera::{
    CameraExtrinsic, CameraIntrinsic, CameraModel, ImageSize, PolynomialDistortion,
};
pub use error::CalibError;
pub use rig::CalibrationSet;
