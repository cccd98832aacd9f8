use crate::camera::ImageSize;

/// An error type for the calibration module.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    /// Error when a calibration file cannot be read.
    #[error("failed to read calibration file")]
    Io(#[from] std::io::Error),

    /// Error when a calibration file cannot be parsed.
    #[error("failed to parse calibration file")]
    Json(#[from] serde_json::Error),

    /// Error when a referenced camera has no calibration on disk.
    #[error("no calibration found for camera \"{0}\"")]
    MissingCalibration(String),

    /// Error when the intrinsics and extrinsics directories disagree on the camera set.
    #[error("camera count mismatch: {intrinsics} intrinsics vs {extrinsics} extrinsics")]
    CameraCountMismatch {
        /// Number of cameras described by the intrinsics directory.
        intrinsics: usize,
        /// Number of cameras described by the extrinsics directory.
        extrinsics: usize,
    },

    /// Error when a camera's intrinsic parameters are invalid.
    #[error("invalid intrinsics for camera \"{name}\": {reason}")]
    InvalidIntrinsics {
        /// Name of the offending camera.
        name: String,
        /// What is wrong with the parameters.
        reason: String,
    },

    /// Error when the active cameras do not share a single resolution.
    #[error("cameras have mismatched resolutions: {0} vs {1}")]
    ResolutionMismatch(ImageSize, ImageSize),
}
