use volpose_calib::CalibError;

/// An error type for the reprojection module.
#[derive(thiserror::Error, Debug)]
pub enum ReproError {
    /// Error when the grid parameters are not mutually divisible.
    #[error("invalid grid configuration: {reason}")]
    InvalidGridConfig {
        /// What constraint the parameters violate.
        reason: String,
    },

    /// Error when the fast path is used before a lookup table is attached.
    #[error("reprojection lookup table is not initialized")]
    GridUninitialized,

    /// Error when the heatmap camera count does not match the layer.
    #[error("expected {expected} cameras, got {actual}")]
    CalibrationMismatch {
        /// Camera count the layer was configured with.
        expected: usize,
        /// Camera count of the offending input.
        actual: usize,
    },

    /// Error when the heatmap resolution does not match the calibration.
    #[error("heatmaps are {actual_height}x{actual_width}, expected {expected_height}x{expected_width}")]
    HeatmapShapeMismatch {
        /// Expected heatmap height (camera height / scale).
        expected_height: usize,
        /// Expected heatmap width (camera width / scale).
        expected_width: usize,
        /// Height of the offending batch.
        actual_height: usize,
        /// Width of the offending batch.
        actual_width: usize,
    },

    /// Error when the number of centers does not match the batch size.
    #[error("got {centers} centers for a batch of {batch} heatmap sets")]
    BatchMismatch {
        /// Batch size of the heatmap input.
        batch: usize,
        /// Number of center points supplied.
        centers: usize,
    },

    /// Error when a batch tensor has an empty dimension.
    #[error("invalid batch: {reason}")]
    InvalidBatch {
        /// Which dimension is empty.
        reason: String,
    },

    /// Error when the calibration set has no active cameras.
    #[error("calibration set has no active cameras")]
    NoActiveCameras,

    /// Error when `backward` is called before any forward pass.
    #[error("backward called before any forward pass")]
    BackwardBeforeForward,

    /// Error when the gradient volume does not match the saved forward state.
    #[error("gradient volume shape does not match the last forward pass")]
    GradientShapeMismatch,

    /// Error when a cached lookup table fails its consistency checks.
    #[error("corrupt lookup table: {reason}")]
    CorruptLookup {
        /// Which check failed.
        reason: String,
    },

    /// Error when reading or writing the lookup cache.
    #[error("lookup cache io error")]
    Io(#[from] std::io::Error),

    /// Error when encoding the lookup table.
    #[error("failed to encode lookup table")]
    Encode(#[from] bincode::error::EncodeError),

    /// Error when decoding the lookup table.
    #[error("failed to decode lookup table")]
    Decode(#[from] bincode::error::DecodeError),

    /// Error when a dense array has an unexpected shape.
    #[error("invalid shape")]
    Shape(#[from] ndarray::ShapeError),

    /// Error from the calibration module.
    #[error(transparent)]
    Calib(#[from] CalibError),
}
