#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the reprojection module.
pub mod error;

/// The 3D sampling lattice recentered around a candidate location.
pub mod grid;

/// Dense heatmap and volume batch types.
pub mod heatmap;

/// The reprojection layer fusing per-camera heatmaps into 3D volumes.
pub mod layer;

/// Precomputed reprojection lookup tables and their on-disk cache.
pub mod lookup;

pub use error::ReproError;
pub use grid::SamplingGrid;
pub use heatmap::{HeatmapBatch, VolumeBatch};
pub use layer::ReprojectionLayer;
pub use lookup::{lookup_path, GridVolume, LookupTable};
