use ndarray::{Array5, ArrayView5};

use crate::error::ReproError;

/// A batch of per-camera 2D keypoint heatmaps.
///
/// Shape `[batch, camera, keypoint, height, width]`, non-negative
/// confidences as produced by the upstream 2D keypoint network.
#[derive(Clone, Debug)]
pub struct HeatmapBatch(Array5<f32>);

impl HeatmapBatch {
    /// Wrap a dense array, validating that no dimension is empty.
    pub fn from_array(data: Array5<f32>) -> Result<Self, ReproError> {
        validate_non_empty(data.shape())?;
        Ok(Self(data))
    }

    /// Number of batch items.
    pub fn batch_size(&self) -> usize {
        self.0.shape()[0]
    }

    /// Number of camera views.
    pub fn num_cameras(&self) -> usize {
        self.0.shape()[1]
    }

    /// Number of keypoints per view.
    pub fn num_keypoints(&self) -> usize {
        self.0.shape()[2]
    }

    /// Heatmap height in pixels.
    pub fn height(&self) -> usize {
        self.0.shape()[3]
    }

    /// Heatmap width in pixels.
    pub fn width(&self) -> usize {
        self.0.shape()[4]
    }

    /// A view of the underlying array.
    pub fn view(&self) -> ArrayView5<'_, f32> {
        self.0.view()
    }

    /// The underlying array.
    pub fn as_array(&self) -> &Array5<f32> {
        &self.0
    }

    /// Consume the batch and return the underlying array.
    pub fn into_inner(self) -> Array5<f32> {
        self.0
    }
}

/// A batch of dense 3D evidence volumes, one per keypoint.
///
/// Shape `[batch, keypoint, R, R, R]` where `R` is the sampling grid
/// resolution. Consumed by a downstream coordinate-regression head.
#[derive(Clone, Debug)]
pub struct VolumeBatch(Array5<f32>);

impl VolumeBatch {
    /// Wrap a dense array, validating the cubic spatial shape.
    pub fn from_array(data: Array5<f32>) -> Result<Self, ReproError> {
        validate_non_empty(data.shape())?;
        let shape = data.shape();
        if shape[2] != shape[3] || shape[3] != shape[4] {
            return Err(ReproError::InvalidBatch {
                reason: format!(
                    "volume spatial dimensions must be cubic, got {}x{}x{}",
                    shape[2], shape[3], shape[4]
                ),
            });
        }
        Ok(Self(data))
    }

    /// Number of batch items.
    pub fn batch_size(&self) -> usize {
        self.0.shape()[0]
    }

    /// Number of keypoints.
    pub fn num_keypoints(&self) -> usize {
        self.0.shape()[1]
    }

    /// Cells per spatial axis.
    pub fn resolution(&self) -> usize {
        self.0.shape()[2]
    }

    /// The cell index and value of the volume maximum for one keypoint.
    ///
    /// A coarse stand-in for the downstream soft-argmax head, handy for
    /// diagnostics and tests.
    pub fn argmax(&self, batch: usize, keypoint: usize) -> ([usize; 3], f32) {
        let mut best = ([0usize; 3], f32::NEG_INFINITY);
        for ((i, j, k), &value) in self
            .0
            .index_axis(ndarray::Axis(0), batch)
            .index_axis(ndarray::Axis(0), keypoint)
            .indexed_iter()
        {
            if value > best.1 {
                best = ([i, j, k], value);
            }
        }
        best
    }

    /// A view of the underlying array.
    pub fn view(&self) -> ArrayView5<'_, f32> {
        self.0.view()
    }

    /// The underlying array.
    pub fn as_array(&self) -> &Array5<f32> {
        &self.0
    }

    /// Consume the batch and return the underlying array.
    pub fn into_inner(self) -> Array5<f32> {
        self.0
    }
}

fn validate_non_empty(shape: &[usize]) -> Result<(), ReproError> {
    if let Some(axis) = shape.iter().position(|&d| d == 0) {
        return Err(ReproError::InvalidBatch {
            reason: format!("dimension {axis} is empty in shape {shape:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    #[test]
    fn heatmap_batch_accessors() {
        let batch =
            HeatmapBatch::from_array(Array5::<f32>::zeros((2, 4, 23, 64, 80))).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_cameras(), 4);
        assert_eq!(batch.num_keypoints(), 23);
        assert_eq!(batch.height(), 64);
        assert_eq!(batch.width(), 80);
    }

    #[test]
    fn empty_dimension_is_rejected() {
        assert!(HeatmapBatch::from_array(Array5::<f32>::zeros((1, 0, 3, 8, 8))).is_err());
        assert!(VolumeBatch::from_array(Array5::<f32>::zeros((0, 3, 4, 4, 4))).is_err());
    }

    #[test]
    fn non_cubic_volume_is_rejected() {
        assert!(VolumeBatch::from_array(Array5::<f32>::zeros((1, 3, 4, 4, 8))).is_err());
    }

    #[test]
    fn argmax_finds_the_peak() {
        let mut data = Array5::<f32>::zeros((1, 2, 4, 4, 4));
        data[[0, 1, 2, 0, 3]] = 0.7;
        data[[0, 1, 1, 1, 1]] = 0.3;
        let volume = VolumeBatch::from_array(data).unwrap();
        let (cell, value) = volume.argmax(0, 1);
        assert_eq!(cell, [2, 0, 3]);
        assert_eq!(value, 0.7);
        let (_, other) = volume.argmax(0, 0);
        assert_eq!(other, 0.0);
    }
}
