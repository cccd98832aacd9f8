use glam::DVec3;
use ndarray::{s, Array4, Array5, Axis, Zip};

use volpose_calib::{CalibrationSet, CameraModel, ImageSize};

use crate::error::ReproError;
use crate::grid::SamplingGrid;
use crate::heatmap::{HeatmapBatch, VolumeBatch};
use crate::lookup::{flatten_pixel, LookupTable};

/// Fuses per-camera 2D heatmaps into dense 3D evidence volumes.
///
/// The layer owns its working buffers: the recentered world-coordinate
/// lattice and the per-camera flat pixel indices of the last forward pass.
/// They are allocated once and reused across calls, so two forward passes
/// must never be in flight on one instance; the `&mut self` receivers
/// enforce that statically. Use one instance per worker for concurrent
/// inference.
pub struct ReprojectionLayer {
    cameras: Vec<CameraModel>,
    resolution: ImageSize,
    scale: usize,
    grid: SamplingGrid,
    lookup: Option<LookupTable>,
    /// Recentered lattice, shape `[R, R, R, 3]`.
    coords: Array4<f64>,
    /// Flat pixel indices of the last forward pass, `[batch, camera, R, R, R]`.
    indices: Array5<usize>,
    has_indices: bool,
}

impl ReprojectionLayer {
    /// Create a layer for the active cameras of a calibration set.
    ///
    /// `scale` is the downsample factor between the camera images and the
    /// heatmaps produced by the 2D network.
    ///
    /// # Errors
    ///
    /// [`ReproError::NoActiveCameras`] for an empty calibration set,
    /// [`volpose_calib::CalibError::ResolutionMismatch`] if the cameras do
    /// not share one resolution, and [`ReproError::InvalidGridConfig`] if
    /// `scale` does not divide it.
    pub fn new(
        calib: &CalibrationSet,
        grid: SamplingGrid,
        scale: usize,
    ) -> Result<Self, ReproError> {
        let cameras = calib.cameras().cloned().collect::<Vec<_>>();
        if cameras.is_empty() {
            return Err(ReproError::NoActiveCameras);
        }
        let resolution = calib.shared_resolution()?;
        if scale == 0 || resolution.width % scale != 0 || resolution.height % scale != 0 {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("heatmap scale {scale} does not divide {resolution}"),
            });
        }
        let r = grid.resolution();
        let num_cameras = cameras.len();
        Ok(Self {
            cameras,
            resolution,
            scale,
            grid,
            lookup: None,
            coords: Array4::zeros((r, r, r, 3)),
            indices: Array5::zeros((0, num_cameras, r, r, r)),
            has_indices: false,
        })
    }

    /// Attach a precomputed lookup table, enabling [`Self::forward_lookup`].
    ///
    /// # Errors
    ///
    /// [`ReproError::CalibrationMismatch`] if the table was built for a
    /// different camera count, [`ReproError::InvalidGridConfig`] if its
    /// spacing differs from the sampling grid, and
    /// [`ReproError::HeatmapShapeMismatch`] if it was flattened against a
    /// different heatmap geometry (resolution or scale) than the layer's —
    /// its indices would run past the heatmap buffers.
    pub fn with_lookup(mut self, lookup: LookupTable) -> Result<Self, ReproError> {
        if lookup.num_cameras() != self.cameras.len() {
            return Err(ReproError::CalibrationMismatch {
                expected: self.cameras.len(),
                actual: lookup.num_cameras(),
            });
        }
        if (lookup.spacing_mm() - self.grid.spacing_mm()).abs() > f64::EPSILON {
            return Err(ReproError::InvalidGridConfig {
                reason: format!(
                    "lookup spacing {}mm does not match grid spacing {}mm",
                    lookup.spacing_mm(),
                    self.grid.spacing_mm()
                ),
            });
        }
        let expected_height = self.resolution.height / self.scale;
        let expected_width = self.resolution.width / self.scale;
        if lookup.heatmap_height() != expected_height || lookup.heatmap_width() != expected_width {
            return Err(ReproError::HeatmapShapeMismatch {
                expected_height,
                expected_width,
                actual_height: lookup.heatmap_height(),
                actual_width: lookup.heatmap_width(),
            });
        }
        self.lookup = Some(lookup);
        Ok(self)
    }

    /// The sampling grid.
    pub fn grid(&self) -> &SamplingGrid {
        &self.grid
    }

    /// Number of cameras the layer was configured with.
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// The heatmap-vs-source downsample factor.
    pub fn scale(&self) -> usize {
        self.scale
    }

    /// The shared camera resolution.
    pub fn resolution(&self) -> ImageSize {
        self.resolution
    }

    /// Fuse a heatmap batch around per-item centers by direct projection.
    ///
    /// Recenters the sampling grid on each item's center, projects every
    /// cell through every camera, gathers the heatmap value at the projected
    /// pixel and averages over all cameras. Cameras whose projection clamps
    /// to the image edge still contribute their (near-zero) value; the mean
    /// dilutes but never corrupts the evidence.
    ///
    /// This is the training path: the per-cell indices are retained for
    /// [`Self::backward`].
    pub fn forward(
        &mut self,
        heatmaps: &HeatmapBatch,
        centers: &[DVec3],
    ) -> Result<VolumeBatch, ReproError> {
        self.validate(heatmaps, centers)?;
        self.reset_indices(heatmaps.batch_size());
        let heatmap_width = self.resolution.width / self.scale;

        for (b, &center) in centers.iter().enumerate() {
            self.grid.world_coords(center, &mut self.coords)?;
            for (c, camera) in self.cameras.iter().enumerate() {
                let scale = self.scale;
                Zip::from(self.indices.slice_mut(s![b, c, .., .., ..]))
                    .and(self.coords.lanes(Axis(3)))
                    .for_each(|index, world| {
                        let point = DVec3::new(world[0], world[1], world[2]);
                        let pixel = camera.project_point(point);
                        *index = flatten_pixel(pixel, scale, heatmap_width) as usize;
                    });
            }
        }
        self.has_indices = true;
        self.gather(heatmaps)
    }

    /// Fuse a heatmap batch via the precomputed lookup table.
    ///
    /// Quantizes each center into the table lattice and slices the `R`-wide
    /// window of precomputed indices around it, clamping window cells into
    /// the table bounds. Integer-indexed and gradient-free; inference only —
    /// it does not arm [`Self::backward`]. Agrees with [`Self::forward`] up
    /// to quantization error, exactly for centers aligned to the table
    /// lattice.
    ///
    /// # Errors
    ///
    /// [`ReproError::GridUninitialized`] if no table is attached.
    pub fn forward_lookup(
        &mut self,
        heatmaps: &HeatmapBatch,
        centers: &[DVec3],
    ) -> Result<VolumeBatch, ReproError> {
        self.validate(heatmaps, centers)?;
        self.reset_indices(heatmaps.batch_size());
        let lookup = self.lookup.as_ref().ok_or(ReproError::GridUninitialized)?;
        let r = self.grid.resolution();
        let half = (r / 2) as i64;
        let [nx, ny, nz] = lookup.bins();
        let table = lookup.table();

        for (b, &center) in centers.iter().enumerate() {
            let bins = lookup.quantize(center);
            for i in 0..r {
                let xi = clamp_bin(bins[0] - half + i as i64, nx);
                for j in 0..r {
                    let yj = clamp_bin(bins[1] - half + j as i64, ny);
                    for k in 0..r {
                        let zk = clamp_bin(bins[2] - half + k as i64, nz);
                        for c in 0..self.cameras.len() {
                            self.indices[[b, c, i, j, k]] = table[[xi, yj, zk, c]] as usize;
                        }
                    }
                }
            }
        }
        // quantized table indices carry no gradient; leave backward unarmed
        self.has_indices = false;
        self.gather(heatmaps)
    }

    /// Route a volume gradient back to heatmap space.
    ///
    /// The explicit reverse-mode companion of [`Self::forward`]: each cell's
    /// gradient is scatter-added, divided by the camera count, onto the
    /// pixel each camera gathered from in the most recent [`Self::forward`]
    /// pass ([`Self::forward_lookup`] is gradient-free and does not count).
    /// Returns a `[batch, camera, keypoint, H, W]` gradient array.
    ///
    /// # Errors
    ///
    /// [`ReproError::BackwardBeforeForward`] if no forward pass has
    /// populated the index buffer, [`ReproError::GradientShapeMismatch`] if
    /// `grad_volume` does not match the last forward pass.
    pub fn backward(&self, grad_volume: &VolumeBatch) -> Result<Array5<f32>, ReproError> {
        if !self.has_indices {
            return Err(ReproError::BackwardBeforeForward);
        }
        let batch = self.indices.shape()[0];
        let r = self.grid.resolution();
        if grad_volume.batch_size() != batch || grad_volume.resolution() != r {
            return Err(ReproError::GradientShapeMismatch);
        }

        let num_cameras = self.cameras.len();
        let num_keypoints = grad_volume.num_keypoints();
        let height = self.resolution.height / self.scale;
        let width = self.resolution.width / self.scale;
        let weight = 1.0 / num_cameras as f32;

        let mut grad = Array5::<f32>::zeros((batch, num_cameras, num_keypoints, height, width));
        for b in 0..batch {
            for c in 0..num_cameras {
                let cell_indices = self.indices.slice(s![b, c, .., .., ..]);
                for k in 0..num_keypoints {
                    let grad_cells = grad_volume.as_array().slice(s![b, k, .., .., ..]);
                    let mut grad_pixels = grad.slice_mut(s![b, c, k, .., ..]);
                    Zip::from(&grad_cells)
                        .and(&cell_indices)
                        .for_each(|&g, &index| {
                            grad_pixels[[index / width, index % width]] += g * weight;
                        });
                }
            }
        }
        Ok(grad)
    }

    /// Gather heatmap values at the saved indices and average over cameras.
    fn gather(&self, heatmaps: &HeatmapBatch) -> Result<VolumeBatch, ReproError> {
        let (batch, num_keypoints) = (heatmaps.batch_size(), heatmaps.num_keypoints());
        let num_cameras = self.cameras.len();
        let r = self.grid.resolution();
        let flat = heatmaps.view().into_shape((
            batch,
            num_cameras,
            num_keypoints,
            heatmaps.height() * heatmaps.width(),
        ))?;

        let mut volume = Array5::<f32>::zeros((batch, num_keypoints, r, r, r));
        for b in 0..batch {
            for c in 0..num_cameras {
                let cell_indices = self.indices.slice(s![b, c, .., .., ..]);
                for k in 0..num_keypoints {
                    let pixels = flat.slice(s![b, c, k, ..]);
                    Zip::from(volume.slice_mut(s![b, k, .., .., ..]))
                        .and(&cell_indices)
                        .for_each(|cell, &index| *cell += pixels[index]);
                }
            }
        }
        let weight = 1.0 / num_cameras as f32;
        volume.mapv_inplace(|v| v * weight);
        VolumeBatch::from_array(volume)
    }

    /// Reallocate the index buffer when the batch size changes.
    fn reset_indices(&mut self, batch: usize) {
        if self.indices.shape()[0] != batch {
            let r = self.grid.resolution();
            self.indices = Array5::zeros((batch, self.cameras.len(), r, r, r));
        }
    }

    fn validate(&self, heatmaps: &HeatmapBatch, centers: &[DVec3]) -> Result<(), ReproError> {
        if heatmaps.num_cameras() != self.cameras.len() {
            return Err(ReproError::CalibrationMismatch {
                expected: self.cameras.len(),
                actual: heatmaps.num_cameras(),
            });
        }
        let expected_height = self.resolution.height / self.scale;
        let expected_width = self.resolution.width / self.scale;
        if heatmaps.height() != expected_height || heatmaps.width() != expected_width {
            return Err(ReproError::HeatmapShapeMismatch {
                expected_height,
                expected_width,
                actual_height: heatmaps.height(),
                actual_width: heatmaps.width(),
            });
        }
        if centers.len() != heatmaps.batch_size() {
            return Err(ReproError::BatchMismatch {
                batch: heatmaps.batch_size(),
                centers: centers.len(),
            });
        }
        Ok(())
    }
}

/// Clamp a lattice bin into `[0, count)`.
fn clamp_bin(bin: i64, count: usize) -> usize {
    bin.clamp(0, count as i64 - 1) as usize
}
