use glam::DVec3;
use ndarray::{Array4, ArrayView4, Axis, Zip};

use crate::error::ReproError;

/// Tolerance for the divisibility checks on grid parameters.
const DIVISIBILITY_EPS: f64 = 1e-6;

/// A fixed-resolution 3D lattice of offsets around a dynamic center.
///
/// Cell `(i, j, k)` for `i, j, k` in `[-R/2, R/2)` maps to the world offset
/// `(i*s, j*s, k*s)` where `s` is the spacing in millimeters. Resolution and
/// spacing are fixed at construction; recentering is a broadcast add done
/// every forward call, never a rebuild.
#[derive(Clone, Debug)]
pub struct SamplingGrid {
    resolution: usize,
    spacing_mm: f64,
    offsets: Array4<f64>,
}

impl SamplingGrid {
    /// Create a sampling grid covering a cube of `cube_size_mm` per side.
    ///
    /// # Errors
    ///
    /// [`ReproError::InvalidGridConfig`] unless `cube_size_mm` is a whole
    /// multiple of `spacing_mm` and the resulting resolution is even and
    /// non-zero.
    pub fn new(cube_size_mm: f64, spacing_mm: f64) -> Result<Self, ReproError> {
        if !(spacing_mm.is_finite() && spacing_mm > 0.0) {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("grid spacing must be positive, got {spacing_mm}"),
            });
        }
        if !(cube_size_mm.is_finite() && cube_size_mm > 0.0) {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("cube size must be positive, got {cube_size_mm}"),
            });
        }
        let cells = cube_size_mm / spacing_mm;
        let resolution = cells.round();
        if (resolution * spacing_mm - cube_size_mm).abs() > DIVISIBILITY_EPS {
            return Err(ReproError::InvalidGridConfig {
                reason: format!(
                    "cube size {cube_size_mm}mm is not a multiple of spacing {spacing_mm}mm"
                ),
            });
        }
        let resolution = resolution as usize;
        if resolution == 0 || resolution % 2 != 0 {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("grid resolution must be even and non-zero, got {resolution}"),
            });
        }

        let half = (resolution / 2) as i64;
        let mut offsets = Array4::<f64>::zeros((resolution, resolution, resolution, 3));
        for ((i, j, k, axis), value) in offsets.indexed_iter_mut() {
            let logical = match axis {
                0 => i,
                1 => j,
                _ => k,
            } as i64
                - half;
            *value = logical as f64 * spacing_mm;
        }

        Ok(Self {
            resolution,
            spacing_mm,
            offsets,
        })
    }

    /// Cells per axis.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Physical cell spacing in millimeters.
    pub fn spacing_mm(&self) -> f64 {
        self.spacing_mm
    }

    /// Physical extent of the grid per axis, in millimeters.
    pub fn cube_size_mm(&self) -> f64 {
        self.resolution as f64 * self.spacing_mm
    }

    /// The static offset lattice, shape `[R, R, R, 3]`.
    pub fn offsets(&self) -> ArrayView4<'_, f64> {
        self.offsets.view()
    }

    /// Write the absolute world coordinates of every cell for a given center.
    ///
    /// A pure translation of the offset lattice into `out`.
    ///
    /// # Errors
    ///
    /// [`ReproError::InvalidGridConfig`] if `out` is not `[R, R, R, 3]`.
    pub fn world_coords(&self, center: DVec3, out: &mut Array4<f64>) -> Result<(), ReproError> {
        if out.shape() != self.offsets.shape() {
            return Err(ReproError::InvalidGridConfig {
                reason: format!(
                    "output buffer shape {:?} does not match grid shape {:?}",
                    out.shape(),
                    self.offsets.shape()
                ),
            });
        }
        Zip::from(out.lanes_mut(Axis(3)))
            .and(self.offsets.lanes(Axis(3)))
            .for_each(|mut world, offset| {
                world[0] = offset[0] + center.x;
                world[1] = offset[1] + center.y;
                world[2] = offset[2] + center.z;
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_non_divisible_cube_size() {
        assert!(matches!(
            SamplingGrid::new(100.0, 33.0),
            Err(ReproError::InvalidGridConfig { .. })
        ));
    }

    #[test]
    fn rejects_odd_resolution() {
        // 30 / 10 = 3 cells per axis
        assert!(matches!(
            SamplingGrid::new(30.0, 10.0),
            Err(ReproError::InvalidGridConfig { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_spacing() {
        assert!(SamplingGrid::new(100.0, 0.0).is_err());
        assert!(SamplingGrid::new(100.0, -5.0).is_err());
    }

    #[test]
    fn offsets_span_half_open_range() {
        let grid = SamplingGrid::new(40.0, 10.0).unwrap();
        assert_eq!(grid.resolution(), 4);
        assert_relative_eq!(grid.cube_size_mm(), 40.0);
        let offsets = grid.offsets();
        // first cell is -R/2 * spacing, last is (R/2 - 1) * spacing
        assert_relative_eq!(offsets[[0, 0, 0, 0]], -20.0);
        assert_relative_eq!(offsets[[3, 0, 0, 0]], 10.0);
        assert_relative_eq!(offsets[[0, 2, 1, 1]], 0.0);
        assert_relative_eq!(offsets[[0, 0, 1, 2]], -10.0);
    }

    #[test]
    fn recentering_is_a_pure_translation() {
        let grid = SamplingGrid::new(160.0, 10.0).unwrap();
        let r = grid.resolution();
        let mut first = Array4::<f64>::zeros((r, r, r, 3));
        let mut second = Array4::<f64>::zeros((r, r, r, 3));
        let c1 = DVec3::new(12.5, -40.0, 7.0);
        let c2 = DVec3::new(-3.0, 11.0, 100.0);
        grid.world_coords(c1, &mut first).unwrap();
        grid.world_coords(c2, &mut second).unwrap();

        let delta = c2 - c1;
        for ((_, _, _, axis), diff) in (&second - &first).indexed_iter() {
            assert_relative_eq!(*diff, delta[axis], epsilon = 1e-12);
        }
    }

    #[test]
    fn world_coords_rejects_wrong_buffer_shape() {
        let grid = SamplingGrid::new(40.0, 10.0).unwrap();
        let mut out = Array4::<f64>::zeros((2, 2, 2, 3));
        assert!(grid.world_coords(DVec3::ZERO, &mut out).is_err());
    }
}
