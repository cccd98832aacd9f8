use std::path::{Path, PathBuf};

use glam::{DVec2, DVec3};
use ndarray::Array4;
use rayon::prelude::*;

use volpose_calib::CalibrationSet;

use crate::error::ReproError;

/// Tolerance for the divisibility checks on axis ranges.
const DIVISIBILITY_EPS: f64 = 1e-6;

/// World-space axis ranges of the full tracking volume, in millimeters.
///
/// Comes from the project configuration; each range length must be a whole
/// multiple of the spacing.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct GridVolume {
    /// Range of the x axis as `(min, max)`.
    pub x: (f64, f64),
    /// Range of the y axis as `(min, max)`.
    pub y: (f64, f64),
    /// Range of the z axis as `(min, max)`.
    pub z: (f64, f64),
    /// Lattice spacing in millimeters.
    pub spacing_mm: f64,
}

impl GridVolume {
    /// Number of lattice cells per axis.
    ///
    /// # Errors
    ///
    /// [`ReproError::InvalidGridConfig`] if the spacing is not positive or an
    /// axis range is empty or not a whole multiple of the spacing.
    pub fn bins(&self) -> Result<[usize; 3], ReproError> {
        if !(self.spacing_mm.is_finite() && self.spacing_mm > 0.0) {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("grid spacing must be positive, got {}", self.spacing_mm),
            });
        }
        let mut bins = [0usize; 3];
        for (axis, &(lo, hi)) in [("x", &self.x), ("y", &self.y), ("z", &self.z)] {
            let length = hi - lo;
            if !(length.is_finite() && length > 0.0) {
                return Err(ReproError::InvalidGridConfig {
                    reason: format!("{axis} range ({lo}, {hi}) is empty"),
                });
            }
            let count = (length / self.spacing_mm).round();
            if (count * self.spacing_mm - length).abs() > DIVISIBILITY_EPS {
                return Err(ReproError::InvalidGridConfig {
                    reason: format!(
                        "{axis} range length {length}mm is not a multiple of spacing {}mm",
                        self.spacing_mm
                    ),
                });
            }
            let index = match axis {
                "x" => 0,
                "y" => 1,
                _ => 2,
            };
            bins[index] = count as usize;
        }
        Ok(bins)
    }

    /// The world coordinate of lattice cell `(0, 0, 0)`.
    pub fn origin(&self) -> DVec3 {
        DVec3::new(self.x.0, self.y.0, self.z.0)
    }
}

/// Flatten a clamped pixel coordinate into a heatmap-scale linear index.
///
/// The heatmap-vs-source downsample factor is baked into the flattening:
/// `(py/scale) * (W/scale) + (px/scale)`, truncating.
pub(crate) fn flatten_pixel(pixel: DVec2, scale: usize, heatmap_width: usize) -> i32 {
    let scale = scale as f64;
    (pixel.y / scale) as i32 * heatmap_width as i32 + (pixel.x / scale) as i32
}

/// A precomputed reprojection table over the full tracking volume.
///
/// Indexed `[x_bin, y_bin, z_bin, camera]`, each entry the flattened
/// heatmap-scale pixel index the cell center projects to in that camera.
/// Out-of-frame projections are clamped to the image edge before
/// flattening, mirroring the projection policy of the camera model.
///
/// The heatmap geometry the indices were flattened against is recorded
/// alongside the table, so a consumer can reject a table built for a
/// different resolution or scale before indexing with it.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupTable {
    origin: DVec3,
    spacing_mm: f64,
    heatmap_width: usize,
    heatmap_height: usize,
    table: Array4<i32>,
}

impl LookupTable {
    /// Build the table by projecting every lattice cell into every camera.
    ///
    /// Parallelized over the outer x axis: each worker fills its own
    /// disjoint slice of the output, so the result is identical regardless
    /// of thread count or completion order. The build is deterministic:
    /// identical calibration, volume and scale always yield a bit-identical
    /// table.
    pub fn build(
        volume: &GridVolume,
        calib: &CalibrationSet,
        scale: usize,
    ) -> Result<Self, ReproError> {
        let [nx, ny, nz] = volume.bins()?;
        let cameras = calib.cameras().collect::<Vec<_>>();
        if cameras.is_empty() {
            return Err(ReproError::NoActiveCameras);
        }
        let resolution = calib.shared_resolution()?;
        if scale == 0 || resolution.width % scale != 0 || resolution.height % scale != 0 {
            return Err(ReproError::InvalidGridConfig {
                reason: format!("heatmap scale {scale} does not divide {resolution}"),
            });
        }
        let heatmap_width = resolution.width / scale;
        let heatmap_height = resolution.height / scale;
        let num_cameras = cameras.len();
        let origin = volume.origin();
        let spacing = volume.spacing_mm;

        log::info!(
            "building reprojection lookup table: {nx}x{ny}x{nz} cells, {num_cameras} cameras"
        );

        let slice_len = ny * nz * num_cameras;
        let mut data = vec![0i32; nx * slice_len];
        data.par_chunks_exact_mut(slice_len)
            .enumerate()
            .for_each(|(ix, slice)| {
                let wx = origin.x + ix as f64 * spacing;
                for iy in 0..ny {
                    let wy = origin.y + iy as f64 * spacing;
                    for iz in 0..nz {
                        let point = DVec3::new(wx, wy, origin.z + iz as f64 * spacing);
                        let base = (iy * nz + iz) * num_cameras;
                        for (c, camera) in cameras.iter().enumerate() {
                            slice[base + c] =
                                flatten_pixel(camera.project_point(point), scale, heatmap_width);
                        }
                    }
                }
                log::debug!("lookup x-slice {ix} projected");
            });

        let table = Array4::from_shape_vec((nx, ny, nz, num_cameras), data)?;
        log::info!("reprojection lookup table built");
        Ok(Self {
            origin,
            spacing_mm: spacing,
            heatmap_width,
            heatmap_height,
            table,
        })
    }

    /// The world coordinate of lattice cell `(0, 0, 0)`.
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Lattice spacing in millimeters.
    pub fn spacing_mm(&self) -> f64 {
        self.spacing_mm
    }

    /// Width of the heatmaps the indices were flattened against.
    pub fn heatmap_width(&self) -> usize {
        self.heatmap_width
    }

    /// Height of the heatmaps the indices were flattened against.
    pub fn heatmap_height(&self) -> usize {
        self.heatmap_height
    }

    /// Number of cameras the table was built for.
    pub fn num_cameras(&self) -> usize {
        self.table.shape()[3]
    }

    /// Lattice cells per axis.
    pub fn bins(&self) -> [usize; 3] {
        let shape = self.table.shape();
        [shape[0], shape[1], shape[2]]
    }

    /// The dense `[x_bin, y_bin, z_bin, camera]` index table.
    pub fn table(&self) -> &Array4<i32> {
        &self.table
    }

    /// Quantize a world point into lattice bin indices.
    ///
    /// Truncates toward zero, matching the integer cast the layer's fast
    /// path was trained against. Bins may fall outside the table for points
    /// outside the tracking volume; the caller clamps.
    pub fn quantize(&self, center: DVec3) -> [i64; 3] {
        let scaled = (center - self.origin) / self.spacing_mm;
        [scaled.x as i64, scaled.y as i64, scaled.z as i64]
    }

    /// Serialize to `path`, atomically.
    ///
    /// Writes to a sibling `.tmp` file first and renames on success; an
    /// interrupted or failed save never leaves a partial cache behind.
    pub fn save(&self, path: &Path) -> Result<(), ReproError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        if let Err(e) = std::fs::write(&tmp, &bytes).and_then(|_| std::fs::rename(&tmp, path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::info!("saved lookup table to {}", path.display());
        Ok(())
    }

    /// Deserialize a table previously written by [`Self::save`].
    pub fn load(path: &Path) -> Result<Self, ReproError> {
        let bytes = std::fs::read(path)?;
        let (table, _): (Self, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())?;
        if table.table.is_empty() {
            return Err(ReproError::CorruptLookup {
                reason: "table has no cells".to_string(),
            });
        }
        Ok(table)
    }

    /// Load the cached table if `path` exists, otherwise build and persist.
    ///
    /// There is no automatic invalidation on calibration change; deleting
    /// the cache file is the only way to force a rebuild.
    pub fn load_or_build(
        path: &Path,
        volume: &GridVolume,
        calib: &CalibrationSet,
        scale: usize,
    ) -> Result<Self, ReproError> {
        if path.is_file() {
            log::info!("loading cached lookup table from {}", path.display());
            return Self::load(path);
        }
        let table = Self::build(volume, calib, scale)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        table.save(path)?;
        Ok(table)
    }
}

/// The deterministic per-project cache location for the lookup table.
pub fn lookup_path(projects_root: &Path, project_name: &str) -> PathBuf {
    projects_root.join(project_name).join("lookup.bin")
}

impl bincode::enc::Encode for LookupTable {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.origin.to_array(), encoder)?;
        bincode::Encode::encode(&self.spacing_mm, encoder)?;
        bincode::Encode::encode(&[self.heatmap_width, self.heatmap_height], encoder)?;
        let (nx, ny, nz, nc) = self.table.dim();
        bincode::Encode::encode(&[nx, ny, nz, nc], encoder)?;
        let data = self.table.as_slice().ok_or_else(|| {
            bincode::error::EncodeError::OtherString("table data is not contiguous".to_string())
        })?;
        bincode::Encode::encode(&data, encoder)?;
        Ok(())
    }
}

impl<C> bincode::de::Decode<C> for LookupTable {
    fn decode<D: bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let origin: [f64; 3] = bincode::Decode::decode(decoder)?;
        let spacing_mm: f64 = bincode::Decode::decode(decoder)?;
        let heatmap_size: [usize; 2] = bincode::Decode::decode(decoder)?;
        let shape: [usize; 4] = bincode::Decode::decode(decoder)?;
        let data: Vec<i32> = bincode::Decode::decode(decoder)?;
        let table = Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), data)
            .map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))?;
        Ok(Self {
            origin: DVec3::from_array(origin),
            spacing_mm,
            heatmap_width: heatmap_size[0],
            heatmap_height: heatmap_size[1],
            table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DMat3;
    use volpose_calib::{
        CameraExtrinsic, CameraIntrinsic, CameraModel, CalibrationSet, ImageSize,
    };

    fn test_rig() -> CalibrationSet {
        let intrinsic = CameraIntrinsic {
            fx: 200.0,
            fy: 200.0,
            cx: 64.0,
            cy: 64.0,
        };
        let resolution = ImageSize {
            width: 128,
            height: 128,
        };
        let front = CameraModel::new(
            "front",
            intrinsic,
            None,
            CameraExtrinsic {
                rotation: DMat3::IDENTITY,
                translation: DVec3::new(0.0, 0.0, 500.0),
            },
            resolution,
        )
        .unwrap();
        let side = CameraModel::new(
            "side",
            intrinsic,
            None,
            CameraExtrinsic::from_arrays(
                [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]],
                [0.0, 0.0, 500.0],
            ),
            resolution,
        )
        .unwrap();
        CalibrationSet::from_cameras(vec![front, side]).unwrap()
    }

    fn test_volume() -> GridVolume {
        GridVolume {
            x: (-100.0, 100.0),
            y: (-100.0, 100.0),
            z: (-100.0, 100.0),
            spacing_mm: 20.0,
        }
    }

    #[test]
    fn bins_validates_ranges() {
        let mut volume = test_volume();
        assert_eq!(volume.bins().unwrap(), [10, 10, 10]);
        volume.y = (50.0, 50.0);
        assert!(volume.bins().is_err());
        volume.y = (0.0, 70.0);
        assert!(volume.bins().is_err());
    }

    #[test]
    fn build_is_deterministic() {
        let rig = test_rig();
        let volume = test_volume();
        let first = LookupTable::build(&volume, &rig, 2).unwrap();
        let second = LookupTable::build(&volume, &rig, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn build_matches_direct_projection() {
        let rig = test_rig();
        let volume = test_volume();
        let table = LookupTable::build(&volume, &rig, 2).unwrap();
        assert_eq!(table.bins(), [10, 10, 10]);
        assert_eq!(table.num_cameras(), 2);
        assert_eq!(table.heatmap_width(), 64);
        assert_eq!(table.heatmap_height(), 64);

        // cell (5, 5, 5) is the world origin
        let point = DVec3::ZERO;
        for (c, camera) in rig.cameras().enumerate() {
            let expected = flatten_pixel(camera.project_point(point), 2, 64);
            assert_eq!(table.table()[[5, 5, 5, c]], expected);
        }
    }

    #[test]
    fn quantize_truncates_toward_zero() {
        let rig = test_rig();
        let table = LookupTable::build(&test_volume(), &rig, 2).unwrap();
        assert_eq!(table.quantize(DVec3::new(-100.0, 0.0, 19.9)), [0, 5, 5]);
        assert_eq!(table.quantize(DVec3::new(-60.0, 99.0, -100.0)), [2, 9, 0]);
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lookup.bin");
        let rig = test_rig();
        let table = LookupTable::build(&test_volume(), &rig, 2).unwrap();
        table.save(&path).unwrap();
        let loaded = LookupTable::load(&path).unwrap();
        assert_eq!(table, loaded);
        // no stray tmp file left behind
        assert!(!tmp.path().join("lookup.bin.tmp").exists());
    }

    #[test]
    fn failed_save_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing_dir").join("lookup.bin");
        let rig = test_rig();
        let table = LookupTable::build(&test_volume(), &rig, 2).unwrap();
        assert!(table.save(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn load_or_build_prefers_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = lookup_path(tmp.path(), "test_project");
        let rig = test_rig();
        let volume = test_volume();

        let built = LookupTable::load_or_build(&path, &volume, &rig, 2).unwrap();
        assert!(path.is_file());

        // write a doctored table at the cache path; a second call must load
        // it verbatim instead of rebuilding
        let mut doctored = built.clone();
        doctored.table[[0, 0, 0, 0]] = -7;
        doctored.save(&path).unwrap();
        let reloaded = LookupTable::load_or_build(&path, &volume, &rig, 2).unwrap();
        assert_eq!(reloaded.table()[[0, 0, 0, 0]], -7);
    }

    #[test]
    fn corrupt_cache_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lookup.bin");
        std::fs::write(&path, b"not a lookup table").unwrap();
        assert!(LookupTable::load(&path).is_err());
    }
}
