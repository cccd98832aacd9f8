use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glam::{DVec2, DVec3};

use crate::camera::{
    CameraExtrinsic, CameraIntrinsic, CameraModel, ImageSize, PolynomialDistortion,
};
use crate::error::CalibError;

/// On-disk intrinsics document, one JSON file per camera.
#[derive(serde::Serialize, serde::Deserialize)]
struct IntrinsicsFile {
    camera_matrix: [[f64; 3]; 3],
    distortion: Option<[f64; 5]>,
    resolution: [usize; 2],
}

/// On-disk extrinsics document, one JSON file per camera.
#[derive(serde::Serialize, serde::Deserialize)]
struct ExtrinsicsFile {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

/// An ordered set of calibrated cameras sharing one world coordinate frame.
///
/// Cameras are addressed by stable name everywhere except the final dense
/// tensors, where index order equals the active order and must never change
/// for the life of a lookup table. Read-only after load.
#[derive(Clone, Debug)]
pub struct CalibrationSet {
    cameras: BTreeMap<String, CameraModel>,
    active: Vec<String>,
}

impl CalibrationSet {
    /// Load a calibration set from per-camera JSON files.
    ///
    /// Camera identity is the file stem; both directories must describe the
    /// same camera set. The active order is the sorted name order.
    ///
    /// # Errors
    ///
    /// [`CalibError::CameraCountMismatch`] if the directories disagree on the
    /// number of cameras, [`CalibError::MissingCalibration`] if a camera has
    /// an intrinsics file but no extrinsics file, and IO/JSON errors on
    /// unreadable or malformed files.
    pub fn load(intrinsics_dir: &Path, extrinsics_dir: &Path) -> Result<Self, CalibError> {
        let intrinsics = list_json_files(intrinsics_dir)?;
        let extrinsics = list_json_files(extrinsics_dir)?;
        if intrinsics.len() != extrinsics.len() {
            return Err(CalibError::CameraCountMismatch {
                intrinsics: intrinsics.len(),
                extrinsics: extrinsics.len(),
            });
        }

        let mut cameras = BTreeMap::new();
        for (name, intrinsics_path) in &intrinsics {
            let extrinsics_path = extrinsics
                .get(name)
                .ok_or_else(|| CalibError::MissingCalibration(name.clone()))?;

            let intrinsics_file: IntrinsicsFile =
                serde_json::from_str(&std::fs::read_to_string(intrinsics_path)?)?;
            let extrinsics_file: ExtrinsicsFile =
                serde_json::from_str(&std::fs::read_to_string(extrinsics_path)?)?;

            let k = intrinsics_file.camera_matrix;
            let camera = CameraModel::new(
                name.clone(),
                CameraIntrinsic {
                    fx: k[0][0],
                    fy: k[1][1],
                    cx: k[0][2],
                    cy: k[1][2],
                },
                intrinsics_file.distortion.map(|d| PolynomialDistortion {
                    k1: d[0],
                    k2: d[1],
                    k3: d[4],
                    p1: d[2],
                    p2: d[3],
                }),
                CameraExtrinsic::from_arrays(
                    extrinsics_file.rotation,
                    extrinsics_file.translation,
                ),
                ImageSize::from(intrinsics_file.resolution),
            )?;
            cameras.insert(name.clone(), camera);
        }

        let active = cameras.keys().cloned().collect::<Vec<_>>();
        log::info!(
            "loaded calibration for {} cameras from {}",
            active.len(),
            intrinsics_dir.display()
        );
        Ok(Self { cameras, active })
    }

    /// Build a calibration set from in-memory camera models.
    ///
    /// The active order is the order of `cameras`.
    pub fn from_cameras(cameras: Vec<CameraModel>) -> Result<Self, CalibError> {
        let active = cameras
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>();
        let cameras = cameras
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect::<BTreeMap<_, _>>();
        if cameras.len() != active.len() {
            return Err(CalibError::CameraCountMismatch {
                intrinsics: active.len(),
                extrinsics: cameras.len(),
            });
        }
        Ok(Self { cameras, active })
    }

    /// Restrict (or reorder) the active camera subset.
    ///
    /// Datasets typically record with more cameras than a given run uses.
    /// The resulting active order is the order of `names`.
    ///
    /// # Errors
    ///
    /// [`CalibError::MissingCalibration`] if a name is unknown.
    pub fn with_cameras<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, CalibError> {
        let mut active = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !self.cameras.contains_key(name) {
                return Err(CalibError::MissingCalibration(name.to_string()));
            }
            active.push(name.to_string());
        }
        Ok(Self {
            cameras: self.cameras.clone(),
            active,
        })
    }

    /// The active cameras, in active order.
    pub fn cameras(&self) -> impl Iterator<Item = &CameraModel> {
        self.active.iter().map(|name| &self.cameras[name])
    }

    /// Number of active cameras.
    pub fn num_cameras(&self) -> usize {
        self.active.len()
    }

    /// Look up a camera by name, active or not.
    pub fn camera(&self, name: &str) -> Option<&CameraModel> {
        self.cameras.get(name)
    }

    /// The active camera names, in active order.
    pub fn active_names(&self) -> &[String] {
        &self.active
    }

    /// Project one world point into every active camera.
    ///
    /// Returns one clamped pixel coordinate per camera, in active order.
    pub fn reproject_point(&self, point: DVec3) -> Vec<DVec2> {
        self.cameras().map(|c| c.project_point(point)).collect()
    }

    /// The resolution shared by all active cameras.
    ///
    /// The dense heatmap batch requires a single height and width.
    ///
    /// # Errors
    ///
    /// [`CalibError::ResolutionMismatch`] if two active cameras differ.
    pub fn shared_resolution(&self) -> Result<ImageSize, CalibError> {
        let mut resolution = None;
        for camera in self.cameras() {
            match resolution {
                None => resolution = Some(camera.resolution()),
                Some(r) if r != camera.resolution() => {
                    return Err(CalibError::ResolutionMismatch(r, camera.resolution()))
                }
                Some(_) => {}
            }
        }
        resolution.ok_or(CalibError::CameraCountMismatch {
            intrinsics: 0,
            extrinsics: 0,
        })
    }
}

/// Map file stem to path for every `.json` file in a directory.
fn list_json_files(dir: &Path) -> Result<BTreeMap<String, PathBuf>, CalibError> {
    let mut files = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.insert(stem.to_string(), path);
            }
        }
    }
    Ok(files)
}
