use glam::{DMat3, DVec2, DVec3};

use crate::error::CalibError;

/// Smallest camera-space depth used in the perspective division.
///
/// Points at (or behind) the camera plane are pushed to this depth so that
/// the division never produces NaN or infinity; the resulting pixel
/// coordinates are then clamped to the image bounds.
const MIN_DEPTH: f64 = 1e-6;

/// Image size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Represents the intrinsic parameters of a pinhole camera
///
/// # Fields
///
/// * `fx` - The focal length in the x direction
/// * `fy` - The focal length in the y direction
/// * `cx` - The x coordinate of the principal point
/// * `cy` - The y coordinate of the principal point
#[derive(Clone, Copy, Debug)]
pub struct CameraIntrinsic {
    /// The focal length in the x direction
    pub fx: f64,
    /// The focal length in the y direction
    pub fy: f64,
    /// The x coordinate of the principal point
    pub cx: f64,
    /// The y coordinate of the principal point
    pub cy: f64,
}

impl CameraIntrinsic {
    /// Returns the 3x3 camera matrix K.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }
}

/// Represents the polynomial distortion parameters of a camera
///
/// The five-coefficient OpenCV model: three radial terms and two
/// tangential terms.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The first tangential distortion coefficient
    pub p1: f64,
    /// The second tangential distortion coefficient
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Distort an ideal pixel coordinate.
    ///
    /// # Arguments
    ///
    /// * `x` - The x coordinate of the ideal (undistorted) pixel
    /// * `y` - The y coordinate of the ideal (undistorted) pixel
    /// * `intrinsic` - The intrinsic parameters of the camera
    ///
    /// # Returns
    ///
    /// The pixel coordinate the lens maps the point to.
    pub fn distort_point(&self, x: f64, y: f64, intrinsic: &CameraIntrinsic) -> (f64, f64) {
        let (fx, fy, cx, cy) = (intrinsic.fx, intrinsic.fy, intrinsic.cx, intrinsic.cy);

        // normalize the coordinates
        let x = (x - cx) / fx;
        let y = (y - cy) / fy;

        // calculate the radial distance
        let r2 = x * x + y * y;

        // radial distortion
        let kr = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;

        // tangential distortion
        let xd = x * kr + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * kr + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        // denormalize the coordinates
        (fx * xd + cx, fy * yd + cy)
    }
}

/// Represents the extrinsic parameters of a camera mapping world to camera frame.
#[derive(Clone, Copy, Debug)]
pub struct CameraExtrinsic {
    /// The rotation matrix of the camera 3x3
    pub rotation: DMat3,
    /// The translation vector of the camera 3x1
    pub translation: DVec3,
}

impl CameraExtrinsic {
    /// Build an extrinsic from row-major nested arrays, as stored on disk.
    pub fn from_arrays(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            // from_cols_array_2d consumes columns, the files store rows
            rotation: DMat3::from_cols_array_2d(&rotation).transpose(),
            translation: DVec3::from_array(translation),
        }
    }
}

/// A calibrated camera: intrinsics, optional distortion, pose and resolution.
///
/// Immutable after construction; owned by the [`crate::CalibrationSet`].
#[derive(Clone, Debug)]
pub struct CameraModel {
    name: String,
    intrinsic: CameraIntrinsic,
    distortion: Option<PolynomialDistortion>,
    extrinsic: CameraExtrinsic,
    resolution: ImageSize,
}

impl CameraModel {
    /// Create a new camera model, validating the intrinsic parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CalibError::InvalidIntrinsics`] if the focal lengths are not
    /// strictly positive and finite, the principal point is not finite, or
    /// the resolution is zero.
    pub fn new(
        name: impl Into<String>,
        intrinsic: CameraIntrinsic,
        distortion: Option<PolynomialDistortion>,
        extrinsic: CameraExtrinsic,
        resolution: ImageSize,
    ) -> Result<Self, CalibError> {
        let name = name.into();
        if !(intrinsic.fx.is_finite() && intrinsic.fx > 0.0)
            || !(intrinsic.fy.is_finite() && intrinsic.fy > 0.0)
        {
            return Err(CalibError::InvalidIntrinsics {
                name,
                reason: format!(
                    "focal lengths must be positive, got fx={} fy={}",
                    intrinsic.fx, intrinsic.fy
                ),
            });
        }
        if !intrinsic.cx.is_finite() || !intrinsic.cy.is_finite() {
            return Err(CalibError::InvalidIntrinsics {
                name,
                reason: "principal point must be finite".to_string(),
            });
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CalibError::InvalidIntrinsics {
                name,
                reason: format!("resolution must be non-zero, got {}", resolution),
            });
        }
        Ok(Self {
            name,
            intrinsic,
            distortion,
            extrinsic,
            resolution,
        })
    }

    /// The camera name, i.e. the calibration file stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The intrinsic parameters.
    pub fn intrinsic(&self) -> &CameraIntrinsic {
        &self.intrinsic
    }

    /// The distortion parameters, if the calibration carries any.
    pub fn distortion(&self) -> Option<&PolynomialDistortion> {
        self.distortion.as_ref()
    }

    /// The extrinsic pose mapping world to camera frame.
    pub fn extrinsic(&self) -> &CameraExtrinsic {
        &self.extrinsic
    }

    /// The sensor resolution in pixels.
    pub fn resolution(&self) -> ImageSize {
        self.resolution
    }

    /// Project a 3D world point to pixel coordinates without clamping.
    ///
    /// Useful for calibration diagnostics where out-of-frame coordinates are
    /// meaningful. The depth is still kept away from zero so the result is
    /// never NaN or infinite.
    pub fn project_point_unclamped(&self, point: DVec3) -> DVec2 {
        let pc = self.extrinsic.rotation * point + self.extrinsic.translation;
        let depth = if pc.z.abs() < MIN_DEPTH {
            MIN_DEPTH.copysign(pc.z)
        } else {
            pc.z
        };
        let x = self.intrinsic.fx * pc.x / depth + self.intrinsic.cx;
        let y = self.intrinsic.fy * pc.y / depth + self.intrinsic.cy;
        match &self.distortion {
            Some(distortion) => {
                let (xd, yd) = distortion.distort_point(x, y, &self.intrinsic);
                DVec2::new(xd, yd)
            }
            None => DVec2::new(x, y),
        }
    }

    /// Project a 3D world point to pixel coordinates.
    ///
    /// The result is clamped to `[0, width-1] x [0, height-1]`. Points behind
    /// the camera or at near-zero depth land on the image edge instead of
    /// producing NaN or negative indices; out-of-frame is expected physics
    /// here, not an error.
    pub fn project_point(&self, point: DVec3) -> DVec2 {
        let p = self.project_point_unclamped(point);
        DVec2::new(
            p.x.clamp(0.0, (self.resolution.width - 1) as f64),
            p.y.clamp(0.0, (self.resolution.height - 1) as f64),
        )
    }

    /// The combined `K * [R|t]` 3x4 projection matrix, row-major.
    ///
    /// Consistent with [`Self::project_point`] up to distortion and clamping.
    pub fn projection_matrix(&self) -> [[f64; 4]; 3] {
        let k = self.intrinsic.matrix();
        let r = self.extrinsic.rotation;
        let t = self.extrinsic.translation;
        let mut m = [[0.0; 4]; 3];
        for i in 0..3 {
            for j in 0..3 {
                m[i][j] = (0..3).map(|l| k.row(i)[l] * r.row(l)[j]).sum();
            }
            m[i][3] = k.row(i).dot(t);
        }
        m
    }
}
