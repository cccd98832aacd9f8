use argh::FromArgs;
use glam::DVec3;
use ndarray::Array5;

use volpose_calib::{CalibrationSet, CameraExtrinsic, CameraIntrinsic, CameraModel, ImageSize};
use volpose_repro::{HeatmapBatch, ReprojectionLayer, SamplingGrid};

#[derive(FromArgs)]
/// Fuse synthetic multi-camera heatmaps into a 3D volume
struct Args {
    /// edge length of the sampling cube in mm
    #[argh(option, default = "160.0")]
    cube_size: f64,

    /// grid spacing in mm
    #[argh(option, default = "10.0")]
    spacing: f64,

    /// x/y/z of the simulated keypoint in mm
    #[argh(option, default = "30.0")]
    target: f64,
}

/// Four synthetic cameras on the coordinate axes, looking at the origin.
fn make_rig() -> Result<CalibrationSet, Box<dyn std::error::Error>> {
    let intrinsic = CameraIntrinsic {
        fx: 600.0,
        fy: 600.0,
        cx: 640.0,
        cy: 512.0,
    };
    let resolution = ImageSize {
        width: 1280,
        height: 1024,
    };
    let rotations: [[[f64; 3]; 3]; 4] = [
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]],
        [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]],
        [[0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
    ];
    let mut cameras = Vec::new();
    for (i, rotation) in rotations.iter().enumerate() {
        cameras.push(CameraModel::new(
            format!("camera_{i}"),
            intrinsic,
            None,
            CameraExtrinsic::from_arrays(*rotation, [0.0, 0.0, 2000.0]),
            resolution,
        )?);
    }
    Ok(CalibrationSet::from_cameras(cameras)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let rig = make_rig()?;
    let grid = SamplingGrid::new(args.cube_size, args.spacing)?;
    let scale = 2usize;
    let mut layer = ReprojectionLayer::new(&rig, grid, scale)?;

    // a gaussian blob in each camera view, consistent with one 3D point
    let target = DVec3::splat(args.target);
    let (height, width) = (1024 / scale, 1280 / scale);
    let mut data = Array5::<f32>::zeros((1, rig.num_cameras(), 1, height, width));
    for (c, camera) in rig.cameras().enumerate() {
        let pixel = camera.project_point(target);
        let (pr, pc) = (pixel.y / scale as f64, pixel.x / scale as f64);
        for row in 0..height {
            for col in 0..width {
                let d2 = (row as f64 - pr).powi(2) + (col as f64 - pc).powi(2);
                data[[0, c, 0, row, col]] = (-d2 / 8.0).exp() as f32;
            }
        }
        log::info!(
            "{}: target projects to heatmap pixel ({:.1}, {:.1})",
            camera.name(),
            pc,
            pr
        );
    }
    let heatmaps = HeatmapBatch::from_array(data)?;

    let volume = layer.forward(&heatmaps, &[DVec3::ZERO])?;
    let (cell, value) = volume.argmax(0, 0);
    let half = (layer.grid().resolution() / 2) as f64;
    let recovered = DVec3::new(
        (cell[0] as f64 - half) * args.spacing,
        (cell[1] as f64 - half) * args.spacing,
        (cell[2] as f64 - half) * args.spacing,
    );

    println!("simulated keypoint: {target:?}");
    println!("volume peak {value:.3} at cell {cell:?} -> {recovered:?}");
    Ok(())
}
