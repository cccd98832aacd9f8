use std::path::Path;

use approx::assert_relative_eq;
use glam::DVec3;
use volpose_calib::{CalibError, CalibrationSet};

fn write_intrinsics(dir: &Path, name: &str, with_distortion: bool) {
    let distortion = if with_distortion {
        "[0.05, -0.01, 0.001, -0.002, 0.0]"
    } else {
        "null"
    };
    let json = format!(
        r#"{{
            "camera_matrix": [[600.0, 0.0, 640.0], [0.0, 600.0, 512.0], [0.0, 0.0, 1.0]],
            "distortion": {distortion},
            "resolution": [1280, 1024]
        }}"#
    );
    std::fs::write(dir.join(format!("{name}.json")), json).unwrap();
}

fn write_extrinsics(dir: &Path, name: &str, translation: [f64; 3]) {
    let json = format!(
        r#"{{
            "rotation": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            "translation": [{}, {}, {}]
        }}"#,
        translation[0], translation[1], translation[2]
    );
    std::fs::write(dir.join(format!("{name}.json")), json).unwrap();
}

fn setup_dirs(root: &Path, names: &[&str]) -> (std::path::PathBuf, std::path::PathBuf) {
    let intrinsics_dir = root.join("intrinsics");
    let extrinsics_dir = root.join("extrinsics");
    std::fs::create_dir_all(&intrinsics_dir).unwrap();
    std::fs::create_dir_all(&extrinsics_dir).unwrap();
    for name in names {
        write_intrinsics(&intrinsics_dir, name, false);
        write_extrinsics(&extrinsics_dir, name, [0.0, 0.0, 1000.0]);
    }
    (intrinsics_dir, extrinsics_dir)
}

#[test]
fn load_rig_from_json_files() {
    let tmp = tempfile::tempdir().unwrap();
    let (intrinsics_dir, extrinsics_dir) =
        setup_dirs(tmp.path(), &["camera_t", "camera_l", "camera_r"]);

    let rig = CalibrationSet::load(&intrinsics_dir, &extrinsics_dir).unwrap();
    assert_eq!(rig.num_cameras(), 3);
    // active order is sorted name order
    assert_eq!(rig.active_names(), ["camera_l", "camera_r", "camera_t"]);

    let resolution = rig.shared_resolution().unwrap();
    assert_eq!(resolution.width, 1280);
    assert_eq!(resolution.height, 1024);

    // identity rotation, camera 1000mm behind the origin along z
    let pixels = rig.reproject_point(DVec3::new(100.0, 0.0, 0.0));
    for pixel in pixels {
        assert_relative_eq!(pixel.x, 600.0 * 100.0 / 1000.0 + 640.0, epsilon = 1e-9);
        assert_relative_eq!(pixel.y, 512.0, epsilon = 1e-9);
    }
}

#[test]
fn camera_count_mismatch_is_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let (intrinsics_dir, extrinsics_dir) = setup_dirs(tmp.path(), &["cam_a", "cam_b"]);
    std::fs::remove_file(extrinsics_dir.join("cam_b.json")).unwrap();

    assert!(matches!(
        CalibrationSet::load(&intrinsics_dir, &extrinsics_dir),
        Err(CalibError::CameraCountMismatch {
            intrinsics: 2,
            extrinsics: 1
        })
    ));
}

#[test]
fn missing_calibration_for_renamed_camera() {
    let tmp = tempfile::tempdir().unwrap();
    let (intrinsics_dir, extrinsics_dir) = setup_dirs(tmp.path(), &["cam_a", "cam_b"]);
    // same count, but cam_b's extrinsics are filed under another name
    std::fs::rename(
        extrinsics_dir.join("cam_b.json"),
        extrinsics_dir.join("cam_z.json"),
    )
    .unwrap();

    assert!(matches!(
        CalibrationSet::load(&intrinsics_dir, &extrinsics_dir),
        Err(CalibError::MissingCalibration(name)) if name == "cam_b"
    ));
}

#[test]
fn missing_directory_is_an_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let result = CalibrationSet::load(&tmp.path().join("nope"), &tmp.path().join("nope"));
    assert!(matches!(result, Err(CalibError::Io(_))));
}

#[test]
fn distortion_is_loaded_and_applied() {
    let tmp = tempfile::tempdir().unwrap();
    let intrinsics_dir = tmp.path().join("intrinsics");
    let extrinsics_dir = tmp.path().join("extrinsics");
    std::fs::create_dir_all(&intrinsics_dir).unwrap();
    std::fs::create_dir_all(&extrinsics_dir).unwrap();
    write_intrinsics(&intrinsics_dir, "cam_a", true);
    write_extrinsics(&extrinsics_dir, "cam_a", [0.0, 0.0, 1000.0]);

    let rig = CalibrationSet::load(&intrinsics_dir, &extrinsics_dir).unwrap();
    let camera = rig.camera("cam_a").unwrap();
    assert!(camera.distortion().is_some());

    // an off-axis point must land away from its ideal pinhole position
    let ideal = 600.0 * 300.0 / 1000.0 + 640.0;
    let projected = camera.project_point(DVec3::new(300.0, 0.0, 0.0));
    assert!((projected.x - ideal).abs() > 1e-6);
}
