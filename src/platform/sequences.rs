// Calibration and alignment runs that drive the rig and the scan application together

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::kinematics::{AlignmentCorrection, alignment_correction};
use super::{Platform, Result, Target};
use crate::axis::AxisLabel;
use crate::calibration_log;
use crate::messages::TargetType;
use crate::poses::GOLDEN;
use crate::scan_app::{ScanApp, ScanAppError};
use crate::units::Unit;

/// Archive the alignment calibrations are exported to
fn alignment_export() -> PathBuf {
    std::env::temp_dir().join("alignment-calibration.zip")
}

/// Capture one view per fixture pose
fn capture_views<R: BufRead, W: Write>(
    platform: &mut Platform,
    app: &mut ScanApp<R, W>,
    poses: &[(f64, f64)],
) -> Result<()> {
    for &(left, right) in poses {
        platform.move_to_lr_pose(left, right)?;
        info!("Pose ({}, {}): capturing view", left, right);
        match app.add_calibration_view(None, TargetType::FlatPlate) {
            Ok(()) => {}
            Err(e @ ScanAppError::ViewCaptureFailed { .. }) => {
                warn!("Failed to add calibration view at ({}, {}): {}", left, right, e)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Calibrate once per output archive from views at every golden pose
pub fn calibrate<R: BufRead, W: Write>(
    platform: &mut Platform,
    app: &mut ScanApp<R, W>,
    paths: &[&str],
    preset: &str,
    x_rot_deg: f64,
) -> Result<()> {
    platform.move_degrees(AxisLabel::XRot, x_rot_deg)?;
    platform.calibrate_position(Target::Preset(preset))?;

    for path in paths {
        capture_views(platform, app, &GOLDEN)?;
        app.calibrate(path, true)?;
        info!("Calibration to {} done", path);
    }
    Ok(())
}

/// Fine-align the home offsets from calibrations at `attack_deg`.
/// Runs `trials` rounds of `poses` golden views; there is no convergence check.
pub fn align_sequence<R: BufRead, W: Write>(
    platform: &mut Platform,
    app: &mut ScanApp<R, W>,
    log_path: &Path,
    attack_deg: f64,
    poses: usize,
    trials: u32,
) -> Result<AlignmentCorrection> {
    platform.move_attack_angle(attack_deg, Unit::Degrees)?;
    platform.new_home()?;

    let attack = attack_deg.to_radians();
    let poses = &GOLDEN[..poses.clamp(1, GOLDEN.len())];
    let export = alignment_export();
    let mut correction = AlignmentCorrection::default();

    for trial in 0..trials {
        capture_views(platform, app, poses)?;
        app.calibrate(&export.to_string_lossy(), true)?;

        let measured = calibration_log::projector_pose(log_path)?;
        correction = alignment_correction(&measured, attack, platform.working_distance());
        info!("Alignment trial {}: correction {:?}", trial + 1, correction);

        for (label, delta) in [
            (AxisLabel::ZLin, correction.z_lin),
            (AxisLabel::YLin, correction.y_lin),
            (AxisLabel::YRot, correction.y_rot),
        ] {
            let axis = platform.axis_mut(label)?;
            let home = axis.home_offset();
            axis.set_home_base(home + delta);
        }
        platform.move_attack_angle(attack, Unit::Radians)?;
    }
    Ok(correction)
}

/// Change the target tilt (deg), then fine-align the home offsets for it
pub fn realign<R: BufRead, W: Write>(
    platform: &mut Platform,
    app: &mut ScanApp<R, W>,
    log_path: &Path,
    tilt_deg: f64,
    attack_deg: f64,
    poses: usize,
    trials: u32,
) -> Result<AlignmentCorrection> {
    platform.set_target_tilt(tilt_deg);
    align_sequence(platform, app, log_path, attack_deg, poses, trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use std::io::Cursor;
    use std::time::Duration;

    const OK: &str = r#"{"id":0,"result":null}"#;

    fn app(responses: usize) -> ScanApp<Cursor<Vec<u8>>, Vec<u8>> {
        let input = format!("{}\n", vec![OK; responses].join("\n"));
        ScanApp::new(Cursor::new(input.into_bytes()), Vec::new()).with_retry_delay(Duration::ZERO)
    }

    fn sent_methods(app: &ScanApp<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<String> {
        String::from_utf8(app.writer().clone())
            .unwrap()
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["method"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_calibrate_captures_every_golden_pose() {
        let (mut platform, log) = Platform::simulated(&RigConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("calib").to_string_lossy().into_owned();
        let mut app = app(2 * GOLDEN.len() + 2);

        calibrate(&mut platform, &mut app, &[&out], "scan_platform", 0.0).unwrap();

        let methods = sent_methods(&app);
        let views = methods.iter().filter(|m| *m == "AddCalibrationView").count();
        assert_eq!(views, GOLDEN.len());
        assert_eq!(methods[methods.len() - 2], "CalibrateUsingFlatPlateTarget");
        assert_eq!(methods[methods.len() - 1], "DeleteCalibrationViews");
        assert!(log.move_count() > GOLDEN.len());
    }

    /// Calibration log whose projector sits `extra_z` mm further away than nominal
    fn write_log(dir: &Path, attack: f64, wd: f64, extra_z: f64) -> PathBuf {
        let log_path = dir.join("calibration.log");
        let pz = (wd * attack.cos()).abs() + extra_z;
        let py = -wd * attack.sin();
        std::fs::write(
            &log_path,
            format!(
                "<calibrationLog><calibrationInfo><projectorModel><pose>\
                 <position x=\"0\" y=\"{}\" z=\"{}\"/><rotation rx=\"0\" ry=\"0\" rz=\"0\"/>\
                 </pose></projectorModel></calibrationInfo></calibrationLog>",
                py, pz
            ),
        )
        .unwrap();
        log_path
    }

    #[test]
    fn test_align_sequence_shifts_home_offsets() {
        let (mut platform, _) = Platform::simulated(&RigConfig::default());
        let attack = (-15f64).to_radians();
        let wd = platform.working_distance();
        let dir = tempfile::tempdir().unwrap();
        let log_path = write_log(dir.path(), attack, wd, 1.0);

        let mut app = app(2 * (2 * 2 + 2));
        let correction =
            align_sequence(&mut platform, &mut app, &log_path, -15.0, 2, 2).unwrap();

        assert!((correction.z_lin - 1.0).abs() < 1e-9);
        assert!(correction.y_lin.abs() < 1e-9);
        let views = sent_methods(&app)
            .iter()
            .filter(|m| *m == "AddCalibrationView")
            .count();
        assert_eq!(views, 4, "two poses in each of two trials");
    }

    #[test]
    fn test_realign_changes_tilt_first() {
        let (mut platform, _) = Platform::simulated(&RigConfig::default());
        let attack = (-15f64).to_radians();
        let wd = platform.working_distance();
        let dir = tempfile::tempdir().unwrap();
        let log_path = write_log(dir.path(), attack, wd, 0.0);

        let mut app = app(2 * 2 + 2);
        let correction =
            realign(&mut platform, &mut app, &log_path, -10.0, -15.0, 2, 1).unwrap();

        assert!((platform.target_tilt().to_degrees() + 10.0).abs() < 1e-9);
        assert!(correction.z_lin.abs() < 1e-9);
    }
}
