// Rig kinematics
//
// Closed-form geometry of the scanner head relative to the calibration target.
// All functions are pure: lengths in mm, angles in rad.

use crate::axis::AxisLabel;
use crate::calibration_log::ProjectorPose;

/// Valid attack angles for the closed-form solver (deg)
pub const ATTACK_MIN_DEG: f64 = -38.0;
pub const ATTACK_MAX_DEG: f64 = 37.0;

// Home geometry
const Y_LIN_HOME: f64 = 355.1;
const Z_LIN_HOME: f64 = 286.511;
const X_ROT_TRIM: f64 = 0.04345051714379008;

// Scanner head geometry
const Z_REACH: f64 = 609.73;
const HEAD_ARM: f64 = 110.0;
const HEAD_ARM_ANGLE: f64 = 0.070628;
const Y_TRIM: f64 = 7.75;

// Left/right fixture spacing and step (mm)
const LR_SPACING: f64 = 12.0;
const LR_STEP: f64 = 10.0;

/// Home offset of every axis, in base units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomeOffsets {
    pub y_lin: f64,
    pub z_lin: f64,
    pub x_rot: f64,
    pub y_rot: f64,
    pub target_tilt: f64,
}

impl HomeOffsets {
    pub fn get(&self, label: AxisLabel) -> f64 {
        match label {
            AxisLabel::YLin => self.y_lin,
            AxisLabel::ZLin => self.z_lin,
            AxisLabel::XRot => self.x_rot,
            AxisLabel::YRot => self.y_rot,
            AxisLabel::TargetTilt => self.target_tilt,
        }
    }
}

/// Home offsets for a working distance, scanner tilt and target tilt
pub fn home_offsets(working_distance: f64, scanner_tilt: f64, target_tilt: f64) -> HomeOffsets {
    HomeOffsets {
        y_lin: Y_LIN_HOME + working_distance * scanner_tilt.sin(),
        z_lin: Z_LIN_HOME + working_distance - working_distance * scanner_tilt.cos(),
        x_rot: scanner_tilt - X_ROT_TRIM,
        y_rot: 0.0,
        target_tilt: target_tilt + scanner_tilt,
    }
}

/// Absolute targets that put the scanner at an attack angle to the target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackTargets {
    pub z_lin: f64,
    pub y_lin: f64,
    pub x_rot: f64,
}

pub fn attack_in_range(degrees: f64) -> bool {
    (ATTACK_MIN_DEG..=ATTACK_MAX_DEG).contains(&degrees)
}

/// Solve the linear targets for `attack` (rad) around the current home offsets
pub fn attack_targets(attack: f64, working_distance: f64, y_home: f64, z_home: f64) -> AttackTargets {
    let z_lin = z_home
        + (Z_REACH
            - (working_distance * attack.cos() + HEAD_ARM * (attack - HEAD_ARM_ANGLE).cos()));

    let y_lin = if attack > 0.0 {
        y_home + (working_distance * attack.sin() + HEAD_ARM * (attack - HEAD_ARM_ANGLE).sin() + Y_TRIM)
    } else if attack < 0.0 {
        let a = attack.abs();
        y_home - (working_distance * a.sin() + HEAD_ARM * (a + HEAD_ARM_ANGLE).sin() - Y_TRIM)
    } else {
        y_home
    };

    AttackTargets {
        z_lin,
        y_lin,
        x_rot: attack,
    }
}

/// Fixture pose (left, right steps) to (target rotation in rad, distance in mm)
pub fn lr_pose_to_angle_distance(left: f64, right: f64, working_distance: f64) -> (f64, f64) {
    let angle = ((right - left) / LR_SPACING).atan();
    let distance = working_distance + LR_STEP * (left + right) / 2.0;
    (angle, distance)
}

/// Home offset corrections that bring a measured projector pose onto the nominal one
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlignmentCorrection {
    pub y_lin: f64,
    pub z_lin: f64,
    pub y_rot: f64,
}

pub fn alignment_correction(
    measured: &ProjectorPose,
    attack: f64,
    working_distance: f64,
) -> AlignmentCorrection {
    let py_target = -working_distance * attack.sin();
    let pz_target = (working_distance * attack.cos()).abs();
    let ry_target = 0.0;

    AlignmentCorrection {
        z_lin: measured.pz - pz_target,
        y_lin: measured.py - py_target,
        y_rot: ry_target - measured.ry,
    }
}
