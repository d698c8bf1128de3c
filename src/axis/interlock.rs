// Cross-axis safety rules
//
// Some targets are only safe for a given position of another axis
// (e.g. the scanner head tilting while the carriage is raised).
// Rules read the last known position of every axis from `RigState`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::AxisLabel;

/// Last known position of every axis, in base units (mm or rad)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RigState {
    pub x_rot: f64,
    pub y_rot: f64,
    pub y_lin: f64,
    pub z_lin: f64,
    pub target_tilt: f64,
}

impl RigState {
    pub fn get(&self, label: AxisLabel) -> f64 {
        match label {
            AxisLabel::XRot => self.x_rot,
            AxisLabel::YRot => self.y_rot,
            AxisLabel::YLin => self.y_lin,
            AxisLabel::ZLin => self.z_lin,
            AxisLabel::TargetTilt => self.target_tilt,
        }
    }

    pub fn set(&mut self, label: AxisLabel, value: f64) {
        match label {
            AxisLabel::XRot => self.x_rot = value,
            AxisLabel::YRot => self.y_rot = value,
            AxisLabel::YLin => self.y_lin = value,
            AxisLabel::ZLin => self.z_lin = value,
            AxisLabel::TargetTilt => self.target_tilt = value,
        }
    }
}

/// Rule table for one rig geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interlock {
    /// Stages on the ASCII chain
    #[default]
    AsciiRig,
    /// Stepper drivers on the Modbus link
    ModbusRig,
}

// ASCII rig geometry (mm)
const ASCII_Z_CLEARANCE: f64 = 240.0;
const ASCII_Z_REACH: f64 = 590.0;
const ASCII_Y_ROT_ARM: f64 = 150.0;
const ASCII_Y_CLEAR_BELOW: f64 = 200.0;
const ASCII_Y_CLEAR_ABOVE: f64 = 420.0;
const ASCII_Y_CLEARANCE: f64 = 725.0;
const ASCII_Y_REACH: f64 = 811.0;
const ASCII_X_ROT_ARM: f64 = 115.0;

// Modbus rig geometry (mm)
const MODBUS_Z_CLEARANCE: f64 = 450.0;
const MODBUS_Z_REACH: f64 = 610.0;
const MODBUS_ARM: f64 = 160.0;
const MODBUS_Y_ROT_FREE: f64 = 50.0 * PI / 180.0;

/// Largest rotation allowed when `reach - position` mm is left over an arm of `arm` mm
fn clearance_angle(reach: f64, position: f64, arm: f64) -> f64 {
    ((reach - position) / arm).atan()
}

impl Interlock {
    /// Static closed bounds (base units) for an axis on this rig
    pub fn default_bounds(&self, label: AxisLabel) -> (f64, f64) {
        match (self, label) {
            (_, AxisLabel::YLin) => (0.0, 750.0),
            (Interlock::AsciiRig, AxisLabel::ZLin) => (0.0, 500.0),
            (Interlock::ModbusRig, AxisLabel::ZLin) => (0.0, 550.0),
            (_, AxisLabel::XRot) => (-1.3264502315156905, 0.8028514559173916),
            (_, AxisLabel::YRot) | (_, AxisLabel::TargetTilt) => (-2.0 * PI, 2.0 * PI),
        }
    }

    /// Check `target` (base units) for `label` against the other axes.
    /// Returns the reason when the move is unsafe.
    pub fn check(&self, label: AxisLabel, target: f64, state: &RigState) -> Result<(), String> {
        match self {
            Interlock::AsciiRig => Self::check_ascii(label, target, state),
            Interlock::ModbusRig => Self::check_modbus(label, target, state),
        }
    }

    fn check_ascii(label: AxisLabel, target: f64, state: &RigState) -> Result<(), String> {
        match label {
            AxisLabel::YRot if state.z_lin > ASCII_Z_CLEARANCE => {
                let limit = clearance_angle(ASCII_Z_REACH, state.z_lin, ASCII_Y_ROT_ARM);
                let clear_of_frame =
                    state.y_lin < ASCII_Y_CLEAR_BELOW || state.y_lin > ASCII_Y_CLEAR_ABOVE;
                if target.abs() < limit || clear_of_frame {
                    Ok(())
                } else {
                    Err(format!(
                        "|y_rot| {:.4} rad must stay below {:.4} rad with z_lin at {:.1} mm and y_lin at {:.1} mm",
                        target.abs(),
                        limit,
                        state.z_lin,
                        state.y_lin
                    ))
                }
            }
            AxisLabel::XRot if state.y_lin > ASCII_Y_CLEARANCE => {
                let limit = clearance_angle(ASCII_Y_REACH, state.y_lin, ASCII_X_ROT_ARM);
                if target.abs() < limit {
                    Ok(())
                } else {
                    Err(format!(
                        "|x_rot| {:.4} rad must stay below {:.4} rad with y_lin at {:.1} mm",
                        target.abs(),
                        limit,
                        state.y_lin
                    ))
                }
            }
            AxisLabel::YLin if target > ASCII_Y_CLEARANCE => {
                let limit = clearance_angle(ASCII_Y_REACH, target, ASCII_X_ROT_ARM);
                if state.x_rot.abs() < limit {
                    Ok(())
                } else {
                    Err(format!(
                        "y_lin {:.1} mm needs |x_rot| below {:.4} rad, x_rot is {:.4} rad",
                        target, limit, state.x_rot
                    ))
                }
            }
            AxisLabel::ZLin if target > ASCII_Z_CLEARANCE => {
                let limit = clearance_angle(ASCII_Z_REACH, target, ASCII_Y_ROT_ARM);
                if state.y_rot.abs() < limit {
                    Ok(())
                } else {
                    Err(format!(
                        "z_lin {:.1} mm needs |y_rot| below {:.4} rad, y_rot is {:.4} rad",
                        target, limit, state.y_rot
                    ))
                }
            }
            _ => Ok(()),
        }
    }

    fn check_modbus(label: AxisLabel, target: f64, state: &RigState) -> Result<(), String> {
        match label {
            AxisLabel::TargetTilt => Ok(()),
            AxisLabel::XRot | AxisLabel::YRot if state.z_lin > MODBUS_Z_CLEARANCE => {
                let limit = clearance_angle(MODBUS_Z_REACH, state.z_lin, MODBUS_ARM);
                if target.abs() < limit {
                    Ok(())
                } else {
                    Err(format!(
                        "|{}| {:.4} rad must stay below {:.4} rad with z_lin at {:.1} mm",
                        label,
                        target.abs(),
                        limit,
                        state.z_lin
                    ))
                }
            }
            AxisLabel::YLin | AxisLabel::ZLin
                if state.y_rot.abs() > MODBUS_Y_ROT_FREE && target > MODBUS_Z_CLEARANCE =>
            {
                let limit = clearance_angle(MODBUS_Z_REACH, target, MODBUS_ARM);
                if state.y_rot.abs() < limit {
                    Ok(())
                } else {
                    Err(format!(
                        "{} {:.1} mm needs |y_rot| below {:.4} rad, y_rot is {:.4} rad",
                        label, target, limit, state.y_rot
                    ))
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(y_lin: f64, z_lin: f64, x_rot: f64, y_rot: f64) -> RigState {
        RigState {
            x_rot,
            y_rot,
            y_lin,
            z_lin,
            target_tilt: 0.0,
        }
    }

    #[test]
    fn test_ascii_y_rot_free_below_clearance() {
        let s = state(300.0, 200.0, 0.0, 0.0);
        assert!(Interlock::AsciiRig.check(AxisLabel::YRot, PI, &s).is_ok());
    }

    #[test]
    fn test_ascii_y_rot_limited_when_raised() {
        // z = 440 -> limit = atan(1) = 45 deg
        let s = state(300.0, 440.0, 0.0, 0.0);
        let rig = Interlock::AsciiRig;
        assert!(rig.check(AxisLabel::YRot, 40f64.to_radians(), &s).is_ok());
        assert!(rig.check(AxisLabel::YRot, -50f64.to_radians(), &s).is_err());

        // Carriage clear of the frame on either side
        let below = state(150.0, 440.0, 0.0, 0.0);
        let above = state(500.0, 440.0, 0.0, 0.0);
        assert!(rig.check(AxisLabel::YRot, PI, &below).is_ok());
        assert!(rig.check(AxisLabel::YRot, PI, &above).is_ok());
    }

    #[test]
    fn test_ascii_z_lin_uses_y_rot() {
        let rig = Interlock::AsciiRig;
        let flipped = state(300.0, 0.0, 0.0, PI);
        let level = state(300.0, 0.0, 1.0, 0.0);
        assert!(rig.check(AxisLabel::ZLin, 300.0, &flipped).is_err());
        // x_rot has no say over z_lin
        assert!(rig.check(AxisLabel::ZLin, 300.0, &level).is_ok());
        assert!(rig.check(AxisLabel::ZLin, 200.0, &flipped).is_ok());
    }

    #[test]
    fn test_ascii_y_lin_and_x_rot_pair() {
        let rig = Interlock::AsciiRig;
        // y = 696 -> limit = atan(1) = 45 deg, but rule only applies past 725
        let tilted = state(0.0, 0.0, 0.5, 0.0);
        assert!(rig.check(AxisLabel::YLin, 700.0, &tilted).is_ok());
        // y = 740 -> limit = atan(71/115) ~ 0.553 rad
        assert!(rig.check(AxisLabel::YLin, 740.0, &tilted).is_ok());
        let steep = state(0.0, 0.0, 0.6, 0.0);
        assert!(rig.check(AxisLabel::YLin, 740.0, &steep).is_err());

        let far = state(740.0, 0.0, 0.0, 0.0);
        assert!(rig.check(AxisLabel::XRot, 0.5, &far).is_ok());
        assert!(rig.check(AxisLabel::XRot, -0.6, &far).is_err());
    }

    #[test]
    fn test_modbus_rotary_limited_when_raised() {
        let rig = Interlock::ModbusRig;
        // z = 450 is not past the clearance
        let at_clearance = state(0.0, 450.0, 0.0, 0.0);
        assert!(rig.check(AxisLabel::YRot, PI, &at_clearance).is_ok());

        // z = 530 -> limit = atan(0.5) ~ 0.4636 rad
        let raised = state(0.0, 530.0, 0.0, 0.0);
        assert!(rig.check(AxisLabel::XRot, 0.4, &raised).is_ok());
        assert!(rig.check(AxisLabel::YRot, 0.5, &raised).is_err());
        assert!(rig.check(AxisLabel::TargetTilt, PI, &raised).is_ok());
    }

    #[test]
    fn test_modbus_linear_limited_when_flipped() {
        let rig = Interlock::ModbusRig;
        let flipped = state(0.0, 0.0, 0.0, PI);
        assert!(rig.check(AxisLabel::ZLin, 400.0, &flipped).is_ok());
        assert!(rig.check(AxisLabel::ZLin, 500.0, &flipped).is_err());

        // Under 50 deg the linear axes are free
        let slight = state(0.0, 0.0, 0.0, 40f64.to_radians());
        assert!(rig.check(AxisLabel::ZLin, 540.0, &slight).is_ok());
    }

    #[test]
    fn test_default_bounds() {
        assert_eq!(
            Interlock::AsciiRig.default_bounds(AxisLabel::ZLin),
            (0.0, 500.0)
        );
        assert_eq!(
            Interlock::ModbusRig.default_bounds(AxisLabel::ZLin),
            (0.0, 550.0)
        );
        let (lo, hi) = Interlock::AsciiRig.default_bounds(AxisLabel::XRot);
        assert!((lo.to_degrees() + 76.0).abs() < 1e-9, "x_rot lower bound is -76 deg");
        assert!((hi.to_degrees() - 46.0).abs() < 1e-9, "x_rot upper bound is 46 deg");
    }

    #[test]
    fn test_state_get_set() {
        let mut s = RigState::default();
        for (i, label) in AxisLabel::ALL.iter().enumerate() {
            s.set(*label, i as f64);
        }
        assert_eq!(s.get(AxisLabel::TargetTilt), 4.0);
        assert_eq!(s.y_lin, 0.0);
    }
}
