// Stored platform positions
//
// Absolute positions in base units (mm or rad), measured on the stock rig.

use std::f64::consts::PI;

use crate::axis::AxisLabel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub positions: &'static [(AxisLabel, f64)],
}

/// Positions for calibrating against the target
pub const CALIBRATION: &[Preset] = &[
    Preset {
        name: "golden",
        positions: &[
            (AxisLabel::YLin, 284.21781445312484),
            (AxisLabel::ZLin, 214.94824609374987),
            (AxisLabel::XRot, -0.032078606236264524),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "scan_platform",
        positions: &[
            (AxisLabel::YLin, 372.2570917968748),
            (AxisLabel::ZLin, 200.0),
            (AxisLabel::XRot, 0.0),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "tiltedu",
        positions: &[
            (AxisLabel::YLin, 364.87410058593736),
            (AxisLabel::ZLin, 245.94827441406235),
            (AxisLabel::XRot, 0.0),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "tiltedd",
        positions: &[
            (AxisLabel::YLin, 380.7980937499998),
            (AxisLabel::ZLin, 245.94827441406235),
            (AxisLabel::XRot, 0.0),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "scan_platform-derive",
        positions: &[
            (AxisLabel::YLin, 354.07426367187486),
            (AxisLabel::ZLin, 101.34922460937494),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "golden-derive",
        positions: &[
            (AxisLabel::YLin, 30.275609374999984),
            (AxisLabel::ZLin, 101.34922460937494),
            (AxisLabel::XRot, -0.3905965053654622),
            (AxisLabel::YRot, 0.0),
        ],
    },
    Preset {
        name: "Optimus-LP",
        positions: &[
            (AxisLabel::XRot, -0.5515254071686861),
            (AxisLabel::YLin, 47.00004589843748),
            (AxisLabel::YRot, 0.0),
            (AxisLabel::ZLin, 352.91166796874984),
        ],
    },
];

/// Positions for scanning the ball plate (scanner turned around)
pub const BALLPLATE: &[Preset] = &[
    Preset {
        name: "mounted",
        positions: &[
            (AxisLabel::YLin, 363.1311992187498),
            (AxisLabel::ZLin, 122.24871433593742),
            (AxisLabel::YRot, PI),
        ],
    },
    Preset {
        name: "unmounted",
        positions: &[
            (AxisLabel::YLin, 464.19082910156226),
            (AxisLabel::ZLin, 134.76312304687494),
            (AxisLabel::XRot, -0.032078606236264524),
            (AxisLabel::YRot, PI),
        ],
    },
    Preset {
        name: "tilted",
        positions: &[
            (AxisLabel::YLin, 364.87410058593736),
            (AxisLabel::ZLin, 134.76312304687494),
            (AxisLabel::XRot, 0.0),
            (AxisLabel::YRot, PI),
        ],
    },
    Preset {
        name: "mounted-derive",
        positions: &[
            (AxisLabel::YLin, 132.20972851562493),
            (AxisLabel::ZLin, 152.24869140624992),
            (AxisLabel::XRot, -0.3905965053654622),
            (AxisLabel::YRot, PI),
        ],
    },
    Preset {
        name: "Optimus-LP",
        positions: &[
            (AxisLabel::XRot, -0.5515254071686861),
            (AxisLabel::YLin, 47.00004589843748),
            (AxisLabel::YRot, PI),
            (AxisLabel::ZLin, 235.24889648437488),
        ],
    },
];

pub const DEFAULT_CALIBRATION: &str = "scan_platform";
pub const DEFAULT_BALLPLATE: &str = "mounted";

fn find(table: &'static [Preset], name: &str) -> Option<&'static Preset> {
    table.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

pub fn calibration(name: &str) -> Option<&'static Preset> {
    find(CALIBRATION, name)
}

pub fn ballplate(name: &str) -> Option<&'static Preset> {
    find(BALLPLATE, name)
}
