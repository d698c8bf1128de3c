// Engineering units and per-vendor conversion factors to native device counts

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Unit a move target or a position reading is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Millimetres,
    Radians,
    Degrees,
    /// Raw device counts
    Native,
}

impl Unit {
    /// Detect a unit from a pose-file column key such as `y_lin_mm` or `attack deg`
    pub fn from_key(key: &str) -> Option<Unit> {
        let key = key.to_ascii_lowercase();
        if key.contains("mm") {
            Some(Unit::Millimetres)
        } else if key.contains("deg") {
            Some(Unit::Degrees)
        } else if key.contains("rad") {
            Some(Unit::Radians)
        } else {
            None
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::Millimetres => "mm",
            Unit::Radians => "rad",
            Unit::Degrees => "deg",
            Unit::Native => "counts",
        }
    }

    pub fn is_angular(&self) -> bool {
        matches!(self, Unit::Radians | Unit::Degrees)
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Scalar conversion between an axis base unit (mm or rad) and native counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    /// Native counts per base unit
    pub counts_per_base: f64,
    /// Native velocity = counts/s * velocity_scale
    #[serde(default = "default_velocity_scale")]
    pub velocity_scale: f64,
}

fn default_velocity_scale() -> f64 {
    1.0
}

/// ASCII-protocol stages: 0.1905625 um linear microstep
const ASCII_LINEAR_MICROSTEP_MM: f64 = 0.000_190_562_5;
/// ASCII-protocol stages: 0.000234375 deg rotary microstep
const ASCII_ROTARY_MICROSTEP_DEG: f64 = 0.000_234_375;
/// ASCII controllers take velocity in counts per 1/1.6384 s
const ASCII_VELOCITY_SCALE: f64 = 1.6384;

impl Conversion {
    /// Modbus driver, linear: 0.01 mm per count
    pub const MODBUS_LINEAR: Conversion = Conversion {
        counts_per_base: 100.0,
        velocity_scale: 1.0,
    };

    /// Modbus driver, rotary: 0.01 deg per count
    pub const MODBUS_ROTARY: Conversion = Conversion {
        counts_per_base: 18_000.0 / PI,
        velocity_scale: 1.0,
    };

    pub const ASCII_LINEAR: Conversion = Conversion {
        counts_per_base: 1.0 / ASCII_LINEAR_MICROSTEP_MM,
        velocity_scale: ASCII_VELOCITY_SCALE,
    };

    pub const ASCII_ROTARY: Conversion = Conversion {
        counts_per_base: 180.0 / PI / ASCII_ROTARY_MICROSTEP_DEG,
        velocity_scale: ASCII_VELOCITY_SCALE,
    };

    /// Base units (mm or rad) to the nearest native count
    pub fn to_counts(&self, base: f64) -> i64 {
        (base * self.counts_per_base).round() as i64
    }

    pub fn from_counts(&self, counts: i64) -> f64 {
        counts as f64 / self.counts_per_base
    }

    /// Base units per second to native velocity
    pub fn velocity_to_native(&self, base_per_s: f64) -> i64 {
        (base_per_s * self.counts_per_base * self.velocity_scale).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_from_key() {
        assert_eq!(Unit::from_key("y_lin_mm"), Some(Unit::Millimetres));
        assert_eq!(Unit::from_key("Attack Deg"), Some(Unit::Degrees));
        assert_eq!(Unit::from_key("x_rot rad"), Some(Unit::Radians));
        assert_eq!(Unit::from_key("z_lin"), None);
    }

    #[test]
    fn test_modbus_factors() {
        // 1 mm = 100 counts, 1 deg = 100 counts
        assert_eq!(Conversion::MODBUS_LINEAR.to_counts(12.34), 1234);
        assert_eq!(Conversion::MODBUS_ROTARY.to_counts(1f64.to_radians()), 100);
        assert_eq!(Conversion::MODBUS_ROTARY.to_counts(PI), 18_000);
    }

    #[test]
    fn test_ascii_factors() {
        let counts = Conversion::ASCII_LINEAR.to_counts(1.0);
        assert_eq!(counts, 5248);
        let counts = Conversion::ASCII_ROTARY.to_counts(1f64.to_radians());
        assert_eq!(counts, 4267);
    }

    #[test]
    fn test_counts_back_to_base() {
        let conv = Conversion::MODBUS_LINEAR;
        let mm = conv.from_counts(conv.to_counts(250.0));
        assert!((mm - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_scale_applied() {
        let native = Conversion::ASCII_LINEAR.velocity_to_native(1.0);
        let counts = Conversion::ASCII_LINEAR.counts_per_base;
        assert_eq!(native, (counts * 1.6384).round() as i64);
        assert_eq!(Conversion::MODBUS_LINEAR.velocity_to_native(2.0), 200);
    }
}
