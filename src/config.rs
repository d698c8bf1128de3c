// Timeouts, ports, rig geometry defaults and the TOML rig description
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::axis::{AxisLabel, HomingMode, Interlock};
use crate::transport::OperationSettings;
use crate::units::Conversion;

// Jog loop frequency
pub const LOOP_HZ: u64 = 50;

// Jog watchdog: stop the axis when no key arrived within this window
pub const JOG_TIMEOUT: Duration = Duration::from_millis(250);

// Idle polling while waiting for a move to finish
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

// Serial ports for the two hardware links
pub const ASCII_PORT: &str = "/dev/ttyUSB0";
pub const MODBUS_PORT: &str = "/dev/ttyUSB1";

// Rig geometry
pub const DEFAULT_WORKING_DISTANCE: f64 = 470.0; // mm
pub const DEFAULT_TARGET_TILT_DEG: f64 = -15.0;
pub const DEFAULT_SCANNER_TILT_DEG: f64 = 0.0;

// Scan application retries
pub const VIEW_RETRIES: u32 = 10;
pub const SCAN_RETRIES: u32 = 6;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

// Config file looked up when --config is not given
pub const DEFAULT_CONFIG_PATH: &str = "rig.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid rig config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Axis {0} is configured more than once")]
    DuplicateAxis(AxisLabel),
}

/// Hardware link an axis is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Ascii,
    Modbus,
}

fn default_device_axis() -> u8 {
    1
}

fn default_direction() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// One axis of the rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub label: AxisLabel,
    pub protocol: Protocol,
    /// ASCII device number or Modbus slave address
    pub address: u8,
    /// Axis number on a multi-axis ASCII controller
    #[serde(default = "default_device_axis")]
    pub device_axis: u8,
    #[serde(default = "default_direction")]
    pub direction: f64,
    /// Closed bounds in mm or rad; the rig defaults when absent
    #[serde(default)]
    pub bounds: Option<(f64, f64)>,
    /// Overrides the vendor conversion table
    #[serde(default)]
    pub conversion: Option<Conversion>,
    #[serde(default)]
    pub homing: HomingMode,
    #[serde(default = "default_true")]
    pub wait_move: bool,
    /// Device settings written at startup (ASCII), e.g. `maxspeed`
    #[serde(default)]
    pub settings: BTreeMap<String, f64>,
    /// Direct data operation settings (Modbus)
    #[serde(default)]
    pub operation: Option<OperationSettings>,
}

impl AxisConfig {
    fn ascii(label: AxisLabel, address: u8, direction: f64, settings: &[(&str, f64)]) -> Self {
        Self {
            label,
            protocol: Protocol::Ascii,
            address,
            device_axis: 1,
            direction,
            bounds: None,
            conversion: None,
            homing: HomingMode::DeviceThenOffset,
            wait_move: true,
            settings: settings
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            operation: None,
        }
    }

    /// Conversion from the override or the vendor table
    pub fn conversion(&self) -> Conversion {
        if let Some(conversion) = self.conversion {
            return conversion;
        }
        let linear = self.label.kind() == crate::axis::AxisKind::Linear;
        match (self.protocol, linear) {
            (Protocol::Ascii, true) => Conversion::ASCII_LINEAR,
            (Protocol::Ascii, false) => Conversion::ASCII_ROTARY,
            (Protocol::Modbus, true) => Conversion::MODBUS_LINEAR,
            (Protocol::Modbus, false) => Conversion::MODBUS_ROTARY,
        }
    }

    /// Operation settings from the override or the driver defaults
    pub fn operation(&self) -> OperationSettings {
        self.operation.unwrap_or(match self.label.kind() {
            crate::axis::AxisKind::Linear => OperationSettings::LINEAR,
            _ => OperationSettings::ROTARY,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanAppConfig {
    pub view_retries: u32,
    pub scan_retries: u32,
    pub retry_delay_ms: u64,
    /// Folder searched for the newest `.3dscansetup` on reconnect
    pub setup_dir: Option<PathBuf>,
    /// Scan metadata document; the temp folder when absent
    pub metadata_path: Option<PathBuf>,
}

impl Default for ScanAppConfig {
    fn default() -> Self {
        Self {
            view_retries: VIEW_RETRIES,
            scan_retries: SCAN_RETRIES,
            retry_delay_ms: RETRY_DELAY.as_millis() as u64,
            setup_dir: None,
            metadata_path: None,
        }
    }
}

impl ScanAppConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Folder holding the hardware setups; the scan application's data folder by default
    pub fn setup_folder(&self) -> Option<PathBuf> {
        self.setup_dir
            .clone()
            .or_else(|| std::env::var_os("LOCALAPPDATA").map(PathBuf::from))
    }
}

/// Rig description loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Replace every hardware link with simulated axes
    pub simulate: bool,
    pub interlock: Interlock,
    pub ascii_port: String,
    pub modbus_port: String,
    pub working_distance: f64,
    pub target_tilt_deg: f64,
    pub scanner_tilt_deg: f64,
    pub axes: Vec<AxisConfig>,
    pub scan_app: ScanAppConfig,
}

impl Default for RigConfig {
    /// The stock rig: four ASCII stages and a Modbus target tilt
    fn default() -> Self {
        let tilt = AxisConfig {
            label: AxisLabel::TargetTilt,
            protocol: Protocol::Modbus,
            address: 3,
            device_axis: 1,
            direction: 1.0,
            bounds: None,
            conversion: None,
            homing: HomingMode::OffsetOnly,
            wait_move: true,
            settings: BTreeMap::new(),
            operation: Some(OperationSettings::ROTARY),
        };

        Self {
            simulate: false,
            interlock: Interlock::AsciiRig,
            ascii_port: ASCII_PORT.to_string(),
            modbus_port: MODBUS_PORT.to_string(),
            working_distance: DEFAULT_WORKING_DISTANCE,
            target_tilt_deg: DEFAULT_TARGET_TILT_DEG,
            scanner_tilt_deg: DEFAULT_SCANNER_TILT_DEG,
            axes: vec![
                AxisConfig::ascii(
                    AxisLabel::YLin,
                    1,
                    1.0,
                    &[("maxspeed", 200_000.0), ("accel", 200.0)],
                ),
                AxisConfig::ascii(
                    AxisLabel::ZLin,
                    2,
                    1.0,
                    &[("maxspeed", 200_000.0), ("accel", 75.0)],
                ),
                AxisConfig::ascii(
                    AxisLabel::XRot,
                    3,
                    1.0,
                    &[("maxspeed", 25_000.0), ("accel", 200.0)],
                ),
                AxisConfig::ascii(AxisLabel::YRot, 4, -1.0, &[("accel", 80.0)]),
                tilt,
            ],
            scan_app: ScanAppConfig::default(),
        }
    }
}

impl RigConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RigConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Load `path` when given, else `rig.toml` when present, else the stock rig
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::new();
        for axis in &self.axes {
            if seen.contains(&axis.label) {
                return Err(ConfigError::DuplicateAxis(axis.label));
            }
            seen.push(axis.label);
        }
        Ok(())
    }

    pub fn axis(&self, label: AxisLabel) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.label == label)
    }
}
