// The rig as a whole
//
// `Platform` owns every connected axis, the shared last-known positions used by
// the interlocks, and the geometry (working distance, scanner and target tilt)
// that every home offset is derived from.

pub mod kinematics;
pub mod presets;
pub mod sequences;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::axis::{Axis, AxisError, AxisLabel, MoveOutcome, RigState};
use crate::config::{AxisConfig, Protocol, RigConfig};
use crate::poses::{PoseError, PoseRecord, compact_key};
use crate::scan_app::ScanAppError;
use crate::transport::{
    AsciiAxis, AsciiChain, MockLog, MockTransport, ModbusAxis, ModbusBus, Transport,
    TransportError,
};
use crate::units::Unit;

use kinematics::{attack_in_range, attack_targets, home_offsets, lr_pose_to_angle_distance};

/// Where `shutdown` parks x_rot (rad)
const PARK_X_ROT: f64 = 0.1;

/// Angle both rotary axes are left at by `end` (deg)
const END_ANGLE_DEG: f64 = 5.0;

/// Pose keys handled by the attack-angle solver
const ATTACK_KEYS: [&str; 3] = ["attack", "attackangle", "angle"];

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error(transparent)]
    Axis(#[from] AxisError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Axis {0} is not connected")]
    MissingAxis(AxisLabel),

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),

    #[error(
        "Attack angle {0:.2} deg is outside [{min}, {max}] deg",
        min = kinematics::ATTACK_MIN_DEG,
        max = kinematics::ATTACK_MAX_DEG
    )]
    AttackOutOfRange(f64),

    #[error(transparent)]
    ScanApp(#[from] ScanAppError),

    #[error(transparent)]
    Pose(#[from] PoseError),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// A stored position by name, or explicit absolute positions (mm or rad)
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Preset(&'a str),
    Custom(&'a [(AxisLabel, f64)]),
}

pub struct Platform {
    axes: BTreeMap<AxisLabel, Axis>,
    state: RigState,
    working_distance: f64,
    target_tilt: f64,
    scanner_tilt: f64,
}

impl Platform {
    /// Assemble a platform from configured axes; home offsets follow the geometry.
    /// Tilts in rad, working distance in mm.
    pub fn new(axes: Vec<Axis>, working_distance: f64, target_tilt: f64, scanner_tilt: f64) -> Self {
        let mut platform = Self {
            axes: axes.into_iter().map(|axis| (axis.label(), axis)).collect(),
            state: RigState::default(),
            working_distance,
            target_tilt,
            scanner_tilt,
        };
        platform.apply_home_offsets();
        platform
    }

    /// Open the hardware links named in `config` and build every axis
    pub fn from_config(config: &RigConfig) -> Result<Self> {
        if config.simulate {
            return Ok(Self::simulated(config).0);
        }

        let needs = |protocol| config.axes.iter().any(|a| a.protocol == protocol);
        let chain = if needs(Protocol::Ascii) {
            let mut chain = AsciiChain::open(&config.ascii_port)?;
            let found = chain.detect()?;
            info!("ASCII chain on {}: devices {:?}", config.ascii_port, found);
            Some(Rc::new(RefCell::new(chain)))
        } else {
            None
        };
        let bus = if needs(Protocol::Modbus) {
            Some(Rc::new(RefCell::new(ModbusBus::open(&config.modbus_port)?)))
        } else {
            None
        };

        let mut axes = Vec::with_capacity(config.axes.len());
        for axis_config in &config.axes {
            let transport: Box<dyn Transport> = match axis_config.protocol {
                Protocol::Ascii => {
                    let Some(chain) = &chain else { continue };
                    Box::new(AsciiAxis::with_axis(
                        chain.clone(),
                        axis_config.address,
                        axis_config.device_axis,
                    ))
                }
                Protocol::Modbus => {
                    let Some(bus) = &bus else { continue };
                    let mut axis =
                        ModbusAxis::new(bus.clone(), axis_config.address, axis_config.operation());
                    if !axis.is_ready()? {
                        warn!(
                            "{} (slave {}) is not ready, clearing alarms",
                            axis_config.label, axis_config.address
                        );
                        axis.clear_warnings()?;
                    }
                    Box::new(axis)
                }
            };
            axes.push(configure(axis_config, transport, config)?);
        }

        Ok(Self::from_parts(axes, config))
    }

    /// Every configured axis backed by a mock transport sharing one call log
    pub fn simulated(config: &RigConfig) -> (Self, MockLog) {
        let log = MockLog::new();
        let mut axes = Vec::with_capacity(config.axes.len());
        for axis_config in &config.axes {
            let transport = MockTransport::with_log(axis_config.label.as_str(), log.clone());
            match configure(axis_config, Box::new(transport), config) {
                Ok(axis) => axes.push(axis),
                Err(e) => warn!("{}: simulated setup failed: {}", axis_config.label, e),
            }
        }
        info!("Simulating {} axes", axes.len());
        (Self::from_parts(axes, config), log)
    }

    fn from_parts(axes: Vec<Axis>, config: &RigConfig) -> Self {
        Self::new(
            axes,
            config.working_distance,
            config.target_tilt_deg.to_radians(),
            config.scanner_tilt_deg.to_radians(),
        )
    }

    fn apply_home_offsets(&mut self) {
        let homes = home_offsets(self.working_distance, self.scanner_tilt, self.target_tilt);
        for (label, axis) in self.axes.iter_mut() {
            axis.set_home_base(homes.get(*label));
        }
        debug!("Home offsets: {:?}", homes);
    }

    pub fn axis(&self, label: AxisLabel) -> Result<&Axis> {
        self.axes.get(&label).ok_or(PlatformError::MissingAxis(label))
    }

    pub fn axis_mut(&mut self, label: AxisLabel) -> Result<&mut Axis> {
        self.axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))
    }

    /// An axis together with the shared positions its moves are checked against
    pub fn axis_with_state(&mut self, label: AxisLabel) -> Result<(&mut Axis, &mut RigState)> {
        let axis = self
            .axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))?;
        Ok((axis, &mut self.state))
    }

    pub fn labels(&self) -> Vec<AxisLabel> {
        self.axes.keys().copied().collect()
    }

    pub fn state(&self) -> &RigState {
        &self.state
    }

    pub fn working_distance(&self) -> f64 {
        self.working_distance
    }

    /// Target tilt in rad
    pub fn target_tilt(&self) -> f64 {
        self.target_tilt
    }

    pub fn set_working_distance(&mut self, working_distance: f64) {
        self.working_distance = working_distance;
        self.apply_home_offsets();
        info!("Working distance set to {} mm", working_distance);
    }

    pub fn set_target_tilt(&mut self, degrees: f64) {
        self.target_tilt = degrees.to_radians();
        self.apply_home_offsets();
        info!("Target tilt set to {} deg", degrees);
    }

    /// Live positions, each in its axis' current unit
    pub fn positions(&mut self) -> Result<BTreeMap<AxisLabel, f64>> {
        let mut positions = BTreeMap::new();
        for (label, axis) in self.axes.iter_mut() {
            positions.insert(*label, axis.position(&mut self.state)?);
        }
        Ok(positions)
    }

    /// Live positions in mm or rad
    pub fn base_positions(&mut self) -> Result<Vec<(AxisLabel, f64)>> {
        self.positions()?;
        Ok(self
            .axes
            .keys()
            .map(|label| (*label, self.state.get(*label)))
            .collect())
    }

    /// Move one axis to `offset` from its home, in its current unit
    pub fn move_axis(&mut self, label: AxisLabel, offset: f64) -> Result<MoveOutcome> {
        let axis = self
            .axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))?;
        Ok(axis.move_to(offset, &mut self.state)?)
    }

    /// Move one axis to `target` in its current unit, ignoring its home
    pub fn move_axis_absolute(&mut self, label: AxisLabel, target: f64) -> Result<MoveOutcome> {
        let axis = self
            .axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))?;
        Ok(axis.move_absolute(target, &mut self.state)?)
    }

    /// Rotate an axis to `degrees` from its home, whatever its current unit
    pub fn move_degrees(&mut self, label: AxisLabel, degrees: f64) -> Result<MoveOutcome> {
        let axis = self
            .axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))?;
        Ok(axis.move_degrees(degrees, &mut self.state)?)
    }

    /// Issue every move without blocking, then wait on the axes that normally wait
    fn issue_together(&mut self, targets: &[(AxisLabel, f64)]) -> Result<Vec<MoveOutcome>> {
        if let Some((label, _)) = targets.iter().find(|(l, _)| !self.axes.contains_key(l)) {
            return Err(PlatformError::MissingAxis(*label));
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        let mut waiting = Vec::new();
        for &(label, target) in targets {
            let Some(axis) = self.axes.get_mut(&label) else {
                continue;
            };
            let wait = axis.wait_move();
            axis.set_wait_move(false);
            let outcome = axis.move_base(target, &mut self.state);
            axis.set_wait_move(wait);

            let outcome = outcome?;
            if wait && outcome.is_moved() {
                waiting.push(label);
            }
            outcomes.push(outcome);
        }

        for label in waiting {
            if let Some(axis) = self.axes.get_mut(&label) {
                axis.wait_until_idle(None)?;
                axis.position(&mut self.state)?;
            }
        }
        Ok(outcomes)
    }

    /// Put the scanner at `angle` to the target: z_lin, y_lin and x_rot move together
    pub fn move_attack_angle(&mut self, angle: f64, unit: Unit) -> Result<Vec<MoveOutcome>> {
        if !unit.is_angular() {
            return Err(AxisError::UnitMismatch {
                label: AxisLabel::XRot,
                unit,
            }
            .into());
        }
        let attack = match unit {
            Unit::Degrees => angle.to_radians(),
            _ => angle,
        };
        let degrees = attack.to_degrees();
        if !attack_in_range(degrees) {
            return Err(PlatformError::AttackOutOfRange(degrees));
        }

        let y_home = self.axis(AxisLabel::YLin)?.home_offset();
        let z_home = self.axis(AxisLabel::ZLin)?.home_offset();
        let targets = attack_targets(attack, self.working_distance, y_home, z_home);
        debug!("Attack {:.2} deg targets: {:?}", degrees, targets);

        let outcomes = self.issue_together(&[
            (AxisLabel::ZLin, targets.z_lin),
            (AxisLabel::XRot, targets.x_rot),
            (AxisLabel::YLin, targets.y_lin),
        ])?;
        info!(
            "Moved to ({:.3}, {:.3}) at {} {}",
            targets.z_lin, targets.y_lin, angle, unit
        );
        Ok(outcomes)
    }

    /// Change the target tilt (deg), which moves every home offset, then solve the attack angle
    pub fn move_attack_angle_at_tilt(
        &mut self,
        angle: f64,
        unit: Unit,
        tilt_deg: f64,
    ) -> Result<Vec<MoveOutcome>> {
        self.set_target_tilt(tilt_deg);
        self.move_attack_angle(angle, unit)
    }

    /// Move to a fixture pose given as (left, right) steps
    pub fn move_to_lr_pose(&mut self, left: f64, right: f64) -> Result<Vec<MoveOutcome>> {
        let (angle, distance) = lr_pose_to_angle_distance(left, right, self.working_distance);
        debug!("Pose ({}, {}): angle {:.4} rad, distance {:.2} mm", left, right, angle, distance);
        let z_home = self.axis(AxisLabel::ZLin)?.home_offset();
        self.issue_together(&[
            (AxisLabel::YRot, angle),
            (AxisLabel::ZLin, z_home + self.working_distance - distance),
        ])
    }

    /// Move to a pose record. Axis keys move that axis in the key's unit; attack keys
    /// use the solver. With `relative`, z_lin values are distances from the target
    /// and other values are subtracted from home.
    pub fn move_pose(&mut self, pose: &PoseRecord, relative: bool) -> Result<Vec<MoveOutcome>> {
        let mut outcomes = Vec::new();
        for (key, value) in &pose.values {
            let compact = compact_key(key);
            debug!("Pose {}: {} = {}", pose.id, key, value);

            if let Some(label) = AxisLabel::from_compact(&compact) {
                let Some(axis) = self.axes.get_mut(&label) else {
                    warn!("Pose {}: {} is not connected, skipping '{}'", pose.id, label, key);
                    continue;
                };
                axis.set_units_from_key(key)?;
                let offset = match (relative, label) {
                    (true, AxisLabel::ZLin) => {
                        self.working_distance - axis.to_base(*value, axis.unit())
                    }
                    (true, _) => -value,
                    (false, _) => *value,
                };
                outcomes.push(axis.move_to(offset, &mut self.state)?);
            } else if ATTACK_KEYS.contains(&compact.as_str()) {
                let unit = match Unit::from_key(key) {
                    Some(unit) => unit,
                    None => self.axis(AxisLabel::XRot)?.unit(),
                };
                let degrees = match unit {
                    Unit::Radians => value.to_degrees(),
                    _ => *value,
                };
                if !attack_in_range(degrees) {
                    warn!(
                        "Pose {}: attack angle {} deg is out of bounds, valid angles are {} to {} deg",
                        pose.id,
                        degrees,
                        kinematics::ATTACK_MIN_DEG,
                        kinematics::ATTACK_MAX_DEG
                    );
                    continue;
                }
                outcomes.extend(self.move_attack_angle(degrees, Unit::Degrees)?);
            } else {
                warn!("Pose {}: '{}' is not a valid move key", pose.id, key);
            }
        }
        Ok(outcomes)
    }

    fn resolve<'a>(
        target: Target<'a>,
        lookup: fn(&str) -> Option<&'static presets::Preset>,
    ) -> Result<&'a [(AxisLabel, f64)]> {
        match target {
            Target::Preset(name) => lookup(name)
                .map(|preset| preset.positions)
                .ok_or_else(|| PlatformError::UnknownPreset(name.to_string())),
            Target::Custom(positions) => Ok(positions),
        }
    }

    /// Absolute moves in mm or rad; axes that are not connected are skipped
    fn move_positions(&mut self, positions: &[(AxisLabel, f64)]) -> Result<Vec<MoveOutcome>> {
        let mut outcomes = Vec::with_capacity(positions.len());
        for &(label, target) in positions {
            match self.axes.get_mut(&label) {
                Some(axis) => outcomes.push(axis.move_base(target, &mut self.state)?),
                None => warn!("{} is not connected, skipping", label),
            }
        }
        Ok(outcomes)
    }

    fn any_waits(&self) -> bool {
        self.axes.values().any(Axis::wait_move)
    }

    /// Get in position to calibrate
    pub fn calibrate_position(&mut self, target: Target<'_>) -> Result<Vec<MoveOutcome>> {
        let positions = Self::resolve(target, presets::calibration)?;
        let outcomes = self.move_positions(positions)?;
        if self.any_waits() {
            self.wait_idle()?;
        }
        info!("In position, ready to begin calibration");
        Ok(outcomes)
    }

    /// Get in position to scan the ball plate
    pub fn ballplate_position(&mut self, target: Target<'_>, wait: bool) -> Result<Vec<MoveOutcome>> {
        let positions = Self::resolve(target, presets::ballplate)?;
        let outcomes = self.move_positions(positions)?;
        if wait || self.any_waits() {
            self.wait_idle()?;
        }
        info!("Ready to scan ball plate");
        Ok(outcomes)
    }

    pub fn home_axis(&mut self, label: AxisLabel) -> Result<MoveOutcome> {
        let axis = self
            .axes
            .get_mut(&label)
            .ok_or(PlatformError::MissingAxis(label))?;
        info!("Homing {}", label);
        Ok(axis.home(&mut self.state)?)
    }

    pub fn home_all(&mut self) -> Result<()> {
        for (label, axis) in self.axes.iter_mut() {
            info!("Homing {}", label);
            axis.home(&mut self.state)?;
        }
        info!("All axes homed");
        Ok(())
    }

    pub fn wait_idle(&mut self) -> Result<()> {
        for axis in self.axes.values_mut() {
            axis.wait_until_idle(None)?;
        }
        Ok(())
    }

    pub fn set_wait_move(&mut self, wait: bool) {
        for axis in self.axes.values_mut() {
            axis.set_wait_move(wait);
        }
    }

    /// Adopt the current position of every axis as its home offset
    pub fn new_home(&mut self) -> Result<()> {
        for axis in self.axes.values_mut() {
            axis.set_current_as_home(&mut self.state)?;
        }
        Ok(())
    }

    /// Swing the scanner head half a turn, lowering z_lin to clear the frame
    pub fn turn_around(&mut self) -> Result<()> {
        let waits: Vec<(AxisLabel, bool)> = self
            .axes
            .iter()
            .map(|(label, axis)| (*label, axis.wait_move()))
            .collect();
        self.set_wait_move(false);

        let result = self.turn_around_moves();

        for (label, wait) in waits {
            if let Some(axis) = self.axes.get_mut(&label) {
                axis.set_wait_move(wait);
            }
        }
        if let Err(e) = &result {
            error!("Turn around failed: {}", e);
        }
        result
    }

    fn turn_around_moves(&mut self) -> Result<()> {
        let mut offsets = Vec::new();
        for label in [AxisLabel::ZLin, AxisLabel::YLin] {
            if let Some(axis) = self.axes.get_mut(&label) {
                let position = axis.position(&mut self.state)?;
                let base = axis.to_base(position, axis.unit());
                offsets.push((label, base - axis.home_offset()));
            }
        }

        self.axes
            .get_mut(&AxisLabel::ZLin)
            .ok_or(PlatformError::MissingAxis(AxisLabel::ZLin))?
            .home(&mut self.state)?;

        let y_rot = self
            .axes
            .get_mut(&AxisLabel::YRot)
            .ok_or(PlatformError::MissingAxis(AxisLabel::YRot))?;
        let angle = y_rot.position(&mut self.state)?;
        let angle = y_rot.to_base(angle, y_rot.unit());
        let turn = if angle < FRAC_PI_2 { 180.0 } else { 0.0 };
        y_rot.move_degrees(turn, &mut self.state)?;

        for (label, offset) in offsets {
            if let Some(axis) = self.axes.get_mut(&label) {
                let home = axis.home_offset();
                axis.move_base(home + offset, &mut self.state)?;
            }
        }
        Ok(())
    }

    /// Leave the rotary axes where the next homing run is safe. Failures are logged.
    pub fn end(&mut self) {
        for label in [AxisLabel::YRot, AxisLabel::XRot] {
            let Some(axis) = self.axes.get_mut(&label) else {
                continue;
            };
            if let Err(e) = axis.move_degrees(END_ANGLE_DEG, &mut self.state) {
                error!("{}: end routine failed: {}", label, e);
            }
        }
    }

    /// Park x_rot without waiting for it
    pub fn shutdown(&mut self) -> Result<MoveOutcome> {
        let axis = self
            .axes
            .get_mut(&AxisLabel::XRot)
            .ok_or(PlatformError::MissingAxis(AxisLabel::XRot))?;
        let wait = axis.wait_move();
        axis.set_wait_move(false);
        let outcome = axis.move_base(PARK_X_ROT, &mut self.state);
        axis.set_wait_move(wait);
        Ok(outcome?)
    }

    /// Stop every axis; the first failure is returned after all were tried
    pub fn stop(&mut self) -> Result<()> {
        let mut first = None;
        for axis in self.axes.values_mut() {
            if let Err(e) = axis.stop() {
                warn!("{}: stop failed: {}", axis.label(), e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Motor and driver temperature of every axis, in deg C
    pub fn temperatures(&mut self) -> Vec<(String, Option<f64>)> {
        let mut readings = Vec::new();
        for (label, axis) in self.axes.iter_mut() {
            let t = match axis.temperatures() {
                Ok(t) => t,
                Err(e) => {
                    debug!("{}: no temperatures: {}", label, e);
                    Default::default()
                }
            };
            readings.push((format!("{}_MotorTemperature_deg-C", label), t.motor));
            readings.push((format!("{}_DriverTemperature_deg-C", label), t.driver));
        }
        readings
    }

    pub fn warnings(&mut self) -> Result<BTreeMap<AxisLabel, Vec<String>>> {
        let mut warnings = BTreeMap::new();
        for (label, axis) in self.axes.iter_mut() {
            warnings.insert(*label, axis.warnings()?);
        }
        Ok(warnings)
    }

    /// Clear the warnings of every axis, returning what was active
    pub fn clear_warnings(&mut self) -> Result<BTreeMap<AxisLabel, Vec<String>>> {
        let active = self.warnings()?;
        info!("Clearing warnings {:?}", active);
        for axis in self.axes.values_mut() {
            axis.clear_warnings()?;
        }
        Ok(active)
    }

    pub fn settings(&mut self) -> Result<BTreeMap<AxisLabel, BTreeMap<String, f64>>> {
        let mut settings = BTreeMap::new();
        for (label, axis) in self.axes.iter_mut() {
            settings.insert(*label, axis.settings()?);
        }
        Ok(settings)
    }

    /// Write settings to every axis that accepts them; refusals are logged
    pub fn set_settings(&mut self, settings: &[(&str, f64)]) {
        for axis in self.axes.values_mut() {
            for (name, value) in settings {
                if let Err(e) = axis.set_setting(name, *value) {
                    warn!("Failed setting {} {} to {}: {}", axis.label(), name, value, e);
                }
            }
        }
    }

    pub fn set_setting(&mut self, name: &str, value: f64) {
        self.set_settings(&[(name, value)]);
    }

    /// One line per axis: label, transport and unit
    pub fn describe(&self) -> Vec<String> {
        self.axes
            .values()
            .map(|axis| format!("{}: {} [{}]", axis.label(), axis.describe(), axis.unit()))
            .collect()
    }
}

/// Build an axis from its config and write its startup settings
fn configure(
    config: &AxisConfig,
    transport: Box<dyn Transport>,
    rig: &RigConfig,
) -> std::result::Result<Axis, AxisError> {
    let mut axis = Axis::new(config.label, transport, config.conversion())
        .with_interlock(rig.interlock)
        .with_direction(config.direction)
        .with_homing(config.homing);
    if let Some((lo, hi)) = config.bounds {
        axis = axis.with_bounds(lo, hi);
    }
    axis.set_wait_move(config.wait_move);
    for (name, value) in &config.settings {
        axis.set_setting(name, *value)?;
    }
    Ok(axis)
}
