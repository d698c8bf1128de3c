// Single-axis control
//
// An `Axis` wraps one transport with units, a home offset, closed safety bounds
// and the cross-axis interlock. Positions are tracked in base units (mm or rad).

pub mod interlock;

pub use interlock::{Interlock, RigState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::IDLE_POLL_INTERVAL;
use crate::transport::{Temperatures, Transport, TransportError};
use crate::units::{Conversion, Unit};

/// Speed boost applied to `maxspeed` while the device runs its homing routine
const HOMING_SPEED_BOOST: f64 = 1.2;

/// Fixed set of axes on the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisLabel {
    YLin,
    ZLin,
    XRot,
    YRot,
    TargetTilt,
}

impl AxisLabel {
    pub const ALL: [AxisLabel; 5] = [
        AxisLabel::YLin,
        AxisLabel::ZLin,
        AxisLabel::XRot,
        AxisLabel::YRot,
        AxisLabel::TargetTilt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AxisLabel::YLin => "y_lin",
            AxisLabel::ZLin => "z_lin",
            AxisLabel::XRot => "x_rot",
            AxisLabel::YRot => "y_rot",
            AxisLabel::TargetTilt => "target_tilt",
        }
    }

    pub fn kind(&self) -> AxisKind {
        match self {
            AxisLabel::YLin | AxisLabel::ZLin => AxisKind::Linear,
            AxisLabel::XRot | AxisLabel::YRot => AxisKind::Rotary,
            AxisLabel::TargetTilt => AxisKind::Tilt,
        }
    }

    /// Match a key with separators and case already stripped, e.g. `ylin`
    pub fn from_compact(key: &str) -> Option<AxisLabel> {
        match key {
            "ylin" => Some(AxisLabel::YLin),
            "zlin" => Some(AxisLabel::ZLin),
            "xrot" => Some(AxisLabel::XRot),
            "yrot" => Some(AxisLabel::YRot),
            "targettilt" | "tilt" => Some(AxisLabel::TargetTilt),
            _ => None,
        }
    }
}

impl fmt::Display for AxisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AxisLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        AxisLabel::from_compact(&compact).ok_or_else(|| format!("unknown axis '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Linear,
    Rotary,
    Tilt,
}

impl AxisKind {
    /// Unit that bounds, offsets and shared state are kept in
    pub fn base_unit(&self) -> Unit {
        match self {
            AxisKind::Linear => Unit::Millimetres,
            AxisKind::Rotary | AxisKind::Tilt => Unit::Radians,
        }
    }

    pub fn accepts(&self, unit: Unit) -> bool {
        match self {
            AxisKind::Linear => matches!(unit, Unit::Millimetres | Unit::Native),
            AxisKind::Rotary | AxisKind::Tilt => unit != Unit::Millimetres,
        }
    }
}

/// How `home()` brings the axis back to its reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomingMode {
    /// Run the device's homing routine, then move to the home offset
    #[default]
    DeviceThenOffset,
    /// Only move to the home offset (no reference switch on the device)
    OffsetOnly,
}

/// Result of a move request. A rejected move never reached the hardware.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Position after the move, in the axis' current unit
    Moved { position: f64 },
    /// Requested target in the axis' current unit
    Rejected { target: f64, reason: String },
}

impl MoveOutcome {
    pub fn is_moved(&self) -> bool {
        matches!(self, MoveOutcome::Moved { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AxisError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{label} does not accept {unit}")]
    UnitMismatch { label: AxisLabel, unit: Unit },

    #[error("{label} still busy after {waited:?}")]
    IdleTimeout { label: AxisLabel, waited: Duration },
}

pub type Result<T> = std::result::Result<T, AxisError>;

pub struct Axis {
    label: AxisLabel,
    transport: Box<dyn Transport>,
    unit: Unit,
    conversion: Conversion,
    home_offset: f64, // base units
    bounds: (f64, f64), // base units, closed
    direction: f64,
    wait_move: bool,
    interlock: Interlock,
    homing: HomingMode,
    settings: BTreeMap<String, f64>,
    poll_interval: Duration,
}

impl Axis {
    pub fn new(label: AxisLabel, transport: Box<dyn Transport>, conversion: Conversion) -> Self {
        let interlock = Interlock::default();
        Self {
            label,
            transport,
            unit: label.kind().base_unit(),
            conversion,
            home_offset: 0.0,
            bounds: interlock.default_bounds(label),
            direction: 1.0,
            wait_move: true,
            interlock,
            homing: HomingMode::default(),
            settings: BTreeMap::new(),
            poll_interval: IDLE_POLL_INTERVAL,
        }
    }

    /// Use a rule table; resets bounds to the table's defaults
    pub fn with_interlock(mut self, interlock: Interlock) -> Self {
        self.interlock = interlock;
        self.bounds = interlock.default_bounds(self.label);
        self
    }

    pub fn with_bounds(mut self, lo: f64, hi: f64) -> Self {
        self.bounds = (lo.min(hi), lo.max(hi));
        self
    }

    /// +1 or -1: logical position = direction * device position
    pub fn with_direction(mut self, direction: f64) -> Self {
        self.direction = if direction < 0.0 { -1.0 } else { 1.0 };
        self
    }

    pub fn with_homing(mut self, homing: HomingMode) -> Self {
        self.homing = homing;
        self
    }

    pub fn with_home_offset(mut self, base: f64) -> Self {
        self.home_offset = base;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn label(&self) -> AxisLabel {
        self.label
    }

    pub fn kind(&self) -> AxisKind {
        self.label.kind()
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn interlock(&self) -> Interlock {
        self.interlock
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    pub fn wait_move(&self) -> bool {
        self.wait_move
    }

    pub fn set_wait_move(&mut self, wait: bool) {
        self.wait_move = wait;
    }

    /// Value in `unit` to base units
    pub fn to_base(&self, value: f64, unit: Unit) -> f64 {
        match unit {
            Unit::Millimetres | Unit::Radians => value,
            Unit::Degrees => value.to_radians(),
            Unit::Native => value / self.conversion.counts_per_base,
        }
    }

    /// Base units to a value in `unit`
    pub fn from_base(&self, base: f64, unit: Unit) -> f64 {
        match unit {
            Unit::Millimetres | Unit::Radians => base,
            Unit::Degrees => base.to_degrees(),
            Unit::Native => base * self.conversion.counts_per_base,
        }
    }

    pub fn set_units(&mut self, unit: Unit) -> Result<()> {
        if !self.kind().accepts(unit) {
            return Err(AxisError::UnitMismatch {
                label: self.label,
                unit,
            });
        }
        self.unit = unit;
        Ok(())
    }

    /// Switch units when `key` names one (e.g. a pose column `x_rot_deg`); no-op otherwise
    pub fn set_units_from_key(&mut self, key: &str) -> Result<()> {
        match Unit::from_key(key) {
            Some(unit) => self.set_units(unit),
            None => Ok(()),
        }
    }

    /// Home offset in base units
    pub fn home_offset(&self) -> f64 {
        self.home_offset
    }

    /// Set the home offset, given in the current unit
    pub fn set_home(&mut self, value: f64) {
        self.home_offset = self.to_base(value, self.unit);
    }

    pub fn set_home_base(&mut self, base: f64) {
        self.home_offset = base;
    }

    /// Adopt the current position as the home offset
    pub fn set_current_as_home(&mut self, state: &mut RigState) -> Result<f64> {
        let position = self.read_base(state)?;
        self.home_offset = position;
        info!("{}: home offset set to current position {:.4}", self.label, position);
        Ok(self.from_base(position, self.unit))
    }

    /// Check a target (base units) against bounds and the interlock
    pub fn check(&self, target: f64, state: &RigState) -> std::result::Result<(), String> {
        let (lo, hi) = self.bounds;
        if !(lo..=hi).contains(&target) {
            return Err(format!(
                "target {:.4} {} outside bounds [{:.4}, {:.4}]",
                target,
                self.kind().base_unit(),
                lo,
                hi
            ));
        }
        self.interlock.check(self.label, target, state)
    }

    /// Move to `offset` (current unit) relative to the home offset
    pub fn move_to(&mut self, offset: f64, state: &mut RigState) -> Result<MoveOutcome> {
        let target = self.home_offset + self.to_base(offset, self.unit);
        self.move_base(target, state)
    }

    /// Move to `target` (current unit) ignoring the home offset
    pub fn move_absolute(&mut self, target: f64, state: &mut RigState) -> Result<MoveOutcome> {
        let target = self.to_base(target, self.unit);
        self.move_base(target, state)
    }

    /// Move a rotary axis to `degrees` relative to the home offset, whatever the current unit
    pub fn move_degrees(&mut self, degrees: f64, state: &mut RigState) -> Result<MoveOutcome> {
        if self.kind() == AxisKind::Linear {
            return Err(AxisError::UnitMismatch {
                label: self.label,
                unit: Unit::Degrees,
            });
        }
        let target = self.home_offset + degrees.to_radians();
        self.move_base(target, state)
    }

    /// Validate, issue one absolute move and record the result in `state`
    pub fn move_base(&mut self, target: f64, state: &mut RigState) -> Result<MoveOutcome> {
        if let Err(reason) = self.check(target, state) {
            let requested = self.from_base(target, self.unit);
            warn!(
                "{}: rejected move to {:.4} {}: {}",
                self.label, requested, self.unit, reason
            );
            return Ok(MoveOutcome::Rejected {
                target: requested,
                reason,
            });
        }

        let counts = self.conversion.to_counts(self.direction * target);
        debug!("{}: move abs {} counts", self.label, counts);
        self.transport.move_absolute(counts)?;

        let position = if self.wait_move {
            self.wait_until_idle(None)?;
            self.read_base(state)?
        } else {
            // Still moving; the commanded target is the best known position
            state.set(self.label, target);
            target
        };

        let position = self.from_base(position, self.unit);
        info!("{}: moved to {:.4} {}", self.label, position, self.unit);

        match self.transport.temperatures() {
            Ok(t) => debug!(
                "{}: driver {:?} C, motor {:?} C",
                self.label, t.driver, t.motor
            ),
            Err(e) => debug!("{}: temperature unavailable: {}", self.label, e),
        }

        Ok(MoveOutcome::Moved { position })
    }

    fn read_base(&mut self, state: &mut RigState) -> Result<f64> {
        let counts = self.transport.position()?;
        let base = self.direction * self.conversion.from_counts(counts);
        state.set(self.label, base);
        Ok(base)
    }

    /// Live position in the current unit; recorded into `state`
    pub fn position(&mut self, state: &mut RigState) -> Result<f64> {
        let base = self.read_base(state)?;
        Ok(self.from_base(base, self.unit))
    }

    /// Home the axis and return to the home offset
    pub fn home(&mut self, state: &mut RigState) -> Result<MoveOutcome> {
        if self.homing == HomingMode::DeviceThenOffset {
            let boosted = match self.transport.setting("maxspeed") {
                Ok(speed) => match self
                    .transport
                    .set_setting("maxspeed", speed * HOMING_SPEED_BOOST)
                {
                    Ok(()) => Some(speed),
                    Err(e) => {
                        debug!("{}: no homing speed boost: {}", self.label, e);
                        None
                    }
                },
                Err(_) => None,
            };

            info!("{}: homing", self.label);
            let homed = self
                .transport
                .home()
                .map_err(AxisError::from)
                .and_then(|_| self.wait_until_idle(None));

            if let Some(speed) = boosted {
                if let Err(e) = self.transport.set_setting("maxspeed", speed) {
                    warn!("{}: failed to restore maxspeed: {}", self.label, e);
                }
            }
            homed?;
            self.read_base(state)?;
        }

        self.move_base(self.home_offset, state)
    }

    /// Poll until the device reports idle. `None` waits indefinitely.
    pub fn wait_until_idle(&mut self, timeout: Option<Duration>) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.transport.is_idle()? {
                return Ok(());
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(AxisError::IdleTimeout {
                        label: self.label,
                        waited: start.elapsed(),
                    });
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn is_idle(&mut self) -> Result<bool> {
        Ok(self.transport.is_idle()?)
    }

    pub fn stop(&mut self) -> Result<()> {
        info!("{}: stop", self.label);
        Ok(self.transport.stop()?)
    }

    /// Continuous move at `velocity` (current unit per second); zero stops
    pub fn jog(&mut self, velocity: f64) -> Result<()> {
        if velocity == 0.0 {
            return self.stop();
        }
        let base = self.to_base(velocity, self.unit);
        let native = self.conversion.velocity_to_native(self.direction * base);
        debug!("{}: jog {} native", self.label, native);
        Ok(self.transport.move_velocity(native)?)
    }

    /// Cached settings, re-reading the ones that change on their own
    pub fn settings(&mut self) -> Result<BTreeMap<String, f64>> {
        let volatile = self.transport.volatile_settings();
        for name in self.transport.known_settings() {
            if self.settings.contains_key(*name) && !volatile.contains(name) {
                continue;
            }
            match self.transport.setting(name) {
                Ok(value) => {
                    self.settings.insert(name.to_string(), value);
                }
                Err(TransportError::UnknownSetting { .. }) => {
                    debug!("{}: setting {} not supported", self.label, name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.settings.clone())
    }

    pub fn setting(&mut self, name: &str) -> Result<f64> {
        let value = self.transport.setting(name)?;
        self.settings.insert(name.to_string(), value);
        Ok(value)
    }

    pub fn set_setting(&mut self, name: &str, value: f64) -> Result<()> {
        self.transport.set_setting(name, value)?;
        debug!("{}: {} = {}", self.label, name, value);
        self.settings.insert(name.to_string(), value);
        Ok(())
    }

    pub fn warnings(&mut self) -> Result<Vec<String>> {
        Ok(self.transport.warnings()?)
    }

    pub fn clear_warnings(&mut self) -> Result<Vec<String>> {
        let cleared = self.transport.clear_warnings()?;
        if !cleared.is_empty() {
            info!("{}: cleared warnings {:?}", self.label, cleared);
        }
        Ok(cleared)
    }

    pub fn temperatures(&mut self) -> Result<Temperatures> {
        Ok(self.transport.temperatures()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCall, MockLog, MockTransport};
    use std::f64::consts::PI;
    use tracing_test::traced_test;

    fn mock_axis(label: AxisLabel, conversion: Conversion) -> (Axis, MockLog) {
        let log = MockLog::new();
        let transport = MockTransport::with_log(label.as_str(), log.clone());
        let axis = Axis::new(label, Box::new(transport), conversion)
            .with_poll_interval(Duration::from_millis(1));
        (axis, log)
    }

    #[traced_test]
    #[test]
    fn test_in_bounds_move_issues_one_command() {
        let (mut axis, log) = mock_axis(AxisLabel::YLin, Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();

        let outcome = axis.move_to(120.5, &mut state).unwrap();

        assert_eq!(outcome, MoveOutcome::Moved { position: 120.5 });
        assert_eq!(log.move_count(), 1, "exactly one move command");
        assert_eq!(log.moves()[0].1, 12050);
        assert_eq!(state.y_lin, 120.5);
        assert!(!logs_contain("outside bounds"));
        assert!(!logs_contain("rejected"));
    }

    #[traced_test]
    #[test]
    fn test_non_finite_target_is_rejected() {
        let (mut axis, log) = mock_axis(AxisLabel::ZLin, Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();

        for target in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let outcome = axis.move_to(target, &mut state).unwrap();
            assert!(matches!(outcome, MoveOutcome::Rejected { .. }));
        }
        assert_eq!(log.move_count(), 0, "NaN must not become a move to zero counts");
        assert!(logs_contain("outside bounds"));
    }

    #[traced_test]
    #[test]
    fn test_out_of_bounds_move_is_rejected() {
        let (mut axis, log) = mock_axis(AxisLabel::ZLin, Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();

        let outcome = axis.move_to(501.0, &mut state).unwrap();

        assert!(matches!(outcome, MoveOutcome::Rejected { target, .. } if target == 501.0));
        assert_eq!(log.move_count(), 0, "no move may reach the device");
        assert_eq!(state.z_lin, 0.0);
        assert!(logs_contain("outside bounds"));
    }

    #[test]
    fn test_bounds_are_closed() {
        let (mut axis, log) = mock_axis(AxisLabel::ZLin, Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();
        assert!(axis.move_to(500.0, &mut state).unwrap().is_moved());
        assert!(axis.move_to(0.0, &mut state).unwrap().is_moved());
        assert_eq!(log.move_count(), 2);
    }

    #[traced_test]
    #[test]
    fn test_interlock_rejects_with_other_axis_state() {
        let (mut axis, log) = mock_axis(AxisLabel::YRot, Conversion::ASCII_ROTARY);
        let mut state = RigState {
            z_lin: 440.0,
            y_lin: 300.0,
            ..RigState::default()
        };

        let outcome = axis.move_to(PI, &mut state).unwrap();

        assert!(!outcome.is_moved());
        assert_eq!(log.move_count(), 0);
        assert!(logs_contain("rejected move"));
    }

    #[test]
    fn test_home_offset_and_direction() {
        let (axis, log) = mock_axis(AxisLabel::YRot, Conversion::MODBUS_ROTARY);
        let mut axis = axis.with_direction(-1.0).with_home_offset(0.5);
        let mut state = RigState::default();

        axis.set_units(Unit::Degrees).unwrap();
        let outcome = axis.move_to(10.0, &mut state).unwrap();

        let expected = 0.5 + 10f64.to_radians();
        let counts = Conversion::MODBUS_ROTARY.to_counts(-expected);
        assert_eq!(log.moves()[0].1, counts, "direction flips the device target");
        match outcome {
            MoveOutcome::Moved { position } => {
                assert!((position - expected.to_degrees()).abs() < 0.01)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!((state.y_rot - expected).abs() < 1e-3);
    }

    #[test]
    fn test_move_absolute_ignores_home_offset() {
        let (axis, log) = mock_axis(AxisLabel::YLin, Conversion::MODBUS_LINEAR);
        let mut axis = axis.with_home_offset(100.0);
        let mut state = RigState::default();

        axis.move_absolute(50.0, &mut state).unwrap();
        axis.move_to(50.0, &mut state).unwrap();

        let targets: Vec<i64> = log.moves().iter().map(|(_, c)| *c).collect();
        assert_eq!(targets, vec![5000, 15000]);
    }

    #[test]
    fn test_move_degrees_rejects_linear() {
        let (mut axis, _) = mock_axis(AxisLabel::ZLin, Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();
        assert!(matches!(
            axis.move_degrees(5.0, &mut state),
            Err(AxisError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn test_unit_switching() {
        let (mut axis, _) = mock_axis(AxisLabel::XRot, Conversion::ASCII_ROTARY);
        assert!(axis.set_units(Unit::Millimetres).is_err());
        axis.set_units_from_key("x_rot_deg").unwrap();
        assert_eq!(axis.unit(), Unit::Degrees);
        axis.set_units_from_key("xrot").unwrap();
        assert_eq!(axis.unit(), Unit::Degrees, "keys without a unit leave it alone");
    }

    #[test]
    fn test_home_boosts_maxspeed_then_returns_to_offset() {
        let (axis, log) = mock_axis(AxisLabel::YLin, Conversion::MODBUS_LINEAR);
        let mut axis = axis.with_home_offset(10.0);
        let mut state = RigState::default();

        let outcome = axis.home(&mut state).unwrap();

        assert_eq!(outcome, MoveOutcome::Moved { position: 10.0 });
        let calls: Vec<MockCall> = log.calls().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            calls,
            vec![
                MockCall::SetSetting("maxspeed".to_string(), 120_000.0),
                MockCall::Home,
                MockCall::SetSetting("maxspeed".to_string(), 100_000.0),
                MockCall::MoveAbsolute(1000),
            ]
        );
    }

    #[test]
    fn test_offset_only_homing_skips_device() {
        let (axis, log) = mock_axis(AxisLabel::TargetTilt, Conversion::MODBUS_ROTARY);
        let mut axis = axis.with_homing(HomingMode::OffsetOnly);
        let mut state = RigState::default();

        axis.home(&mut state).unwrap();

        assert!(!log.calls().iter().any(|(_, c)| *c == MockCall::Home));
        assert_eq!(log.move_count(), 1);
    }

    #[test]
    fn test_wait_until_idle_times_out() {
        let transport = MockTransport::new("slow").busy_for(1000);
        let mut axis = Axis::new(AxisLabel::YLin, Box::new(transport), Conversion::MODBUS_LINEAR)
            .with_poll_interval(Duration::from_millis(1));

        let result = axis.wait_until_idle(Some(Duration::from_millis(5)));
        assert!(matches!(result, Err(AxisError::IdleTimeout { .. })));
    }

    #[test]
    fn test_no_wait_records_commanded_target() {
        let transport = MockTransport::new("y").busy_for(1000);
        let mut axis = Axis::new(AxisLabel::YLin, Box::new(transport), Conversion::MODBUS_LINEAR);
        axis.set_wait_move(false);
        let mut state = RigState::default();

        let outcome = axis.move_to(42.0, &mut state).unwrap();

        assert_eq!(outcome, MoveOutcome::Moved { position: 42.0 });
        assert_eq!(state.y_lin, 42.0);
    }

    #[test]
    fn test_set_current_as_home() {
        let transport = MockTransport::new("z").at(25_000);
        let mut axis = Axis::new(AxisLabel::ZLin, Box::new(transport), Conversion::MODBUS_LINEAR);
        let mut state = RigState::default();

        assert_eq!(axis.set_current_as_home(&mut state).unwrap(), 250.0);
        assert_eq!(axis.home_offset(), 250.0);
        assert_eq!(state.z_lin, 250.0);
    }

    #[test]
    fn test_settings_snapshot_and_jog() {
        let (mut axis, log) = mock_axis(AxisLabel::YLin, Conversion::MODBUS_LINEAR);
        let settings = axis.settings().unwrap();
        assert_eq!(settings.get("maxspeed"), Some(&100_000.0));

        axis.set_setting("accel", 75.0).unwrap();
        assert_eq!(axis.settings().unwrap().get("accel"), Some(&75.0));

        axis.jog(2.0).unwrap();
        axis.jog(0.0).unwrap();
        let calls: Vec<MockCall> = log.calls().into_iter().map(|(_, c)| c).collect();
        assert!(calls.contains(&MockCall::MoveVelocity(200)));
        assert_eq!(calls.last(), Some(&MockCall::Stop));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("y_lin".parse::<AxisLabel>().unwrap(), AxisLabel::YLin);
        assert_eq!("Target-Tilt".parse::<AxisLabel>().unwrap(), AxisLabel::TargetTilt);
        assert!("w_rot".parse::<AxisLabel>().is_err());
        assert_eq!(AxisLabel::XRot.to_string(), "x_rot");
    }
}
