// Keyboard jog for one axis: 50 Hz loop with watchdog
// The axis only keeps moving while jog keys keep arriving; a stalled terminal
// or a released key stops it within JOG_TIMEOUT. Reaching either end of the
// axis bounds stops it too. The interlocks are not consulted while jogging.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::axis::{Axis, AxisKind, RigState};
use crate::config::{JOG_TIMEOUT, LOOP_HZ};
use crate::messages::JogHealth;

const LINEAR_SPEEDS: [f64; 3] = [0.5, 2.0, 10.0]; // mm/s
const ROTARY_SPEEDS_DEG: [f64; 3] = [0.5, 2.0, 10.0]; // deg/s
const SPEED_LABELS: [&str; 3] = ["LOW", "MED", "HIGH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogKey {
    Negative,
    Positive,
    Faster,
    Slower,
    Stop,
    Quit,
}

/// a/d or arrows jog, r/f change speed, space stops, q/Esc quits
pub fn key_for(code: KeyCode) -> Option<JogKey> {
    match code {
        KeyCode::Char('a') | KeyCode::Left | KeyCode::Down => Some(JogKey::Negative),
        KeyCode::Char('d') | KeyCode::Right | KeyCode::Up => Some(JogKey::Positive),
        KeyCode::Char('r') => Some(JogKey::Faster),
        KeyCode::Char('f') => Some(JogKey::Slower),
        KeyCode::Char(' ') => Some(JogKey::Stop),
        KeyCode::Char('q') | KeyCode::Esc => Some(JogKey::Quit),
        _ => None,
    }
}

/// Jog state machine, independent of the terminal. Velocities in base units per second.
pub struct JogRuntime {
    speeds: [f64; 3],
    speed_idx: usize,
    direction: f64,
    last_input: Instant,
    commanded: f64,
    health: JogHealth,
    done: bool,
}

impl JogRuntime {
    pub fn new(speeds: [f64; 3], now: Instant) -> Self {
        Self {
            speeds,
            speed_idx: 0,
            direction: 0.0,
            last_input: now,
            commanded: 0.0,
            health: JogHealth::CmdStale, // Stale until the first jog key
            done: false,
        }
    }

    pub fn for_kind(kind: AxisKind, now: Instant) -> Self {
        match kind {
            AxisKind::Linear => Self::new(LINEAR_SPEEDS, now),
            AxisKind::Rotary | AxisKind::Tilt => Self::new(ROTARY_SPEEDS_DEG.map(f64::to_radians), now),
        }
    }

    pub fn on_key(&mut self, key: JogKey, now: Instant) {
        match key {
            JogKey::Negative | JogKey::Positive => {
                self.direction = if key == JogKey::Positive { 1.0 } else { -1.0 };
                self.last_input = now;
            }
            JogKey::Faster => {
                self.speed_idx = (self.speed_idx + 1).min(self.speeds.len() - 1);
                info!("Speed: {}", SPEED_LABELS[self.speed_idx]);
            }
            JogKey::Slower => {
                self.speed_idx = self.speed_idx.saturating_sub(1);
                info!("Speed: {}", SPEED_LABELS[self.speed_idx]);
            }
            JogKey::Stop => self.direction = 0.0,
            JogKey::Quit => {
                self.direction = 0.0;
                self.done = true;
            }
        }
    }

    /// Apply the watchdog; returns the velocity to command when it changed
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let input_age = now.saturating_duration_since(self.last_input);

        if self.direction != 0.0 && input_age > JOG_TIMEOUT {
            // Watchdog triggered - stop the axis
            if self.health != JogHealth::CmdStale {
                warn!("Jog input stale ({:?} old), stopping axis", input_age);
            }
            self.direction = 0.0;
            self.health = JogHealth::CmdStale;
        } else if self.direction != 0.0 {
            self.health = JogHealth::Ok;
        }

        let velocity = self.direction * self.speeds[self.speed_idx];
        if velocity == self.commanded {
            return None;
        }
        self.commanded = velocity;
        Some(velocity)
    }

    /// Drop the jog direction without waiting for the watchdog
    pub fn halt(&mut self) {
        self.direction = 0.0;
        self.commanded = 0.0;
    }

    /// Velocity last handed out by `tick`
    pub fn commanded(&self) -> f64 {
        self.commanded
    }

    pub fn health(&self) -> JogHealth {
        self.health
    }

    pub fn speed(&self) -> f64 {
        self.speeds[self.speed_idx]
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Drives an axis from a `JogRuntime`. The axis is stopped, and its final position
/// recorded into the shared state, when the session ends.
pub struct JogSession<'a> {
    axis: &'a mut Axis,
    state: &'a mut RigState,
    runtime: JogRuntime,
}

impl<'a> JogSession<'a> {
    pub fn new(axis: &'a mut Axis, state: &'a mut RigState) -> Self {
        let runtime = JogRuntime::for_kind(axis.kind(), Instant::now());
        Self {
            axis,
            state,
            runtime,
        }
    }

    pub fn on_key(&mut self, key: JogKey) {
        self.runtime.on_key(key, Instant::now());
    }

    /// One loop iteration: watchdog, end-of-travel check, then command the axis
    /// if the velocity changed. Velocities are in base units.
    pub fn step(&mut self, now: Instant) -> crate::axis::Result<()> {
        let requested = self.runtime.tick(now);
        let velocity = requested.unwrap_or(self.runtime.commanded());

        if velocity != 0.0 && self.at_end_of_travel(velocity)? {
            warn!("{}: end of travel, stopping jog", self.axis.label());
            self.runtime.halt();
            return self.axis.stop();
        }
        if let Some(velocity) = requested {
            let velocity = self.axis.from_base(velocity, self.axis.unit());
            self.axis.jog(velocity)?;
        }
        Ok(())
    }

    fn at_end_of_travel(&mut self, velocity: f64) -> crate::axis::Result<bool> {
        self.axis.position(self.state)?;
        let position = self.state.get(self.axis.label());
        let (lo, hi) = self.axis.bounds();
        Ok((velocity < 0.0 && position <= lo) || (velocity > 0.0 && position >= hi))
    }

    fn drive(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let period = Duration::from_millis(1000 / LOOP_HZ);
        while !self.runtime.is_done() {
            if event::poll(period)? {
                if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                    let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                    if let Some(key) = key_for(code).filter(|_| pressed) {
                        self.on_key(key);
                    }
                }
            }
            self.step(Instant::now())?;
        }
        Ok(())
    }
}

impl Drop for JogSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.axis.stop() {
            warn!("{}: failed to stop after jog: {}", self.axis.label(), e);
        }
        if let Err(e) = self.axis.position(self.state) {
            warn!("{}: position unknown after jog: {}", self.axis.label(), e);
        }
    }
}

/// Jog `axis` from the keyboard until q/Esc; `state` holds its position afterwards
pub fn run(axis: &mut Axis, state: &mut RigState) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Jogging {}: {}Hz loop, {}ms watchdog timeout",
        axis.label(),
        LOOP_HZ,
        JOG_TIMEOUT.as_millis()
    );
    info!("Controls: A/D or arrows=jog, R/F=speed, Space=stop, Q=quit");

    let mut session = JogSession::new(axis, state);
    enable_raw_mode()?;
    let result = session.drive();
    disable_raw_mode()?;
    result
}
