// Simulated transport for dry runs and tests
//
// Moves complete instantly. Every state-changing call is appended to a `MockLog`
// that can be shared between several simulated axes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

use super::{Result, Temperatures, Transport, TransportError};

/// A command received by a simulated axis
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    MoveAbsolute(i64),
    MoveVelocity(i64),
    Home,
    Stop,
    SetSetting(String, f64),
    ClearWarnings,
}

/// Shared, ordered record of the calls made to one or more simulated axes
#[derive(Debug, Clone, Default)]
pub struct MockLog(Rc<RefCell<Vec<(String, MockCall)>>>);

impl MockLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, device: &str, call: MockCall) {
        self.0.borrow_mut().push((device.to_string(), call));
    }

    pub fn calls(&self) -> Vec<(String, MockCall)> {
        self.0.borrow().clone()
    }

    /// Absolute move targets, in order, with the device that received them
    pub fn moves(&self) -> Vec<(String, i64)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(device, call)| match call {
                MockCall::MoveAbsolute(counts) => Some((device.clone(), *counts)),
                _ => None,
            })
            .collect()
    }

    pub fn move_count(&self) -> usize {
        self.moves().len()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

pub struct MockTransport {
    name: String,
    position: i64,
    log: MockLog,
    busy_polls: u32,
    settings: BTreeMap<String, f64>,
    temperatures: Temperatures,
    warnings: Vec<String>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_log(name, MockLog::new())
    }

    pub fn with_log(name: impl Into<String>, log: MockLog) -> Self {
        let mut settings = BTreeMap::new();
        settings.insert("maxspeed".to_string(), 100_000.0);
        settings.insert("accel".to_string(), 200.0);

        Self {
            name: name.into(),
            position: 0,
            log,
            busy_polls: 0,
            settings,
            temperatures: Temperatures {
                driver: Some(30.0),
                motor: Some(28.0),
            },
            warnings: Vec::new(),
        }
    }

    /// Start at a given native position
    pub fn at(mut self, counts: i64) -> Self {
        self.position = counts;
        self
    }

    /// Report busy for the next `polls` idle checks
    pub fn busy_for(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn with_warnings(mut self, warnings: &[&str]) -> Self {
        self.warnings = warnings.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }
}

impl Transport for MockTransport {
    fn move_absolute(&mut self, counts: i64) -> Result<()> {
        debug!("{}: move abs {}", self.name, counts);
        self.log.record(&self.name, MockCall::MoveAbsolute(counts));
        self.position = counts;
        Ok(())
    }

    fn move_velocity(&mut self, velocity: i64) -> Result<()> {
        self.log.record(&self.name, MockCall::MoveVelocity(velocity));
        Ok(())
    }

    fn position(&mut self) -> Result<i64> {
        Ok(self.position)
    }

    fn home(&mut self) -> Result<()> {
        self.log.record(&self.name, MockCall::Home);
        self.position = 0;
        Ok(())
    }

    fn is_idle(&mut self) -> Result<bool> {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn stop(&mut self) -> Result<()> {
        self.log.record(&self.name, MockCall::Stop);
        Ok(())
    }

    fn temperatures(&mut self) -> Result<Temperatures> {
        Ok(self.temperatures)
    }

    fn warnings(&mut self) -> Result<Vec<String>> {
        Ok(self.warnings.clone())
    }

    fn clear_warnings(&mut self) -> Result<Vec<String>> {
        self.log.record(&self.name, MockCall::ClearWarnings);
        Ok(std::mem::take(&mut self.warnings))
    }

    fn setting(&mut self, name: &str) -> Result<f64> {
        self.settings
            .get(name)
            .copied()
            .ok_or_else(|| TransportError::UnknownSetting {
                name: name.to_string(),
                device: self.describe(),
            })
    }

    fn set_setting(&mut self, name: &str, value: f64) -> Result<()> {
        self.log
            .record(&self.name, MockCall::SetSetting(name.to_string(), value));
        self.settings.insert(name.to_string(), value);
        Ok(())
    }

    fn known_settings(&self) -> &'static [&'static str] {
        &["maxspeed", "accel"]
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_log_orders_calls_across_axes() {
        let log = MockLog::new();
        let mut a = MockTransport::with_log("a", log.clone());
        let mut b = MockTransport::with_log("b", log.clone());

        a.move_absolute(10).unwrap();
        b.home().unwrap();
        b.move_absolute(-5).unwrap();

        assert_eq!(
            log.moves(),
            vec![("a".to_string(), 10), ("b".to_string(), -5)]
        );
        assert_eq!(log.calls()[1], ("b".to_string(), MockCall::Home));
    }

    #[test]
    fn test_scripted_busy_polls() {
        let mut t = MockTransport::new("t").busy_for(2);
        assert!(!t.is_idle().unwrap());
        assert!(!t.is_idle().unwrap());
        assert!(t.is_idle().unwrap());
    }

    #[test]
    fn test_clear_warnings_returns_previous_flags() {
        let mut t = MockTransport::new("t").with_warnings(&["FS", "WL"]);
        assert_eq!(t.clear_warnings().unwrap(), vec!["FS", "WL"]);
        assert!(t.warnings().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_setting() {
        let mut t = MockTransport::new("t");
        assert!(matches!(
            t.setting("limit.max"),
            Err(TransportError::UnknownSetting { .. })
        ));
    }
}
