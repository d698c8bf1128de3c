// Hardware transports for single axes
//
// Provides:
// - The `Transport` capability every axis is driven through
// - ASCII motion-controller protocol (daisy-chained stages)
// - Modbus-RTU direct data operation (stepper drivers)
// - A simulated transport for dry runs and tests

pub mod ascii;
pub mod mock;
pub mod modbus;

pub use ascii::{AsciiAxis, AsciiChain};
pub use mock::{MockCall, MockLog, MockTransport};
pub use modbus::{ModbusAxis, ModbusBus, OperationSettings};

/// Error types for axis communication
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for reply from device {address}")]
    Timeout { address: u8 },

    #[error("Device {address} rejected '{command}': {reason}")]
    Rejected {
        address: u8,
        command: String,
        reason: String,
    },

    #[error("Malformed reply from device {address}: {reason}")]
    MalformedReply { address: u8, reason: String },

    #[error("CRC mismatch in reply from slave {address}")]
    CrcMismatch { address: u8 },

    #[error("Slave {address} returned Modbus exception 0x{code:02X}")]
    ModbusException { address: u8, code: u8 },

    #[error("Setting '{name}' is not available on {device}")]
    UnknownSetting { name: String, device: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Temperature readings in deg C, when the device reports them
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperatures {
    pub driver: Option<f64>,
    pub motor: Option<f64>,
}

/// One physical actuator behind a vendor protocol. Positions and velocities are native counts.
pub trait Transport {
    /// Start an absolute move; returns once the command is accepted
    fn move_absolute(&mut self, counts: i64) -> Result<()>;

    /// Start a continuous move at the given signed velocity
    fn move_velocity(&mut self, velocity: i64) -> Result<()>;

    fn position(&mut self) -> Result<i64>;

    /// Run the device's own homing routine; returns once the command is accepted
    fn home(&mut self) -> Result<()>;

    fn is_idle(&mut self) -> Result<bool>;

    fn stop(&mut self) -> Result<()>;

    fn temperatures(&mut self) -> Result<Temperatures>;

    /// Active warning or alarm flags
    fn warnings(&mut self) -> Result<Vec<String>>;

    /// Clear flags, returning the ones that were active
    fn clear_warnings(&mut self) -> Result<Vec<String>>;

    fn setting(&mut self, name: &str) -> Result<f64>;

    fn set_setting(&mut self, name: &str, value: f64) -> Result<()>;

    /// Settings worth re-reading every time they are reported
    fn volatile_settings(&self) -> &'static [&'static str] {
        &[]
    }

    /// Settings reported in an axis settings snapshot
    fn known_settings(&self) -> &'static [&'static str] {
        &[]
    }

    /// Short human-readable identity, e.g. `ascii:/dev/ttyUSB0#2`
    fn describe(&self) -> String;
}
