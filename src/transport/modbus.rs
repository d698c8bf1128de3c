// Modbus-RTU "direct data operation" implementation for stepper drivers
//
// Frame format: [Slave, Function, Payload..., CRC lo, CRC hi] (CRC-16/MODBUS)
// Driver registers are 32-bit values split over two 16-bit registers, upper word first.
// A move is one write of the 16-register direct data block starting at 0x0058.

use crc::{CRC_16_MODBUS, Crc};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

use super::{Result, Temperatures, Transport, TransportError};

/// Default serial configuration for the drivers (even parity, one stop bit)
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Function codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    ReadHolding = 0x03,
    WriteSingle = 0x06,
    WriteMultiple = 0x10,
}

/// Register addresses (upper word of each 32-bit value)
#[repr(u16)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    DirectData = 0x0058,       // 16 registers: no, method, pos, speed, accel, decel, current, trigger
    InputCommand = 0x007D,     // lower word of the driver input command
    OutputStatus = 0x007F,     // lower word of the driver output status
    PresentAlarm = 0x0080,     // 2 registers
    PresentWarning = 0x0096,   // 2 registers
    FeedbackPosition = 0x00CC, // 2 registers, signed counts
    Torque = 0x00D6,           // 2 registers, 0.1 %
    DriverTemperature = 0x00F8, // 2 registers, 0.1 deg C
    MotorTemperature = 0x00FA, // 2 registers, 0.1 deg C
    InverterVoltage = 0x0146,  // 2 registers, 0.1 V
    SupplyVoltage = 0x0148,    // 2 registers, 0.1 V
}

/// Bits of the driver input command register
pub mod input {
    pub const ZHOME: u16 = 0x0010;
    pub const STOP: u16 = 0x0020;
    pub const ALARM_RESET: u16 = 0x0080;
}

/// Bits of the driver output status register
pub mod output {
    pub const HOME_END: u16 = 0x0010;
    pub const READY: u16 = 0x0020;
    pub const MOVE: u16 = 0x2000;
}

/// Direct data operation methods
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationMethod {
    Absolute = 1,
    ContinuousSpeed = 16,
}

/// Speed, rates and current fed into every direct data move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationSettings {
    pub speed: i32,
    pub accel: i32,
    pub decel: i32,
    /// Operating current, 1 = 0.1 %
    pub current: i32,
}

impl OperationSettings {
    pub const ROTARY: OperationSettings = OperationSettings {
        speed: 6000,
        accel: 7000,
        decel: 5000,
        current: 100,
    };

    pub const LINEAR: OperationSettings = OperationSettings {
        speed: 2000,
        accel: 8000,
        decel: 7000,
        current: 100,
    };
}

/// Modbus-RTU bus - handles framing and serial communication with drivers
pub struct ModbusBus<P = Box<dyn SerialPort>> {
    port: P,
    name: String,
}

impl ModbusBus {
    /// Open a new connection to the bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl<P: Read + Write> ModbusBus<P> {
    /// Wrap an already opened port
    pub fn from_port(port: P, name: impl Into<String>) -> Self {
        Self {
            port,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn crc(data: &[u8]) -> u16 {
        MODBUS_CRC.checksum(data)
    }

    /// Build a frame with slave address, function code and trailing CRC
    fn build_frame(slave: u8, function: Function, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.push(slave);
        frame.push(function as u8);
        frame.extend_from_slice(payload);

        let crc = Self::crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn read_exact(&mut self, slave: u8, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                TransportError::Timeout { address: slave }
            }
            _ => TransportError::Io(e),
        })
    }

    /// Send a request and read the reply; returns the reply payload after the function code
    fn transact(&mut self, slave: u8, function: Function, payload: &[u8]) -> Result<Vec<u8>> {
        let request = Self::build_frame(slave, function, payload);
        debug!("modbus tx: {:02X?}", request);
        self.port.write_all(&request)?;
        self.port.flush()?;

        let mut reply = vec![0u8; 2];
        self.read_exact(slave, &mut reply)?;

        if reply[0] != slave {
            return Err(TransportError::MalformedReply {
                address: slave,
                reason: format!("slave mismatch: expected {}, got {}", slave, reply[0]),
            });
        }

        let body_len = if reply[1] == function as u8 | 0x80 {
            1
        } else if reply[1] != function as u8 {
            return Err(TransportError::MalformedReply {
                address: slave,
                reason: format!("function mismatch: 0x{:02X}", reply[1]),
            });
        } else {
            match function {
                Function::ReadHolding => {
                    let mut count = [0u8; 1];
                    self.read_exact(slave, &mut count)?;
                    reply.push(count[0]);
                    count[0] as usize
                }
                // Echo of address + quantity (or value)
                Function::WriteSingle | Function::WriteMultiple => 4,
            }
        };

        let start = reply.len();
        reply.resize(start + body_len + 2, 0);
        self.read_exact(slave, &mut reply[start..])?;
        debug!("modbus rx: {:02X?}", reply);

        let crc_at = reply.len() - 2;
        let received = u16::from_le_bytes([reply[crc_at], reply[crc_at + 1]]);
        if Self::crc(&reply[..crc_at]) != received {
            return Err(TransportError::CrcMismatch { address: slave });
        }

        if reply[1] & 0x80 != 0 {
            return Err(TransportError::ModbusException {
                address: slave,
                code: reply[2],
            });
        }

        Ok(reply[2..crc_at].to_vec())
    }

    /// Read `count` holding registers starting at `register`
    pub fn read_holding(&mut self, slave: u8, register: u16, count: u16) -> Result<Vec<u16>> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(&count.to_be_bytes());

        let body = self.transact(slave, Function::ReadHolding, &payload)?;
        let data = &body[1..];
        if data.len() != count as usize * 2 {
            return Err(TransportError::MalformedReply {
                address: slave,
                reason: format!("expected {} bytes, got {}", count * 2, data.len()),
            });
        }

        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Read a signed 32-bit value spread over two registers
    pub fn read_i32(&mut self, slave: u8, register: Register) -> Result<i32> {
        let words = self.read_holding(slave, register as u16, 2)?;
        Ok(join_words(words[0], words[1]))
    }

    pub fn write_single(&mut self, slave: u8, register: u16, value: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
        self.transact(slave, Function::WriteSingle, &payload)?;
        Ok(())
    }

    pub fn write_multiple(&mut self, slave: u8, register: u16, values: &[u16]) -> Result<()> {
        let mut payload = Vec::with_capacity(5 + values.len() * 2);
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        payload.push((values.len() * 2) as u8);
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.transact(slave, Function::WriteMultiple, &payload)?;
        Ok(())
    }
}

/// Split a signed 32-bit value into [upper, lower] register words
fn split_words(value: i32) -> [u16; 2] {
    let raw = value as u32;
    [(raw >> 16) as u16, (raw & 0xFFFF) as u16]
}

fn join_words(upper: u16, lower: u16) -> i32 {
    (((upper as u32) << 16) | lower as u32) as i32
}

/// One driver (slave) on a shared Modbus bus
pub struct ModbusAxis<P = Box<dyn SerialPort>> {
    bus: Rc<RefCell<ModbusBus<P>>>,
    slave: u8,
    settings: OperationSettings,
}

impl<P: Read + Write> ModbusAxis<P> {
    pub fn new(bus: Rc<RefCell<ModbusBus<P>>>, slave: u8, settings: OperationSettings) -> Self {
        Self {
            bus,
            slave,
            settings,
        }
    }

    pub fn operation_settings(&self) -> OperationSettings {
        self.settings
    }

    /// Write the direct data block; trigger 1 starts the operation immediately
    fn direct_data(&mut self, method: OperationMethod, position: i32, speed: i32) -> Result<()> {
        let fields = [
            0, // operation data number
            method as i32,
            position,
            speed,
            self.settings.accel,
            self.settings.decel,
            self.settings.current,
            1, // trigger
        ];

        let words: Vec<u16> = fields.iter().flat_map(|&v| split_words(v)).collect();
        debug!(
            "Direct data to slave {}: method={:?}, pos={}, speed={}",
            self.slave, method, position, speed
        );
        self.bus
            .borrow_mut()
            .write_multiple(self.slave, Register::DirectData as u16, &words)
    }

    /// Input bits are level-triggered: set, then release
    fn pulse_input(&mut self, bit: u16) -> Result<()> {
        let mut bus = self.bus.borrow_mut();
        bus.write_single(self.slave, Register::InputCommand as u16, bit)?;
        bus.write_single(self.slave, Register::InputCommand as u16, 0)
    }

    fn output_status(&mut self) -> Result<u16> {
        let words = self
            .bus
            .borrow_mut()
            .read_holding(self.slave, Register::OutputStatus as u16, 1)?;
        Ok(words[0])
    }

    /// READY output, used to tell a powered driver from an absent one
    pub fn is_ready(&mut self) -> Result<bool> {
        Ok(self.output_status()? & output::READY != 0)
    }

    pub fn home_complete(&mut self) -> Result<bool> {
        Ok(self.output_status()? & output::HOME_END != 0)
    }

    /// Readings reported in tenths
    fn read_tenths(&mut self, register: Register) -> Result<f64> {
        let raw = self.bus.borrow_mut().read_i32(self.slave, register)?;
        Ok(raw as f64 / 10.0)
    }

    fn unknown(&self, name: &str) -> TransportError {
        TransportError::UnknownSetting {
            name: name.to_string(),
            device: self.describe(),
        }
    }
}

impl<P: Read + Write> Transport for ModbusAxis<P> {
    fn move_absolute(&mut self, counts: i64) -> Result<()> {
        let position = i32::try_from(counts).map_err(|_| TransportError::Rejected {
            address: self.slave,
            command: "move absolute".to_string(),
            reason: format!("position {} does not fit the driver register", counts),
        })?;
        let speed = self.settings.speed;
        self.direct_data(OperationMethod::Absolute, position, speed)
    }

    fn move_velocity(&mut self, velocity: i64) -> Result<()> {
        let speed = velocity.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        self.direct_data(OperationMethod::ContinuousSpeed, 0, speed)
    }

    fn position(&mut self) -> Result<i64> {
        let raw = self
            .bus
            .borrow_mut()
            .read_i32(self.slave, Register::FeedbackPosition)?;
        Ok(raw as i64)
    }

    fn home(&mut self) -> Result<()> {
        self.pulse_input(input::ZHOME)
    }

    fn is_idle(&mut self) -> Result<bool> {
        let status = self.output_status()?;
        Ok(status & output::READY != 0 && status & output::MOVE == 0)
    }

    fn stop(&mut self) -> Result<()> {
        self.pulse_input(input::STOP)
    }

    fn temperatures(&mut self) -> Result<Temperatures> {
        Ok(Temperatures {
            driver: Some(self.read_tenths(Register::DriverTemperature)?),
            motor: Some(self.read_tenths(Register::MotorTemperature)?),
        })
    }

    fn warnings(&mut self) -> Result<Vec<String>> {
        let mut bus = self.bus.borrow_mut();
        let alarm = bus.read_i32(self.slave, Register::PresentAlarm)?;
        let warning = bus.read_i32(self.slave, Register::PresentWarning)?;

        let mut flags = Vec::new();
        if alarm != 0 {
            flags.push(format!("alarm 0x{:02X}", alarm));
        }
        if warning != 0 {
            flags.push(format!("warning 0x{:02X}", warning));
        }
        Ok(flags)
    }

    fn clear_warnings(&mut self) -> Result<Vec<String>> {
        let flags = self.warnings()?;
        self.pulse_input(input::ALARM_RESET)?;
        Ok(flags)
    }

    fn setting(&mut self, name: &str) -> Result<f64> {
        match name {
            "speed" => Ok(self.settings.speed as f64),
            "accel" => Ok(self.settings.accel as f64),
            "decel" => Ok(self.settings.decel as f64),
            "current" => Ok(self.settings.current as f64),
            "torque" => self.read_tenths(Register::Torque),
            "driver.temperature" => self.read_tenths(Register::DriverTemperature),
            "motor.temperature" => self.read_tenths(Register::MotorTemperature),
            "inverter_voltage" => self.read_tenths(Register::InverterVoltage),
            "supply_voltage" => self.read_tenths(Register::SupplyVoltage),
            _ => Err(self.unknown(name)),
        }
    }

    fn set_setting(&mut self, name: &str, value: f64) -> Result<()> {
        let value = value.round() as i32;
        match name {
            "speed" => self.settings.speed = value,
            "accel" => self.settings.accel = value,
            "decel" => self.settings.decel = value,
            "current" => self.settings.current = value,
            _ => return Err(self.unknown(name)),
        }
        Ok(())
    }

    fn volatile_settings(&self) -> &'static [&'static str] {
        &[
            "torque",
            "driver.temperature",
            "motor.temperature",
            "inverter_voltage",
            "supply_voltage",
        ]
    }

    fn known_settings(&self) -> &'static [&'static str] {
        &[
            "speed",
            "accel",
            "decel",
            "current",
            "torque",
            "driver.temperature",
            "motor.temperature",
            "inverter_voltage",
            "supply_voltage",
        ]
    }

    fn describe(&self) -> String {
        format!("modbus:{}#{}", self.bus.borrow().name(), self.slave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FakePort {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    type Bus = ModbusBus<FakePort>;

    /// Reply frame with a valid CRC
    fn reply(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        frame.extend_from_slice(&Bus::crc(bytes).to_le_bytes());
        frame
    }

    fn bus(replies: Vec<Vec<u8>>) -> Rc<RefCell<Bus>> {
        let input: Vec<u8> = replies.concat();
        Rc::new(RefCell::new(ModbusBus::from_port(
            FakePort {
                input: Cursor::new(input),
                output: Vec::new(),
            },
            "fake",
        )))
    }

    #[test]
    fn test_crc_reference_frame() {
        // Read one register at 0 from slave 1: 01 03 00 00 00 01 84 0A
        let frame = Bus::build_frame(1, Function::ReadHolding, &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_word_split_round_trip_negative() {
        assert_eq!(split_words(-2), [0xFFFF, 0xFFFE]);
        assert_eq!(join_words(0xFFFF, 0xFFFE), -2);
        assert_eq!(split_words(70_000), [0x0001, 0x1170]);
    }

    #[test]
    fn test_read_position() {
        let bus = bus(vec![reply(&[3, 0x03, 4, 0x00, 0x01, 0x11, 0x70])]);
        let mut axis = ModbusAxis::new(bus.clone(), 3, OperationSettings::ROTARY);
        assert_eq!(axis.position().unwrap(), 70_000);

        let sent = bus.borrow().port.output.clone();
        assert_eq!(&sent[..6], &[3, 0x03, 0x00, 0xCC, 0x00, 0x02]);
    }

    #[test]
    fn test_move_absolute_writes_direct_data_block() {
        let bus = bus(vec![reply(&[3, 0x10, 0x00, 0x58, 0x00, 0x10])]);
        let mut axis = ModbusAxis::new(bus.clone(), 3, OperationSettings::ROTARY);
        axis.move_absolute(9000).unwrap();

        let sent = bus.borrow().port.output.clone();
        // slave, fn, start, quantity 16, 32 bytes, 16 words, crc
        assert_eq!(sent.len(), 2 + 4 + 1 + 32 + 2);
        assert_eq!(&sent[..7], &[3, 0x10, 0x00, 0x58, 0x00, 0x10, 32]);
        // method word pair = 1 (absolute)
        assert_eq!(&sent[11..15], &[0, 0, 0, 1]);
        // position word pair = 9000
        assert_eq!(&sent[15..19], &9000i32.to_be_bytes());
        // trigger = 1
        assert_eq!(&sent[35..39], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_idle_requires_ready_without_move() {
        let bus = bus(vec![
            reply(&[1, 0x03, 2, 0x20, 0x20]), // READY | MOVE
            reply(&[1, 0x03, 2, 0x00, 0x20]), // READY
        ]);
        let mut axis = ModbusAxis::new(bus, 1, OperationSettings::LINEAR);
        assert!(!axis.is_idle().unwrap());
        assert!(axis.is_idle().unwrap());
    }

    #[test]
    fn test_exception_reply() {
        let bus = bus(vec![reply(&[1, 0x83, 0x02])]);
        let mut axis = ModbusAxis::new(bus, 1, OperationSettings::LINEAR);
        assert!(matches!(
            axis.position(),
            Err(TransportError::ModbusException { address: 1, code: 2 })
        ));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut frame = reply(&[1, 0x03, 4, 0, 0, 0, 5]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let bus = bus(vec![frame]);
        let mut axis = ModbusAxis::new(bus, 1, OperationSettings::LINEAR);
        assert!(matches!(
            axis.position(),
            Err(TransportError::CrcMismatch { address: 1 })
        ));
    }

    #[test]
    fn test_home_pulses_zhome() {
        let bus = bus(vec![
            reply(&[2, 0x06, 0x00, 0x7D, 0x00, 0x10]),
            reply(&[2, 0x06, 0x00, 0x7D, 0x00, 0x00]),
        ]);
        let mut axis = ModbusAxis::new(bus.clone(), 2, OperationSettings::ROTARY);
        axis.home().unwrap();

        let sent = bus.borrow().port.output.clone();
        assert_eq!(&sent[..6], &[2, 0x06, 0x00, 0x7D, 0x00, 0x10]);
        assert_eq!(&sent[8..14], &[2, 0x06, 0x00, 0x7D, 0x00, 0x00]);
    }

    #[test]
    fn test_temperatures_in_tenths() {
        let bus = bus(vec![
            reply(&[3, 0x03, 4, 0, 0, 0x01, 0x5E]), // 350 -> 35.0
            reply(&[3, 0x03, 4, 0, 0, 0x01, 0x2C]), // 300 -> 30.0
        ]);
        let mut axis = ModbusAxis::new(bus, 3, OperationSettings::ROTARY);
        let temps = axis.temperatures().unwrap();
        assert_eq!(temps.driver, Some(35.0));
        assert_eq!(temps.motor, Some(30.0));
    }

    #[test]
    fn test_local_settings() {
        let bus = bus(vec![]);
        let mut axis = ModbusAxis::new(bus, 3, OperationSettings::ROTARY);
        axis.set_setting("speed", 1234.0).unwrap();
        assert_eq!(axis.setting("speed").unwrap(), 1234.0);
        assert!(matches!(
            axis.set_setting("maxspeed", 1.0),
            Err(TransportError::UnknownSetting { .. })
        ));
    }

    #[test]
    fn test_silent_slave_times_out() {
        let bus = bus(vec![]);
        let mut axis = ModbusAxis::new(bus, 5, OperationSettings::LINEAR);
        assert!(matches!(
            axis.is_idle(),
            Err(TransportError::Timeout { address: 5 })
        ));
    }
}
