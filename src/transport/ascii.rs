// ASCII motion-controller protocol implementation
//
// Devices are daisy-chained on one serial port and addressed by number.
// Command: /{device} {axis} {command}\n
// Reply:   @{device} {axis} {OK|RJ} {IDLE|BUSY} {warning|--} {data}\r\n
// Lines starting with '#' (info) or '!' (alert) are not replies.

use serialport::SerialPort;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

use super::{Result, Temperatures, Transport, TransportError};

/// Default serial configuration for the ASCII chain
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Address every device on the chain answers to
pub const BROADCAST: u8 = 0;

const MAX_LINE_LEN: usize = 256;

/// Parsed reply line
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub device: u8,
    pub axis: u8,
    pub accepted: bool,
    pub busy: bool,
    /// Highest-priority warning flag, `None` for `--`
    pub warning: Option<String>,
    pub data: String,
}

impl Reply {
    pub fn parse(line: &str) -> std::result::Result<Reply, String> {
        let body = line
            .trim()
            .strip_prefix('@')
            .ok_or_else(|| format!("not a reply: {:?}", line))?;
        let mut fields = body.split_whitespace();
        let mut next = |what: &str| {
            fields
                .next()
                .ok_or_else(|| format!("missing {} in {:?}", what, line))
        };

        let device = next("device")?
            .parse::<u8>()
            .map_err(|e| format!("bad device number: {}", e))?;
        let axis = next("axis")?
            .parse::<u8>()
            .map_err(|e| format!("bad axis number: {}", e))?;
        let accepted = match next("reply flag")? {
            "OK" => true,
            "RJ" => false,
            other => return Err(format!("unknown reply flag {:?}", other)),
        };
        let busy = match next("status")? {
            "IDLE" => false,
            "BUSY" => true,
            other => return Err(format!("unknown status {:?}", other)),
        };
        let warning = match next("warning flag")? {
            "--" => None,
            flag => Some(flag.to_string()),
        };
        let data = fields.collect::<Vec<_>>().join(" ");

        Ok(Reply {
            device,
            axis,
            accepted,
            busy,
            warning,
            data,
        })
    }
}

/// One serial port with a chain of ASCII-protocol devices
pub struct AsciiChain<P = Box<dyn SerialPort>> {
    port: P,
    name: String,
}

impl AsciiChain {
    /// Open a new connection to the chain
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl<P: Read + Write> AsciiChain<P> {
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

    fn format_command(device: u8, axis: u8, command: &str) -> String {
        if command.is_empty() {
            format!("/{} {}\n", device, axis)
        } else {
            format!("/{} {} {}\n", device, axis, command)
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("ascii tx: {}", line.trim_end());
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one line, without the trailing CR/LF
    fn read_line(&mut self, address: u8) -> Result<String> {
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];

        loop {
            self.port.read_exact(&mut byte).map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                    TransportError::Timeout { address }
                }
                _ => TransportError::Io(e),
            })?;

            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                b => line.push(b),
            }

            if line.len() > MAX_LINE_LEN {
                return Err(TransportError::MalformedReply {
                    address,
                    reason: "reply line too long".to_string(),
                });
            }
        }

        let line = String::from_utf8_lossy(&line).into_owned();
        debug!("ascii rx: {}", line);
        Ok(line)
    }

    /// Send a command and wait for the matching reply
    pub fn command(&mut self, device: u8, axis: u8, command: &str) -> Result<Reply> {
        let line = Self::format_command(device, axis, command);
        self.send_line(&line)?;

        loop {
            let raw = self.read_line(device)?;
            if raw.is_empty() || raw.starts_with('#') || raw.starts_with('!') {
                continue;
            }

            let reply = Reply::parse(&raw).map_err(|reason| TransportError::MalformedReply {
                address: device,
                reason,
            })?;

            if device != BROADCAST && reply.device != device {
                continue;
            }

            if !reply.accepted {
                return Err(TransportError::Rejected {
                    address: device,
                    command: command.to_string(),
                    reason: reply.data,
                });
            }

            return Ok(reply);
        }
    }

    /// Broadcast an identity query and collect every device address that answers
    pub fn detect(&mut self) -> Result<Vec<u8>> {
        let line = Self::format_command(BROADCAST, 0, "get device.id");
        self.send_line(&line)?;

        let mut found = Vec::new();
        loop {
            match self.read_line(BROADCAST) {
                Ok(raw) => {
                    if let Ok(reply) = Reply::parse(&raw) {
                        debug!("device {} answered with id {}", reply.device, reply.data);
                        found.push(reply.device);
                    }
                }
                Err(TransportError::Timeout { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        found.sort_unstable();
        found.dedup();
        Ok(found)
    }
}

/// One axis of one device on a shared ASCII chain
pub struct AsciiAxis<P = Box<dyn SerialPort>> {
    chain: Rc<RefCell<AsciiChain<P>>>,
    device: u8,
    axis: u8,
}

impl<P: Read + Write> AsciiAxis<P> {
    /// Axis 1 of `device`, which is how single-axis stages are addressed
    pub fn new(chain: Rc<RefCell<AsciiChain<P>>>, device: u8) -> Self {
        Self::with_axis(chain, device, 1)
    }

    pub fn with_axis(chain: Rc<RefCell<AsciiChain<P>>>, device: u8, axis: u8) -> Self {
        Self {
            chain,
            device,
            axis,
        }
    }

    fn send(&self, command: &str) -> Result<Reply> {
        self.chain.borrow_mut().command(self.device, self.axis, command)
    }

    /// Device-scope commands go to axis 0
    fn send_device(&self, command: &str) -> Result<Reply> {
        self.chain.borrow_mut().command(self.device, 0, command)
    }

    fn parse_number(&self, reply: &Reply) -> Result<f64> {
        reply
            .data
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| TransportError::MalformedReply {
                address: self.device,
                reason: format!("expected a number, got {:?}", reply.data),
            })
    }

    fn optional_reading(&self, command: &str) -> Result<Option<f64>> {
        match self.send_device(command) {
            Ok(reply) => Ok(Some(self.parse_number(&reply)?)),
            Err(TransportError::Rejected { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `warnings` data is a count followed by the flags
    fn parse_flags(reply: &Reply) -> Vec<String> {
        reply
            .data
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect()
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl<P: Read + Write> Transport for AsciiAxis<P> {
    fn move_absolute(&mut self, counts: i64) -> Result<()> {
        self.send(&format!("move abs {}", counts)).map(|_| ())
    }

    fn move_velocity(&mut self, velocity: i64) -> Result<()> {
        self.send(&format!("move vel {}", velocity)).map(|_| ())
    }

    fn position(&mut self) -> Result<i64> {
        let reply = self.send("get pos")?;
        Ok(self.parse_number(&reply)?.round() as i64)
    }

    fn home(&mut self) -> Result<()> {
        self.send("home").map(|_| ())
    }

    fn is_idle(&mut self) -> Result<bool> {
        Ok(!self.send("")?.busy)
    }

    fn stop(&mut self) -> Result<()> {
        self.send("stop").map(|_| ())
    }

    fn temperatures(&mut self) -> Result<Temperatures> {
        Ok(Temperatures {
            driver: self.optional_reading("get driver.temperature")?,
            motor: self.optional_reading("get system.temperature")?,
        })
    }

    fn warnings(&mut self) -> Result<Vec<String>> {
        let reply = self.send_device("warnings")?;
        Ok(Self::parse_flags(&reply))
    }

    fn clear_warnings(&mut self) -> Result<Vec<String>> {
        let reply = self.send_device("warnings clear")?;
        Ok(Self::parse_flags(&reply))
    }

    fn setting(&mut self, name: &str) -> Result<f64> {
        match self.send(&format!("get {}", name)) {
            Ok(reply) => self.parse_number(&reply),
            Err(TransportError::Rejected { .. }) => Err(TransportError::UnknownSetting {
                name: name.to_string(),
                device: self.describe(),
            }),
            Err(e) => Err(e),
        }
    }

    fn set_setting(&mut self, name: &str, value: f64) -> Result<()> {
        match self.send(&format!("set {} {}", name, format_value(value))) {
            Ok(_) => Ok(()),
            Err(TransportError::Rejected { .. }) => Err(TransportError::UnknownSetting {
                name: name.to_string(),
                device: self.describe(),
            }),
            Err(e) => Err(e),
        }
    }

    fn volatile_settings(&self) -> &'static [&'static str] {
        &["pos", "driver.temperature", "system.temperature", "system.voltage"]
    }

    fn known_settings(&self) -> &'static [&'static str] {
        &[
            "maxspeed",
            "accel",
            "limit.min",
            "limit.max",
            "driver.current.run",
            "driver.current.hold",
            "resolution",
            "pos",
            "driver.temperature",
            "system.temperature",
            "system.voltage",
        ]
    }

    fn describe(&self) -> String {
        format!("ascii:{}#{}", self.chain.borrow().name(), self.device)
    }
}
