// Axis diagnostic: READ-ONLY check of both serial links
//
// Nothing is written to the drives: no settings, no moves, no alarm resets.
// Run this before axis_test.
//
// Usage: cargo run --example axis_diagnostic -- [rig.toml]

use rig_drive::config::{Protocol, RigConfig};
use rig_drive::transport::{AsciiAxis, AsciiChain, ModbusAxis, ModbusBus, Transport};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

fn report(transport: &mut dyn Transport) {
    match transport.position() {
        Ok(counts) => println!("    Position:     {} (counts)", counts),
        Err(e) => println!("    Position:     ERROR - {}", e),
    }
    match transport.is_idle() {
        Ok(idle) => println!("    Idle:         {}", if idle { "yes" } else { "MOVING" }),
        Err(e) => println!("    Idle:         ERROR - {}", e),
    }
    match transport.temperatures() {
        Ok(t) => println!("    Temperatures: driver {:?}, motor {:?} (deg C)", t.driver, t.motor),
        Err(e) => println!("    Temperatures: ERROR - {}", e),
    }
    match transport.warnings() {
        Ok(flags) if flags.is_empty() => println!("    Warnings:     none"),
        Ok(flags) => println!("    Warnings:     {}", flags.join(", ")),
        Err(e) => println!("    Warnings:     ERROR - {}", e),
    }
    for name in transport.known_settings() {
        match transport.setting(name) {
            Ok(value) => println!("    {:<13} {}", format!("{}:", name), value),
            Err(e) => println!("    {:<13} ERROR - {}", format!("{}:", name), e),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = RigConfig::resolve(path.as_deref())?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Rig Axis Diagnostic (READ-ONLY)                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from the drives - nothing will move    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("ASCII port:  {}", config.ascii_port);
    println!("Modbus port: {}", config.modbus_port);
    println!();

    println!("Step 1: Opening the ASCII chain...");
    let chain = match AsciiChain::open(&config.ascii_port) {
        Ok(mut chain) => {
            println!("  ✓ Port opened");
            match chain.detect() {
                Ok(devices) => println!("  ✓ Devices answering: {:?}", devices),
                Err(e) => println!("  ✗ Detect failed: {}", e),
            }
            Some(Rc::new(RefCell::new(chain)))
        }
        Err(e) => {
            println!("  ✗ Failed to open {}: {}", config.ascii_port, e);
            None
        }
    };
    println!();

    println!("Step 2: Opening the Modbus bus...");
    let bus = match ModbusBus::open(&config.modbus_port) {
        Ok(bus) => {
            println!("  ✓ Port opened");
            Some(Rc::new(RefCell::new(bus)))
        }
        Err(e) => {
            println!("  ✗ Failed to open {}: {}", config.modbus_port, e);
            None
        }
    };
    println!();

    if chain.is_none() && bus.is_none() {
        println!("Troubleshooting:");
        println!("  - Check the port paths in rig.toml");
        println!("  - Verify the USB adapters are connected and the drives powered");
        return Ok(());
    }

    println!("Step 3: Reading axes...");
    println!();
    for axis in &config.axes {
        println!("  === {} ({:?} address {}) ===", axis.label, axis.protocol, axis.address);
        match axis.protocol {
            Protocol::Ascii => match &chain {
                Some(chain) => report(&mut AsciiAxis::with_axis(
                    chain.clone(),
                    axis.address,
                    axis.device_axis,
                )),
                None => println!("    skipped, ASCII port not open"),
            },
            Protocol::Modbus => match &bus {
                Some(bus) => {
                    let mut drive = ModbusAxis::new(bus.clone(), axis.address, axis.operation());
                    match drive.is_ready() {
                        Ok(ready) => println!("    Ready:        {}", if ready { "yes" } else { "NO" }),
                        Err(e) => println!("    Ready:        ERROR - {}", e),
                    }
                    report(&mut drive);
                }
                None => println!("    skipped, Modbus port not open"),
            },
        }
        println!();
    }

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Next step: Run 'cargo run --example axis_test' with the rig clear of obstacles");

    Ok(())
}
