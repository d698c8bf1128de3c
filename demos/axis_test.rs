// Axis test: careful, step-by-step moves of every configured axis
//
// IMPORTANT: Run axis_diagnostic FIRST to verify read-only communication.
//
// Usage: cargo run --example axis_test -- [rig.toml] [--simulate]
//
// Safety features:
// - Explicit confirmation before any writes
// - Small test moves around home
// - Every axis is stopped on abort

use rig_drive::axis::AxisKind;
use rig_drive::config::RigConfig;
use rig_drive::platform::Platform;
use std::io::{self, Write};
use std::path::PathBuf;

const LINEAR_STEP_MM: f64 = 5.0;
const ROTARY_STEP_DEG: f64 = 2.0;

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut path = None;
    let mut simulate = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" => simulate = true,
            _ => path = Some(PathBuf::from(arg)),
        }
    }
    let mut config = RigConfig::resolve(path.as_deref())?;
    config.simulate |= simulate;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Rig Axis Test (WITH WRITES)                    ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ⚠  This tool WILL write settings and move every axis!       ║");
    println!("║  ⚠  Keep hands and the target clear of the scanner arm!      ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    if !confirm("Have you run axis_diagnostic first and verified all axes respond?")? {
        println!("Please run: cargo run --example axis_diagnostic");
        return Ok(());
    }

    if !confirm("Is the travel of every axis clear?")? {
        println!("Clear the rig before moving anything.");
        return Ok(());
    }

    // ========== STEP 1: Connect and configure ==========
    println!();
    println!("Step 1: Opening links and writing startup settings...");
    let mut platform = Platform::from_config(&config)?;
    for line in platform.describe() {
        println!("  ✓ {}", line);
    }
    println!();

    // ========== STEP 2: Home ==========
    println!("Step 2: Homing every axis (rotary first, then linear)...");
    if !confirm("Proceed with homing?")? {
        println!("Aborted.");
        return Ok(());
    }
    platform.home_all()?;
    println!("  ✓ Homed");
    println!();

    // ========== STEP 3: Small moves around home ==========
    println!("Step 3: Moving each axis a small step out and back...");
    println!();
    for label in platform.labels() {
        let (step, unit) = match label.kind() {
            AxisKind::Linear => (LINEAR_STEP_MM, "mm"),
            AxisKind::Rotary | AxisKind::Tilt => (ROTARY_STEP_DEG, "deg"),
        };
        if !confirm(&format!("Move {} by {} {}?", label, step, unit))? {
            println!("  Skipped {}", label);
            continue;
        }

        let outcome = match label.kind() {
            AxisKind::Linear => platform.move_axis(label, step),
            AxisKind::Rotary | AxisKind::Tilt => platform.move_degrees(label, step),
        };
        match outcome {
            Ok(outcome) => println!("  {} out: {:?}", label, outcome),
            Err(e) => {
                println!("  ✗ {} failed: {} - stopping all axes", label, e);
                platform.stop()?;
                return Err(e.into());
            }
        }
        let back = match label.kind() {
            AxisKind::Linear => platform.move_axis(label, 0.0)?,
            AxisKind::Rotary | AxisKind::Tilt => platform.move_degrees(label, 0.0)?,
        };
        println!("  {} back: {:?}", label, back);
    }
    println!();

    // ========== STEP 4: Report ==========
    println!("Step 4: Final positions and temperatures...");
    for (label, position) in platform.positions()? {
        println!("  {}: {:.4}", label, position);
    }
    for (name, reading) in platform.temperatures() {
        println!("  {}: {:?}", name, reading);
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                       Test Complete                          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");

    Ok(())
}
