use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rig_drive::axis::AxisLabel;
use rig_drive::calibration_log;
use rig_drive::config::RigConfig;
use rig_drive::platform::{Platform, Target, presets, sequences};
use rig_drive::poses;
use rig_drive::runtime;
use rig_drive::scan_app::{ScanApp, ScanRequest};
use rig_drive::units::Unit;

#[derive(Parser)]
#[command(version, about = "Drive the scanner calibration rig")]
struct Cli {
    /// Rig description (TOML); rig.toml or the stock rig when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated axes instead of the serial links
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices on the ASCII chain and the configured axes
    Detect,
    /// Print the position of every axis
    Position,
    /// Home one axis, or all of them
    Home { axis: Option<AxisLabel> },
    /// Move one axis, relative to its home unless --absolute
    Move {
        axis: AxisLabel,
        #[arg(allow_negative_numbers = true)]
        value: f64,
        /// mm, deg, rad or counts; the axis base unit when absent
        #[arg(long, value_parser = parse_unit)]
        unit: Option<Unit>,
        #[arg(long)]
        absolute: bool,
    },
    /// Put the scanner at an attack angle to the target
    Attack {
        #[arg(allow_negative_numbers = true)]
        angle: f64,
        /// Angle is in radians
        #[arg(long)]
        rad: bool,
        /// New target tilt in deg; every home offset follows it
        #[arg(long, allow_negative_numbers = true)]
        tilt: Option<f64>,
    },
    /// Move to a fixture pose given as left/right steps
    LrPose {
        #[arg(allow_negative_numbers = true)]
        left: f64,
        #[arg(allow_negative_numbers = true)]
        right: f64,
    },
    /// Move through the poses of a CSV, XML or calibration zip file
    RunPoses {
        file: PathBuf,
        /// z_lin values are distances to the target, others are subtracted from home
        #[arg(long)]
        relative: bool,
        /// Scan at every pose through the scan application on stdin/stdout
        #[arg(long)]
        scan: bool,
        #[arg(long, default_value_t = 1)]
        repeats: u32,
        #[arg(long, default_value = "pose")]
        name: String,
        /// Save the scan project here when done
        #[arg(long)]
        project: Option<String>,
    },
    /// Go to a stored calibration (or ball plate) position
    Preset {
        name: Option<String>,
        #[arg(long)]
        ballplate: bool,
    },
    /// Calibrate at every golden pose, once per output archive
    Calibrate {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, default_value = presets::DEFAULT_CALIBRATION)]
        preset: String,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        x_rot_deg: f64,
    },
    /// Fine-align the home offsets from repeated calibrations
    Align {
        #[arg(long, default_value_t = -15.0, allow_negative_numbers = true)]
        attack: f64,
        #[arg(long, default_value_t = 2)]
        poses: usize,
        #[arg(long, default_value_t = 1)]
        trials: u32,
        /// Calibration log; the scan application's log folder when absent
        #[arg(long)]
        log: Option<PathBuf>,
        /// Change the target tilt (deg) before aligning
        #[arg(long, allow_negative_numbers = true)]
        tilt: Option<f64>,
    },
    /// Jog one axis from the keyboard
    Jog { axis: AxisLabel },
    /// Print motor and driver temperatures
    Temps,
    /// Print active warnings
    Warnings {
        #[arg(long)]
        clear: bool,
    },
    /// Reload the newest scanner hardware setup in the scan application
    Reconnect {
        /// Seconds to let the scanner settle afterwards
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },
    /// Leave the rig ready for the next homing run
    End,
}

fn parse_unit(s: &str) -> Result<Unit, String> {
    match s {
        "counts" | "native" => Ok(Unit::Native),
        _ => Unit::from_key(s).ok_or_else(|| format!("unknown unit '{}'", s)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Setup logging (set RUST_LOG=info or debug); stdout is reserved for the scan application
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RigConfig::resolve(cli.config.as_deref())?;
    config.simulate |= cli.simulate;

    let mut platform = Platform::from_config(&config)?;

    match cli.command {
        Command::Detect => {
            for line in platform.describe() {
                println!("{}", line);
            }
        }
        Command::Position => {
            for (label, position) in platform.positions()? {
                let unit = platform.axis(label)?.unit();
                println!("{}: {:.4} {}", label, position, unit);
            }
        }
        Command::Home { axis: Some(label) } => {
            platform.home_axis(label)?;
        }
        Command::Home { axis: None } => platform.home_all()?,
        Command::Move {
            axis,
            value,
            unit,
            absolute,
        } => {
            if let Some(unit) = unit {
                platform.axis_mut(axis)?.set_units(unit)?;
            }
            let outcome = if absolute {
                platform.move_axis_absolute(axis, value)?
            } else {
                platform.move_axis(axis, value)?
            };
            println!("{}: {:?}", axis, outcome);
        }
        Command::Attack { angle, rad, tilt } => {
            let unit = if rad { Unit::Radians } else { Unit::Degrees };
            match tilt {
                Some(tilt) => platform.move_attack_angle_at_tilt(angle, unit, tilt)?,
                None => platform.move_attack_angle(angle, unit)?,
            };
        }
        Command::LrPose { left, right } => {
            platform.move_to_lr_pose(left, right)?;
        }
        Command::RunPoses {
            file,
            relative,
            scan,
            repeats,
            name,
            project,
        } => {
            let records = poses::load(&file)?;
            let mut app = scan.then(|| ScanApp::stdio().with_config(&config.scan_app));
            for pose in &records {
                info!("Pose {}: {}", pose.id, pose.keys().collect::<Vec<_>>().join(", "));
                platform.move_pose(pose, relative)?;
                if let Some(app) = app.as_mut() {
                    app.scan(&ScanRequest {
                        repeats,
                        name: Some(format!("{}-{}", name, pose.id)),
                        positions: platform.base_positions()?,
                        ..ScanRequest::default()
                    })?;
                }
            }
            if let (Some(app), Some(project)) = (app.as_mut(), project.as_deref()) {
                app.save_project(Some(project))?;
            }
            info!("Ran {} poses from {}", records.len(), file.display());
        }
        Command::Preset { name, ballplate } => {
            if ballplate {
                let name = name.as_deref().unwrap_or(presets::DEFAULT_BALLPLATE);
                platform.ballplate_position(Target::Preset(name), true)?;
            } else {
                let name = name.as_deref().unwrap_or(presets::DEFAULT_CALIBRATION);
                platform.calibrate_position(Target::Preset(name))?;
            }
        }
        Command::Calibrate {
            paths,
            preset,
            x_rot_deg,
        } => {
            let mut app = ScanApp::stdio().with_config(&config.scan_app);
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            sequences::calibrate(&mut platform, &mut app, &paths, &preset, x_rot_deg)?;
        }
        Command::Align {
            attack,
            poses,
            trials,
            log,
            tilt,
        } => {
            let log = log
                .or_else(calibration_log::default_log_path)
                .ok_or("no calibration log given and LOCALAPPDATA is not set")?;
            let mut app = ScanApp::stdio().with_config(&config.scan_app);
            let correction = match tilt {
                Some(tilt) => sequences::realign(
                    &mut platform,
                    &mut app,
                    &log,
                    tilt,
                    attack,
                    poses,
                    trials,
                )?,
                None => sequences::align_sequence(
                    &mut platform,
                    &mut app,
                    &log,
                    attack,
                    poses,
                    trials,
                )?,
            };
            info!("Last alignment correction: {:?}", correction);
        }
        Command::Jog { axis } => {
            let (jogged, state) = platform.axis_with_state(axis)?;
            runtime::run(jogged, state)?;
            let position = platform.positions()?[&axis];
            println!("{}: {:.4} {}", axis, position, platform.axis(axis)?.unit());
        }
        Command::Temps => {
            for (name, reading) in platform.temperatures() {
                match reading {
                    Some(t) => println!("{}: {:.1}", name, t),
                    None => println!("{}: n/a", name),
                }
            }
        }
        Command::Warnings { clear } => {
            let warnings = if clear {
                platform.clear_warnings()?
            } else {
                platform.warnings()?
            };
            for (label, flags) in warnings {
                println!("{}: {:?}", label, flags);
            }
        }
        Command::Reconnect { delay } => {
            let dir = config
                .scan_app
                .setup_folder()
                .ok_or("no setup_dir configured and LOCALAPPDATA is not set")?;
            let mut app = ScanApp::stdio().with_config(&config.scan_app);
            app.reconnect_scanner(&dir, Duration::from_secs(delay))?;
            info!("Scanner reconnected from {}", dir.display());
        }
        Command::End => platform.end(),
    }

    Ok(())
}
