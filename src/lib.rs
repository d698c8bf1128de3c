pub mod axis;
pub mod calibration_log;
pub mod config;
pub mod messages;
pub mod platform;
pub mod poses;
pub mod runtime;
pub mod scan_app;
pub mod transport;
pub mod units;
