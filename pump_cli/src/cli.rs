//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pumpctl", version, about = "Peristaltic pump flow controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/pumpctl.toml")]
    pub config: PathBuf,

    /// Emit telemetry, results and logs as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Log level (error|warn|info|debug|trace); overrides logging.level, default info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Run the simulated plant on a virtual clock (no real-time sleeping)
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub fast: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hold a flow set-point, printing telemetry
    Run {
        /// Set-point in µL/min (overrides control.setpoint_ul_min)
        #[arg(long, value_name = "UL_MIN")]
        setpoint: Option<f32>,
        /// Stop after this many milliseconds (default: until Ctrl-C)
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,
        /// Load the bundle from this file (.toml or .bin) instead of the config
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,
        /// Re-calibrate before entering closed loop
        #[arg(long, action = ArgAction::SetTrue)]
        calibrate_first: bool,
        /// Where to store the bundle after a successful re-calibration
        #[arg(long, value_name = "FILE")]
        save_params: Option<PathBuf>,
    },
    /// Run the open-loop calibration and fit the gain schedule
    Calibrate {
        /// Nominal flow in µL/min (overrides calibration.f_nom_ul_min)
        #[arg(long, value_name = "UL_MIN")]
        f_nom: Option<f32>,
        /// Start from this bundle (.toml or .bin) instead of the config
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,
        /// Write the fitted bundle here (.toml or .bin)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Fit the sensor scale from a `raw,true` CSV
    FitScale {
        /// CSV with headers raw,true
        csv: PathBuf,
        /// Update the scale of this bundle file in place (created from factory if absent)
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,
    },
    /// Print the bundle the controller would start with
    ShowParams {
        /// Read the bundle from this file (.toml or .bin)
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,
    },
    /// Quick health check (config valid, sim loop runs)
    SelfCheck,
}
