#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core flow-control logic (hardware-agnostic).
//!
//! This crate provides the adaptive gain-scheduled flow controller for a
//! peristaltic pump. All hardware interactions go through
//! `pump_traits::FlowSensor` and `pump_traits::Pump`; time comes from
//! `pump_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Parameters**: `ScaleAffine`, `ExpParams`, `EgcParams` and the curve math (`params`)
//! - **Filtering**: single-pole low-pass (`filter`)
//! - **Scheduling**: two-stage error conditioning and `Ki` scheduling (`gain_sched`)
//! - **Control**: PID with selectable anti-windup (`pid`), per-tick loop (`controller`)
//! - **Calibration**: open-loop fit of the gain curve, blocking or poll-driven (`calibrator`)
//! - **Accounting**: delivered volume and mass (`volume`)
//! - **Hosting**: cooperative loop with on-demand re-calibration (`station`)
//! - **Persistence**: fixed-layout binary bundle (`persist`)
//!
//! ## Units
//!
//! Flow is µL/min, pump speed is steps/s, time is milliseconds on the
//! controller's clock. Volume is accumulated in `f64` µL.

pub mod builder;
pub mod calibrator;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod filter;
pub mod gain_sched;
pub mod mocks;
pub mod params;
pub mod persist;
pub mod pid;
pub mod station;
pub mod telemetry;
pub mod util;
pub mod volume;

pub use builder::{ControllerBuilder, FlowController, Missing, Set, build_controller};
pub use calibrator::{CalPhase, CalPoll, CalReport, CalibrationRun, calibrate, calibrate_into};
pub use config::{AntiWindup, CalConfig, PidCfg};
pub use controller::Controller;
pub use conversions::startup_params;
pub use error::{BuildError, CalError, CodecError, ControlError, Report, Result};
pub use filter::LowPassFilter;
pub use gain_sched::{GainScheduler, Schedule};
pub use params::{EgcParams, ExpParams, ScaleAffine};
pub use pid::{PidController, PidTerms};
pub use station::{Mode, RunOptions, RunSummary, Station, StationEvent, StopReason};
pub use telemetry::Telemetry;
pub use volume::VolumeTracker;
