use thiserror::Error;

/// Why a calibration run was refused or rejected.
///
/// The first two variants are raised before the pump is touched; the rest
/// after the open-loop run, with the pump already stopped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalError {
    #[error("Ki_max ({ki_max}) must be greater than Ki_min ({ki_min})")]
    GainRange { ki_min: f32, ki_max: f32 },
    #[error("knee_frac {0} must lie strictly between 0 and 1")]
    KneeOutOfRange(f32),
    #[error("sensor produced no samples")]
    NoSamples,
    #[error("mean flow {mean:.4} uL/min is effectively zero")]
    ZeroFlow { mean: f32 },
    #[error("flow unstable: CV {cv_pct:.2}% exceeds {limit_pct:.2}%")]
    Unstable { cv_pct: f32, limit_pct: f32 },
}

impl CalError {
    /// True when the failure was detected before any hardware action.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::GainRange { .. } | Self::KneeOutOfRange(_))
    }
}

#[derive(Debug, Error, Clone)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalError),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing flow sensor")]
    MissingSensor,
    #[error("missing pump")]
    MissingPump,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Failures decoding a persisted parameter blob.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("blob length {got} does not match expected {expected}")]
    Length { expected: usize, got: usize },
    #[error("bad magic 0x{0:08X}")]
    Magic(u32),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
