use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HwError {
    #[error("invalid plant model: {0}")]
    InvalidModel(&'static str),
}

pub type Result<T> = std::result::Result<T, HwError>;
