use thiserror::Error;

/// Raised when a persisted settings value cannot be interpreted.
///
/// Callers restoring configuration should log the error and fall back to a
/// default rather than crash; silently swallowing it is not acceptable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid operating mode {0:?}")]
    InvalidMode(String),

    #[error("invalid fan mode {0:?}")]
    InvalidFanMode(String),

    #[error("invalid degree unit {0:?}")]
    InvalidUnit(String),

    #[error("invalid numeric value {0:?} for key {1:?}")]
    InvalidNumber(String, String),
}
