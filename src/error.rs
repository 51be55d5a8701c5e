//! Custom error types for the bench.
//!
//! `BenchError` is the single error type returned by the library. It follows the
//! taxonomy the orchestration layer cares about:
//!
//! - **`Transport`**: a send/query against an instrument failed. Fatal to the
//!   current calibration stage or measurement run.
//! - **`NotConnected`** / **`InstrumentMissing`**: an operation was requested before
//!   discovery succeeded. No instrument command is issued in this case.
//! - **`Busy`**: another hardware operation holds the instruments.
//! - **`Parameter*`** / **`UnknownDevice`**: bad input from the caller.
//! - **`Config`** / **`Configuration`** / **`Io`**: configuration and persistence.
//!
//! Discovery failures are not errors: `connect()` reports them as a boolean.

use crate::hardware::InstrumentRole;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode parameters: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Transport fault on {role} ({address}): {message}")]
    Transport {
        role: InstrumentRole,
        address: String,
        message: String,
    },

    #[error("Instruments not connected; run discovery first")]
    NotConnected,

    #[error("No {0} instrument registered")]
    InstrumentMissing(InstrumentRole),

    #[error("Instruments are busy with another operation")]
    Busy,

    #[error("Run cancelled")]
    Cancelled,

    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Parameter '{name}' value {value} outside [{start}, {end}]")]
    ParameterOutOfRange {
        name: String,
        value: f64,
        start: f64,
        end: f64,
    },
}

impl From<figment::Error> for BenchError {
    fn from(err: figment::Error) -> Self {
        BenchError::Config(Box::new(err))
    }
}

impl BenchError {
    /// True for faults raised by instrument communication.
    pub fn is_transport(&self) -> bool {
        matches!(self, BenchError::Transport { .. })
    }
}
