//! Custom error types for the application.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a field sweep can run into, from configuration and
//! file I/O to instrument communication and frame acquisition.
//!
//! ## Error Hierarchy
//!
//! - **`InstrumentCommunication`**: the power supply or camera did not respond or
//!   rejected a command. Fatal to the session, which still performs its safe shutdown.
//! - **`FrameAcquisitionTimeout`**: the frame source produced no frame within the poll
//!   timeout. Fatal to the sweep in progress.
//! - **`DegenerateImage`**: the averaged image has zero variance (or a non-positive
//!   mean), so the SNR is undefined. Recoverable; the sweep records `NaN` instead.
//! - **`Cancelled`** / **`OperatorAborted`**: the run was stopped cooperatively.
//! - **`Config`**, **`Configuration`**, **`Io`**, **`Csv`**, **`Npy`**: ambient failures.
//!
//! Capability traits in [`crate::hardware::capabilities`] return `anyhow::Result`; the
//! core wraps those errors into `InstrumentCommunication` together with the operation
//! that failed.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Every failure the sweep controller can report.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Instrument communication error during {operation}: {source}")]
    InstrumentCommunication {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("No frame within {timeout:?} ({received} of {requested} frames received)")]
    FrameAcquisitionTimeout {
        received: usize,
        requested: usize,
        timeout: Duration,
    },

    #[error("Degenerate image: SNR undefined for mean {mean} and standard deviation {std_dev}")]
    DegenerateImage { mean: f64, std_dev: f64 },

    #[error("Invalid region of interest: {0}")]
    InvalidRoi(String),

    #[error("Frame count must be at least 1")]
    InvalidFrameCount,

    #[error("Frame is {actual:?} pixels but the sensor reports {expected:?}")]
    FrameShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Sweep cancelled before setpoint {setpoint} V")]
    Cancelled { setpoint: f64 },

    #[error("Operator aborted at confirmation: {0}")]
    OperatorAborted(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image file error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<SweepError>),
}

impl SweepError {
    /// Wrap a capability error with the name of the instrument operation that failed.
    pub fn instrument(operation: &'static str, source: anyhow::Error) -> Self {
        SweepError::InstrumentCommunication { operation, source }
    }
}

/// Extension for attaching an operation name to capability results.
pub trait InstrumentContext<T> {
    /// Map an `anyhow` error into [`SweepError::InstrumentCommunication`].
    fn during(self, operation: &'static str) -> AppResult<T>;
}

impl<T> InstrumentContext<T> for anyhow::Result<T> {
    fn during(self, operation: &'static str) -> AppResult<T> {
        self.map_err(|source| SweepError::instrument(operation, source))
    }
}
