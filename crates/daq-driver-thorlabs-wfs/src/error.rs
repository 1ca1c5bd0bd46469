//! Error types for wavefront sensor operations.
//!
//! Vendor status codes are already translated to text by the SDK backend
//! (see [`Status`]); this enum adds *where* the failure happened so callers
//! can tell an initialization failure from a rejected configuration or a
//! failed capture.

use crate::sdk::Status;
use daq_core::error::{DaqError, DriverError, DriverErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Driver type label used in [`DriverError`].
pub const DRIVER_TYPE: &str = "thorlabs_wfs";

/// Result type alias for wavefront sensor operations.
pub type Result<T> = std::result::Result<T, WfsError>;

/// Errors that can occur when working with a wavefront sensor.
#[derive(Error, Debug)]
pub enum WfsError {
    /// No instrument at the requested list index.
    #[error("No wavefront sensor at index {index}: {count} instrument(s) found")]
    InstrumentNotFound { index: i32, count: i32 },

    /// Instrument is already opened by another process.
    #[error("Wavefront sensor {name} ({serial}) is in use by another application")]
    InstrumentInUse { name: String, serial: String },

    /// `WFS_init` failed.
    #[error("Failed to open '{resource}': {status}")]
    OpenFailed { resource: String, status: Status },

    /// The instrument refused a configuration call.
    #[error("{operation} rejected configuration: {status}")]
    ConfigurationRejected {
        operation: &'static str,
        status: Status,
    },

    /// A control value failed validation; nothing was sent to the instrument.
    #[error("Invalid value for '{control}': {message}")]
    OutOfRange { control: String, message: String },

    /// Front-panel key that is not a known control.
    #[error("Unknown control '{0}'")]
    UnknownControl(String),

    /// Capture failed for a reason other than a missing trigger.
    #[error("Capture failed: {status}")]
    CaptureFailed { status: Status },

    /// Capture succeeded but the image is unusable (power too high/low, ambient light).
    #[error("Unusable image quality (device status 0x{device_status:08X})")]
    ImageQuality { device_status: u32 },

    /// A vendor call did not return in time.
    #[error("{operation} did not return within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// An earlier vendor call timed out; the session can no longer be used.
    #[error("Session unusable after an earlier timeout (refused {operation})")]
    SessionWedged { operation: &'static str },

    /// The SDK worker thread is gone.
    #[error("SDK worker thread has stopped")]
    ExecutorGone,

    /// Any other vendor call failure outside the measurement pipeline.
    #[error("{operation} failed: {status}")]
    Sdk {
        operation: &'static str,
        status: Status,
    },

    /// Operation requires an open session.
    #[error("Wavefront sensor is not initialized")]
    NotInitialized,

    /// Operation is not allowed while an acquisition run is active.
    #[error("An acquisition run is already in progress")]
    RunInProgress,

    /// The acquisition thread ended without handing back its records.
    #[error("Acquisition thread ended without reporting")]
    RunLost,

    /// OS-level failure (thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WfsError {
    /// True for errors that leave the SDK session unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::SessionWedged { .. } | Self::ExecutorGone
        )
    }

    /// True for errors raised before anything reached the instrument.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::UnknownControl(_))
    }
}

impl From<WfsError> for DaqError {
    fn from(err: WfsError) -> Self {
        let kind = match &err {
            WfsError::InstrumentNotFound { .. }
            | WfsError::OpenFailed { .. }
            | WfsError::NotInitialized => DriverErrorKind::Initialization,
            WfsError::InstrumentInUse { .. } | WfsError::RunInProgress => DriverErrorKind::Busy,
            WfsError::ConfigurationRejected { .. } => DriverErrorKind::Configuration,
            WfsError::OutOfRange { .. } | WfsError::UnknownControl(_) => {
                DriverErrorKind::InvalidParameter
            }
            WfsError::CaptureFailed { .. } | WfsError::ImageQuality { .. } => {
                DriverErrorKind::Hardware
            }
            WfsError::Timeout { .. } => DriverErrorKind::Timeout,
            WfsError::SessionWedged { .. }
            | WfsError::ExecutorGone
            | WfsError::Sdk { .. }
            | WfsError::Io(_) => DriverErrorKind::Communication,
            WfsError::RunLost => DriverErrorKind::Unknown,
        };
        DaqError::Driver(DriverError::new(DRIVER_TYPE, kind, err.to_string()))
    }
}
