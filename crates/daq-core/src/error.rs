//! Custom error types shared across the workspace.
//!
//! `DaqError` is the error type every crate converts into at its public
//! boundary. Driver crates keep their own `thiserror` enums and map them into
//! [`DaqError::Driver`] with a [`DriverErrorKind`] so callers can branch on the
//! category (initialization, configuration, timeout, ...) without knowing the
//! driver.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: values that parse but fail semantic validation.
//! - **`Io`**: wraps `std::io::Error`.
//! - **`Driver`**: categorized errors from instrument drivers.
//! - **`Storage`**: a persistence backend refused or failed a write.
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.
//! - **`ShutdownFailed`**: one or more errors collected during teardown.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Initialization,
    Configuration,
    Communication,
    Shutdown,
    Hardware,
    Timeout,
    InvalidParameter,
    Busy,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Busy => "busy",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the DAQ workspace.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Configuration`, `FeatureNotEnabled`
///    - Permanent until the configuration or build changes.
/// 2. **Driver Errors** - `Driver`
///    - Carry a [`DriverErrorKind`]; `Timeout` and `Hardware` usually end the
///      current acquisition run, `Configuration` aborts only the apply.
/// 3. **Runtime Errors** - `Storage`, `Io`, `ShutdownFailed`
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration validation failed.
    ///
    /// Occurs when configuration values parse correctly but fail semantic validation
    /// (e.g., a Zernike order outside the supported range).
    ///
    /// **Recovery Strategy**: Reject the change, keep the previous configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_order(order: i64) -> Result<(), DaqError> {
    ///     if !(2..=10).contains(&order) {
    ///         return Err(DaqError::Configuration(
    ///             "zernike order must be between 2 and 10".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument driver error with category.
    #[error("{0}")]
    Driver(DriverError),

    /// Persistence backend failed.
    ///
    /// **Recovery Strategy**: Records are still held by the caller; retry with
    /// another sink or surface the message to the operator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Feature not enabled at compile time.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Shutdown collected one or more errors.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<DriverError> for DaqError {
    fn from(err: DriverError) -> Self {
        DaqError::Driver(err)
    }
}

impl DaqError {
    /// Driver category, if this is a driver error.
    pub fn driver_kind(&self) -> Option<DriverErrorKind> {
        match self {
            DaqError::Driver(err) => Some(err.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Configuration("Fourier order 8 not allowed".into());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: Fourier order 8 not allowed"
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let errors = vec![
            DaqError::Storage("disk full".into()),
            DaqError::FeatureNotEnabled("storage_hdf5".into()),
        ];
        let err = DaqError::ShutdownFailed(errors);
        assert_eq!(err.to_string(), "Shutdown failed with errors");
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::from(DriverError::new(
            "thorlabs_wfs",
            DriverErrorKind::Timeout,
            "WFS_CalcWavefront did not return",
        ));
        assert_eq!(
            err.to_string(),
            "Driver 'thorlabs_wfs' timeout error: WFS_CalcWavefront did not return"
        );
        assert_eq!(err.driver_kind(), Some(DriverErrorKind::Timeout));
    }
}
