//! Error types for the microscope control stack.
//!
//! `ScopeError` is the single error type returned by the controllers. Device
//! traits return `anyhow::Result` so drivers can attach arbitrary context;
//! those failures enter the taxonomy through [`ScopeError::Device`].
//!
//! ## Error Categories
//!
//! - **Configuration** (`Config`, `Configuration`, `InvalidPlan`): permanent,
//!   fix the input and retry.
//! - **Motion** (`OutOfRange`, `HardwareTimeout`): `OutOfRange` is returned
//!   before any motion is commanded. `HardwareTimeout` means the device stopped
//!   responding; callers at the top level decide whether to shut down.
//! - **Runtime** (`ResourceBusy`, `FrameUnavailable`, `Calibration`): state
//!   related, usually recoverable by retrying after the conflicting operation.

use crate::arbiter::Owner;
use crate::types::Axis;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
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

// =============================================================================
// Range violations
// =============================================================================

/// A bounded move would cross a soft limit. No motion was commanded.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "{axis} target {target_mm:.4} mm is beyond soft limit {limit_mm:.4} mm (current {current_mm:.4} mm)"
)]
pub struct OutOfRangeError {
    pub axis: Axis,
    pub current_mm: f64,
    pub target_mm: f64,
    pub limit_mm: f64,
}

/// Convenience alias for results using the stack's error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

#[derive(Error, Debug)]
pub enum ScopeError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but holds an invalid value.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A scan plan failed validation before the run started.
    #[error("Invalid scan plan: {0}")]
    InvalidPlan(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    OutOfRange(#[from] OutOfRangeError),

    /// The device stayed busy past the operation's wall-clock budget.
    ///
    /// This is fatal for the instrument session. The control core never exits
    /// the process; the top-level caller decides.
    #[error("Hardware timeout during {operation} after {elapsed:?}")]
    HardwareTimeout { operation: String, elapsed: Duration },

    /// The shared camera/stage is owned by another operation.
    #[error("{requested} cannot start: resource held by {held_by}")]
    ResourceBusy { requested: Owner, held_by: Owner },

    /// No usable frame was delivered by the camera.
    #[error("Frame unavailable: {0}")]
    FrameUnavailable(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Failure reported by a device trait implementation.
    #[error("Device error: {0:#}")]
    Device(#[from] anyhow::Error),
}

impl ScopeError {
    /// Errors after which the instrument session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScopeError::HardwareTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        let err = DriverError::new("mock_microcontroller", DriverErrorKind::Timeout, "no ack");
        assert_eq!(
            err.to_string(),
            "Driver 'mock_microcontroller' timeout error: no ack"
        );
    }

    #[test]
    fn out_of_range_converts() {
        let err: ScopeError = OutOfRangeError {
            axis: Axis::X,
            current_mm: 1.0,
            target_mm: 30.0,
            limit_mm: 25.0,
        }
        .into();
        assert!(err.to_string().contains("soft limit 25.0000 mm"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn hardware_timeout_is_fatal() {
        let err = ScopeError::HardwareTimeout {
            operation: "slide loading".into(),
            elapsed: Duration::from_secs(10),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("slide loading"));
    }

    #[test]
    fn anyhow_errors_become_device_errors() {
        fn fails() -> ScopeResult<()> {
            Err(anyhow::anyhow!("serial write failed"))?;
            Ok(())
        }
        match fails() {
            Err(ScopeError::Device(e)) => assert!(e.to_string().contains("serial")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
