//! Custom error types for the spectrograph controller.
//!
//! This module defines the primary error type, `SpectrographError`. Using the
//! `thiserror` crate, it gives every failure a single place to live, from USB
//! enumeration through to writing the data file.
//!
//! ## Error Hierarchy
//!
//! Every variant belongs to exactly one [`Stage`] of the exposure workflow:
//!
//! - **connect**: enumeration, device selection and activation
//!   (`NoDevicesFound`, `AmbiguousDevice`, `DeviceNotFound`, `ActivationFailed`, ...)
//! - **status**: reading version info, device parameters and temperature
//! - **configure** / **trigger** / **poll** / **retrieve** / **stop**: the
//!   single-exposure state machine
//! - **package** / **persist**: building and writing the data container
//!
//! Driver-originated variants carry the raw [`AvsCode`] returned by the vendor
//! library so the caller can always see what the hardware said. An aborted
//! exposure is not an error; see [`crate::hardware::acquisition::ExposureOutcome`].

use crate::hardware::return_code::AvsCode;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type AppResult<T> = std::result::Result<T, SpectrographError>;

/// Workflow stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Enumerating, selecting or activating a device.
    Connect,
    /// Reading versions, parameters or temperatures.
    Status,
    /// `PrepareMeasure`.
    Configure,
    /// `Measure`.
    Trigger,
    /// Waiting for scan data.
    Poll,
    /// Reading wavelengths and spectrum.
    Retrieve,
    /// `StopMeasure`.
    Stop,
    /// Building the data file.
    Package,
    /// Writing the data file.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Connect => "connect",
            Stage::Status => "status",
            Stage::Configure => "configure",
            Stage::Trigger => "trigger",
            Stage::Poll => "poll",
            Stage::Retrieve => "retrieve",
            Stage::Stop => "stop",
            Stage::Package => "package",
            Stage::Persist => "persist",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the spectrograph controller.
#[derive(Error, Debug)]
pub enum SpectrographError {
    /// The USB subsystem reported zero attached devices.
    #[error("connect: no attached USB AvaSpec devices found")]
    NoDevicesFound,

    /// `AVS_GetList` failed after devices were reported.
    #[error("connect: failed to list devices: {code}")]
    EnumerationFailed { code: AvsCode },

    /// More than one device is attached and no serial number was requested.
    #[error(
        "connect: multiple devices found but no serial number specified; attached devices: {}",
        .candidates.join(", ")
    )]
    AmbiguousDevice { candidates: Vec<String> },

    /// The requested serial number is not among the attached devices.
    #[error(
        "connect: device serial number {serial_number} not found; attached devices: {}",
        .available.join(", ")
    )]
    DeviceNotFound {
        serial_number: String,
        available: Vec<String>,
    },

    /// The driver reported the same serial number for two devices.
    ///
    /// This is a driver data-integrity problem; no device is chosen.
    #[error("connect: driver reported serial number {serial_number} for more than one device")]
    DuplicateSerialNumber { serial_number: String },

    /// `AVS_Activate` did not return a usable handle.
    #[error("connect: cannot activate device {serial_number}: {code}")]
    ActivationFailed { serial_number: String, code: AvsCode },

    /// A device operation was attempted without an active handle.
    #[error("connect: no active device connection")]
    NotConnected,

    /// A status query (`GetNumPixels`, `GetVersionInfo`, `GetParameter`, `GetAnalogIn`) failed.
    #[error("status: {what} failed: {code}")]
    StatusFailed { what: &'static str, code: AvsCode },

    /// Requested exposure time is outside the range the hardware accepts.
    #[error("configure: exposure duration not in valid range: {duration_s} s (valid: {min_s} s to {max_s} s)")]
    ExposureOutOfRange {
        duration_s: f64,
        min_s: f64,
        max_s: f64,
    },

    /// An exposure is already running on this connection.
    #[error("configure: cannot start new exposure while one is in progress")]
    ExposureInProgress,

    /// `AVS_PrepareMeasure` rejected the measurement configuration.
    #[error("configure: PrepareMeasure rejected the measurement configuration: {code}")]
    ConfigurationRejected { code: AvsCode },

    /// `AVS_Measure` rejected the trigger.
    #[error("trigger: Measure rejected the trigger: {code}")]
    TriggerRejected { code: AvsCode },

    /// `AVS_PollScan` returned an error code.
    #[error("poll: PollScan failed: {code}")]
    PollFailed { code: AvsCode },

    /// Fetching the wavelength or intensity array failed.
    #[error("retrieve: {what} failed for {n_pixels} pixels: {code}")]
    RetrievalFailed {
        what: &'static str,
        n_pixels: usize,
        code: AvsCode,
    },

    /// An acquisition step was called out of order.
    #[error("{stage}: not allowed while acquisition is {state:?}")]
    OutOfSequence {
        stage: Stage,
        state: crate::hardware::acquisition::AcquisitionState,
    },

    /// The scan did not become ready within the allowed wait.
    #[error("poll: exposure did not complete within {} s", .waited.as_secs_f64())]
    ExposureTimedOut { waited: std::time::Duration },

    /// `AVS_StopMeasure` returned an error code.
    #[error("stop: StopMeasure failed: {code}")]
    StopFailed { code: AvsCode },

    /// The exposure record does not satisfy its invariants.
    #[error("package: invalid exposure record: {0}")]
    InvalidRecord(String),

    /// Writing or verifying the data file failed.
    #[error("persist: failed to write {}: {reason}", .path.display())]
    PersistenceFailed { path: PathBuf, reason: String },

    /// The data container could not be decoded.
    #[error("package: malformed container: {0}")]
    Container(#[from] crate::data::fits::FitsError),
}

impl SpectrographError {
    /// The workflow stage this failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            SpectrographError::NoDevicesFound
            | SpectrographError::EnumerationFailed { .. }
            | SpectrographError::AmbiguousDevice { .. }
            | SpectrographError::DeviceNotFound { .. }
            | SpectrographError::DuplicateSerialNumber { .. }
            | SpectrographError::ActivationFailed { .. }
            | SpectrographError::NotConnected => Stage::Connect,
            SpectrographError::StatusFailed { .. } => Stage::Status,
            SpectrographError::ExposureOutOfRange { .. }
            | SpectrographError::ExposureInProgress
            | SpectrographError::ConfigurationRejected { .. } => Stage::Configure,
            SpectrographError::TriggerRejected { .. } => Stage::Trigger,
            SpectrographError::PollFailed { .. } | SpectrographError::ExposureTimedOut { .. } => {
                Stage::Poll
            }
            SpectrographError::RetrievalFailed { .. } => Stage::Retrieve,
            SpectrographError::StopFailed { .. } => Stage::Stop,
            SpectrographError::OutOfSequence { stage, .. } => *stage,
            SpectrographError::InvalidRecord(_) | SpectrographError::Container(_) => {
                Stage::Package
            }
            SpectrographError::PersistenceFailed { .. } => Stage::Persist,
        }
    }

    /// The raw driver code behind this failure, when the driver produced one.
    pub fn driver_code(&self) -> Option<AvsCode> {
        match self {
            SpectrographError::EnumerationFailed { code }
            | SpectrographError::ActivationFailed { code, .. }
            | SpectrographError::StatusFailed { code, .. }
            | SpectrographError::ConfigurationRejected { code }
            | SpectrographError::TriggerRejected { code }
            | SpectrographError::PollFailed { code }
            | SpectrographError::RetrievalFailed { code, .. }
            | SpectrographError::StopFailed { code } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::return_code::AvsReturnCode;

    #[test]
    fn ambiguous_device_lists_candidates() {
        let err = SpectrographError::AmbiguousDevice {
            candidates: vec!["A".into(), "B".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("A, B"));
        assert_eq!(err.stage(), Stage::Connect);
        assert!(err.driver_code().is_none());
    }

    #[test]
    fn activation_failure_carries_raw_code() {
        let err = SpectrographError::ActivationFailed {
            serial_number: "1606192U1".into(),
            code: AvsCode::INVALID_HANDLE,
        };
        assert_eq!(err.driver_code(), Some(AvsCode(1000)));
        assert!(err.to_string().contains("INVALID_AVS_HANDLE_VALUE"));
    }

    #[test]
    fn retrieval_failure_names_stage_and_code() {
        let err = SpectrographError::RetrievalFailed {
            what: "GetScopeData",
            n_pixels: 2048,
            code: AvsReturnCode::InvalidMeasData.into(),
        };
        assert_eq!(err.stage(), Stage::Retrieve);
        let msg = err.to_string();
        assert!(msg.starts_with("retrieve:"));
        assert!(msg.contains("GetScopeData"));
        assert!(msg.contains("ERR_INVALID_MEAS_DATA"));
    }

    #[test]
    fn persistence_failure_is_persist_stage() {
        let err = SpectrographError::PersistenceFailed {
            path: PathBuf::from("/data/out.fits"),
            reason: "disk full".into(),
        };
        assert_eq!(err.stage(), Stage::Persist);
        assert!(err.to_string().contains("/data/out.fits"));
    }
}
