//! Error taxonomy for camera operations

use thiserror::Error;

/// Why the vendor SDK library could not be made available
///
/// Callers use the distinction to decide whether to prompt for a library
/// path or give up entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkLoadError {
    /// No path configured and the default library name was not found
    #[error("no SDK path configured and '{default}' not found")]
    NotConfigured { default: String },

    /// A path was configured but no file exists there
    #[error("SDK library not found at '{path}'")]
    MissingBinary { path: String },

    /// The library exists but the dynamic loader rejected it
    #[error("failed to load SDK library: {0}")]
    LoadFailed(String),

    /// The library loaded but a required entry point is missing
    #[error("SDK library is missing symbol '{symbol}'")]
    MissingSymbol { symbol: String },
}

/// Errors produced by backends and the capture engine
///
/// Zero detected devices is never an error; detection returns an empty
/// list. Local recovery (retry, backoff, reconnect) is preferred everywhere
/// except `SdkUnavailable` and `ReconnectExhausted`, which are always
/// surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    /// Vendor SDK missing or not loadable; not retried
    #[error("SDK unavailable: {reason}")]
    SdkUnavailable { reason: SdkLoadError },

    /// Backend used before `initialize()` succeeded
    #[error("backend not initialized")]
    NotInitialized,

    /// Operation requires an open device
    #[error("camera not connected")]
    NotConnected,

    /// Device open failed after all retry attempts
    #[error("failed to open device after {attempts} attempt(s): {last_error}")]
    DeviceOpenFailed { attempts: u32, last_error: String },

    /// Exposure did not complete within exposure time plus grace period
    #[error("exposure timed out after {exposure_ms}ms plus grace period")]
    ExposureTimeout { exposure_ms: f64 },

    /// Exposure started but the device reported failure
    #[error("exposure failed: {0}")]
    ExposureFailed(String),

    /// The capture loop exhausted its reconnection budget; fatal for the run
    #[error("gave up reconnecting after {attempts} consecutive failures")]
    ReconnectExhausted { attempts: u32 },

    /// Calibration hit its attempt bound; capture proceeds at the last exposure
    #[error("calibration did not converge after {attempts} attempts (last exposure {last_exposure_ms}ms)")]
    CalibrationDidNotConverge { attempts: u32, last_exposure_ms: f64 },

    /// Directory-watch mode: no new image has arrived yet
    ///
    /// Not counted against the capture loop's consecutive-error budget.
    #[error("no new frame available yet")]
    NoFrameAvailable,

    /// Factory was asked for a backend it does not know
    #[error("unknown camera backend: '{0}'")]
    UnknownBackend(String),

    /// A setting was structurally invalid (range problems are clamped, not rejected)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Miscellaneous device/SDK failure
    #[error("device error: {0}")]
    Device(String),
}

impl CameraError {
    /// Failures that end a capture run instead of being retried locally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CameraError::SdkUnavailable { .. } | CameraError::ReconnectExhausted { .. }
        )
    }
}
