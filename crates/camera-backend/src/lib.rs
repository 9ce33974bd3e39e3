//! Capture backend contract
//!
//! One implementation per hardware family: the SDK-backed sensor (in the
//! `asi-camera` crate), the directory-watch pseudo-camera, and the ASCOM
//! network/COM stub. Continuous capture is not part of this contract; the
//! capture engine drives `capture_frame` generically over any backend.

pub mod ascom;
pub mod file;
pub mod sidecar;

pub use ascom::AscomBackend;
pub use file::FileWatchBackend;

use camera_core::{
    CameraCapabilities, CameraError, CameraInfo, CameraSettings, CameraState, CapturedFrame,
};

/// Polymorphic capture backend
///
/// Lifecycle: `initialize` → `detect` → `connect` → (`configure` |
/// `capture_frame`)* → `disconnect`. Implementations are stateful and
/// report their current [`CameraState`]; they are driven from one thread at
/// a time (the engine's capture thread, or the caller before the engine
/// starts).
pub trait CameraBackend: Send {
    /// Prepare the backend (load/initialize a vendor SDK, validate config).
    ///
    /// Idempotent; safe to call when already initialized.
    fn initialize(&mut self) -> Result<(), CameraError>;

    /// Non-destructive enumeration; must not open or lock any device.
    ///
    /// No hardware present is `Ok(vec![])`, not an error.
    fn detect(&mut self) -> Result<Vec<CameraInfo>, CameraError>;

    /// Exclusive-open one device by detection index.
    ///
    /// On failure the backend is back in a clean disconnected state with no
    /// partially-open handle.
    fn connect(
        &mut self,
        index: usize,
        settings: Option<&CameraSettings>,
    ) -> Result<(), CameraError>;

    /// Safe-reconnect after a dropout: re-detect (indices are not stable
    /// across hot-plug), match the previous device by name when available.
    fn reconnect(&mut self) -> Result<(), CameraError>;

    /// Apply recognized settings; unknown concerns are ignored and
    /// out-of-range values are clamped to the device range with a logged
    /// warning.
    fn configure(&mut self, settings: &CameraSettings) -> Result<(), CameraError>;

    /// Blocking single exposure, bounded by exposure time plus a fixed
    /// grace period; reports a timeout rather than hanging.
    fn capture_frame(&mut self) -> Result<CapturedFrame, CameraError>;

    /// Release the device. Idempotent; resets device controls to neutral
    /// defaults before closing so other processes do not inherit stale
    /// state.
    fn disconnect(&mut self);

    fn state(&self) -> CameraState;

    fn capabilities(&self) -> &CameraCapabilities;

    /// Info about the currently connected device, if any
    fn camera_info(&self) -> Option<&CameraInfo>;

    /// Settings as currently applied
    fn current_settings(&self) -> CameraSettings;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}
