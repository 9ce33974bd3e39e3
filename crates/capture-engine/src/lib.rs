//! Continuous capture orchestration
//!
//! Drives any [`camera_backend::CameraBackend`] through auto-exposure
//! calibration, daily capture windows and dropout recovery on a dedicated
//! thread, reporting frames and progress over an mpsc channel. The factory
//! picks the backend from configuration.

pub mod calibration;
pub mod engine;
pub mod events;
pub mod factory;
pub mod monitor;

pub use calibration::{CalibrationSample, CalibrationStep, Calibrator};
pub use engine::{
    capture_once, reconnect_backoff, CaptureEngine, EngineStatus, EngineTiming,
    MAX_CONSECUTIVE_ERRORS,
};
pub use events::{channel, CaptureEvent, EventSender};
pub use factory::{available_backends, create_backend, create_from_settings, detect_all, BackendKind};
pub use monitor::{ExposureMonitor, MonitorAction};
