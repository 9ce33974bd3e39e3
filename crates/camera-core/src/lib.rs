//! Core data model for the allsky capture engine
//!
//! Shared types consumed by every backend and by the capture loop:
//! - Connection/capture state machine states
//! - Backend capability descriptions and detected-device info
//! - Captured frame, metadata and brightness statistics
//! - The settings dictionary and the scheduled capture window
//! - The error taxonomy used across the engine

pub mod capabilities;
pub mod error;
pub mod frame;
pub mod schedule;
pub mod settings;
pub mod state;
pub mod stats;

pub use capabilities::{CameraCapabilities, CameraInfo};
pub use error::{CameraError, SdkLoadError};
pub use frame::{BayerPattern, CapturedFrame, Metadata};
pub use schedule::ScheduleWindow;
pub use settings::{CameraSettings, FlipMode, WhiteBalanceMode};
pub use state::CameraState;
pub use stats::{BrightnessMetric, FrameStats, CLIPPING_THRESHOLD};
