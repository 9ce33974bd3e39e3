//! Camera settings dictionary

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleWindow;
use crate::stats::BrightnessMetric;

/// White balance handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    /// Let the camera's own auto white balance run
    #[default]
    Auto,
    /// Fixed R/B gains applied by the device
    Manual,
    /// Neutral device gains, balance applied in software after debayer
    Software,
}

/// Image flip applied by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlipMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "h")]
    Horizontal,
    #[serde(rename = "v")]
    Vertical,
    #[serde(rename = "both")]
    Both,
}

/// The configuration dictionary recognized by backends and the engine
///
/// All keys are optional in serialized form; unknown keys are ignored.
/// Values outside a device's reported range are clamped at configure time
/// with a logged warning, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Backend selection: "watch", "camera", "ascom" or "sim"
    pub capture_mode: String,

    /// Exposure time in milliseconds
    pub exposure_ms: f64,
    /// Gain value
    pub gain: i64,
    pub wb_mode: WhiteBalanceMode,
    /// White balance red channel (device units)
    pub wb_r: i64,
    /// White balance blue channel (device units)
    pub wb_b: i64,
    /// Brightness offset
    pub offset: i64,
    pub flip: FlipMode,
    /// Capture in 16-bit mode when the device supports it
    pub use_16bit: bool,
    /// Hardware binning factor
    pub binning: u32,

    /// Enable the auto-exposure calibration algorithm
    pub auto_exposure: bool,
    /// Target brightness for calibration (0-255 scale)
    pub target_brightness: f64,
    /// Upper exposure bound for calibration (milliseconds)
    pub max_exposure_ms: f64,
    /// Brightness metric used for calibration and monitoring
    pub brightness_metric: BrightnessMetric,

    pub scheduled_capture_enabled: bool,
    /// Capture window start, "HH:MM"
    pub scheduled_start_time: String,
    /// Capture window end, "HH:MM"; start > end spans midnight
    pub scheduled_end_time: String,

    /// Seconds between captures in continuous mode
    pub interval_secs: f64,

    /// Vendor SDK library path (SDK backend)
    pub sdk_path: Option<PathBuf>,
    /// Device name to prefer when connecting/reconnecting
    pub camera_name: Option<String>,
    /// Directory to watch (directory-watch backend)
    pub watch_directory: Option<PathBuf>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            capture_mode: "watch".to_string(),
            exposure_ms: 100.0,
            gain: 100,
            wb_mode: WhiteBalanceMode::Auto,
            wb_r: 75,
            wb_b: 99,
            offset: 20,
            flip: FlipMode::None,
            use_16bit: false,
            binning: 1,
            auto_exposure: false,
            target_brightness: 100.0,
            max_exposure_ms: 30_000.0,
            brightness_metric: BrightnessMetric::default(),
            scheduled_capture_enabled: false,
            scheduled_start_time: "17:00".to_string(),
            scheduled_end_time: "09:00".to_string(),
            interval_secs: 5.0,
            sdk_path: None,
            camera_name: None,
            watch_directory: None,
        }
    }
}

impl CameraSettings {
    /// Exposure as a duration
    pub fn exposure(&self) -> Duration {
        Duration::from_secs_f64(self.exposure_ms.max(0.0) / 1000.0)
    }

    /// Interval between continuous captures
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }

    /// The scheduled capture window described by these settings
    pub fn schedule(&self) -> ScheduleWindow {
        ScheduleWindow::parse(
            self.scheduled_capture_enabled,
            &self.scheduled_start_time,
            &self.scheduled_end_time,
        )
    }
}
