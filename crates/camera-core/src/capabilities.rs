//! Backend capability descriptions and detected-device info

use serde::Serialize;

use crate::frame::BayerPattern;

/// Describes what a camera backend supports
///
/// Constructed once per backend. Callers adapt behavior (and UIs hide
/// controls) based on these flags. Numeric bounds may be refined once at
/// connect time from the device property query; nothing else changes after
/// construction.
#[derive(Debug, Clone, Serialize)]
pub struct CameraCapabilities {
    /// Backend tag ("ASI", "File", "ASCOM", ...)
    pub backend_name: &'static str,
    /// Whether the backend can list and select from multiple devices
    pub supports_multiple_cameras: bool,
    /// Whether the backend needs a path to a vendor SDK library
    pub requires_sdk_path: bool,

    /// Whether exposure time can be set
    pub supports_exposure_control: bool,
    /// Minimum exposure (milliseconds)
    pub min_exposure_ms: f64,
    /// Maximum exposure (milliseconds)
    pub max_exposure_ms: f64,
    /// Whether the auto-exposure calibration algorithm applies
    pub supports_auto_exposure: bool,

    /// Whether gain can be set
    pub supports_gain_control: bool,
    pub min_gain: i64,
    pub max_gain: i64,

    /// Whether white balance R/B channels can be adjusted
    pub supports_white_balance: bool,
    pub min_wb_value: i64,
    pub max_wb_value: i64,

    /// Hardware binning
    pub supports_binning: bool,
    pub max_binning: u32,
    /// Image flip (horizontal/vertical/both)
    pub supports_flip: bool,
    /// Brightness offset
    pub supports_offset: bool,

    /// 16-bit capture
    pub supports_raw16: bool,
    /// Sensor ADC bit depth
    pub native_bit_depth: u8,

    /// Color sensor with a Bayer filter (None for mono or pre-debayered input)
    pub is_color_camera: bool,
    pub bayer_pattern: Option<BayerPattern>,

    /// Sensor temperature readout
    pub supports_temperature: bool,
    /// Active cooling
    pub supports_cooling: bool,

    /// Daily capture window scheduling
    pub supports_scheduled_capture: bool,

    /// Metadata keys this backend produces per frame
    pub metadata_fields: &'static [&'static str],
}

/// One detected camera device
///
/// Created by a detection pass and discarded on the next pass or on
/// disconnect; device indices are not stable across hot-plug events, so the
/// `device_id`/`name` is what reconnection matches on.
#[derive(Debug, Clone, Serialize)]
pub struct CameraInfo {
    /// Index in the backend's detection list
    pub index: usize,
    /// Display name (e.g. "ZWO ASI676MC")
    pub name: String,
    /// Backend tag
    pub backend: &'static str,
    /// Stable identifier when the backend provides one (serial, path, name)
    pub device_id: Option<String>,

    /// Hardware limits, when known at detection time
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub pixel_size_um: Option<f64>,
    pub is_color: bool,
    pub bit_depth: u8,

    /// ASCOM driver ProgID (e.g. "ASCOM.ASICamera2.Camera")
    pub driver_id: Option<String>,
}

impl CameraInfo {
    /// Minimal info for backends that only know a name at detection time
    pub fn named(index: usize, name: impl Into<String>, backend: &'static str) -> Self {
        let name = name.into();
        Self {
            index,
            device_id: Some(name.clone()),
            name,
            backend,
            max_width: None,
            max_height: None,
            pixel_size_um: None,
            is_color: true,
            bit_depth: 8,
            driver_id: None,
        }
    }
}

impl std::fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_info_uses_name_as_device_id() {
        let info = CameraInfo::named(0, "ZWO ASI676MC", "ASI");
        assert_eq!(info.device_id.as_deref(), Some("ZWO ASI676MC"));
        assert_eq!(info.to_string(), "ZWO ASI676MC (ASI)");
    }
}
