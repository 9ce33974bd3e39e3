//! Thin typed surface over the vendor SDK
//!
//! Everything the session and backend layers need from the ASI SDK goes
//! through [`AsiDriver`], so the same code runs against the real shared
//! library ([`crate::native::NativeAsiDriver`]) or an in-process simulation
//! ([`crate::sim::SimulatedAsiDriver`]).

use camera_core::{BayerPattern, CameraError};

/// Device controls, mirroring the SDK's control type IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsiControl {
    Gain,
    Exposure,
    WhiteBalanceRed,
    WhiteBalanceBlue,
    Offset,
    BandwidthOverload,
    Flip,
    Temperature,
}

impl AsiControl {
    /// SDK control type ID (ASI_CONTROL_TYPE)
    pub fn id(self) -> i32 {
        match self {
            AsiControl::Gain => 0,
            AsiControl::Exposure => 1,
            AsiControl::WhiteBalanceRed => 3,
            AsiControl::WhiteBalanceBlue => 4,
            AsiControl::Offset => 5,
            AsiControl::BandwidthOverload => 6,
            AsiControl::Flip => 9,
            AsiControl::Temperature => 8,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            0 => AsiControl::Gain,
            1 => AsiControl::Exposure,
            3 => AsiControl::WhiteBalanceRed,
            4 => AsiControl::WhiteBalanceBlue,
            5 => AsiControl::Offset,
            6 => AsiControl::BandwidthOverload,
            9 => AsiControl::Flip,
            8 => AsiControl::Temperature,
            _ => return None,
        })
    }
}

/// Range and default for one device control
#[derive(Debug, Clone)]
pub struct AsiControlCaps {
    pub control: AsiControl,
    pub min: i64,
    pub max: i64,
    pub default: i64,
    pub is_auto_supported: bool,
    pub is_writable: bool,
}

/// Capture pixel format (ASI_IMG_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsiImgType {
    Raw8,
    Raw16,
    Y8,
}

impl AsiImgType {
    pub fn id(self) -> i32 {
        match self {
            AsiImgType::Raw8 => 0,
            AsiImgType::Raw16 => 2,
            AsiImgType::Y8 => 3,
        }
    }

    /// Bytes per pixel in this format
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            AsiImgType::Raw8 | AsiImgType::Y8 => 1,
            AsiImgType::Raw16 => 2,
        }
    }
}

/// State of an in-flight exposure (ASI_EXPOSURE_STATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsiExposureStatus {
    Idle,
    Working,
    Success,
    Failed,
}

/// Static properties of one detected camera
#[derive(Debug, Clone)]
pub struct AsiCameraProperty {
    pub name: String,
    pub camera_id: i32,
    pub max_width: u32,
    pub max_height: u32,
    pub is_color: bool,
    pub bayer_pattern: Option<BayerPattern>,
    pub pixel_size_um: f64,
    pub bit_depth: u8,
    pub supported_bins: Vec<u32>,
}

/// The SDK calls the session layer depends on
///
/// `camera_id` is the SDK-assigned device ID from the property query, not
/// the detection index.
pub trait AsiDriver: Send {
    fn camera_count(&mut self) -> Result<usize, CameraError>;
    fn camera_property(&mut self, index: usize) -> Result<AsiCameraProperty, CameraError>;
    fn open(&mut self, camera_id: i32) -> Result<(), CameraError>;
    fn init(&mut self, camera_id: i32) -> Result<(), CameraError>;
    fn close(&mut self, camera_id: i32) -> Result<(), CameraError>;
    fn control_caps(&mut self, camera_id: i32) -> Result<Vec<AsiControlCaps>, CameraError>;
    fn set_control(
        &mut self,
        camera_id: i32,
        control: AsiControl,
        value: i64,
        auto: bool,
    ) -> Result<(), CameraError>;
    fn get_control(&mut self, camera_id: i32, control: AsiControl)
        -> Result<(i64, bool), CameraError>;
    fn set_roi(
        &mut self,
        camera_id: i32,
        width: u32,
        height: u32,
        binning: u32,
        img_type: AsiImgType,
    ) -> Result<(), CameraError>;
    fn start_exposure(&mut self, camera_id: i32) -> Result<(), CameraError>;
    fn exposure_status(&mut self, camera_id: i32) -> Result<AsiExposureStatus, CameraError>;
    fn download_exposure(&mut self, camera_id: i32, buffer: &mut [u8]) -> Result<(), CameraError>;

    /// Tear the SDK state down and bring it back up, dropping any open
    /// handles. Last resort when a device vanished from enumeration.
    fn reset(&mut self) -> Result<(), CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids_round_trip() {
        for control in [
            AsiControl::Gain,
            AsiControl::Exposure,
            AsiControl::WhiteBalanceRed,
            AsiControl::WhiteBalanceBlue,
            AsiControl::Offset,
            AsiControl::BandwidthOverload,
            AsiControl::Flip,
            AsiControl::Temperature,
        ] {
            assert_eq!(AsiControl::from_id(control.id()), Some(control));
        }
        assert_eq!(AsiControl::from_id(99), None);
    }

    #[test]
    fn test_img_type_sizes() {
        assert_eq!(AsiImgType::Raw8.bytes_per_pixel(), 1);
        assert_eq!(AsiImgType::Raw16.bytes_per_pixel(), 2);
    }
}
