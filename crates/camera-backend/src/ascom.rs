//! ASCOM/Alpaca backend placeholder
//!
//! Keeps the backend registry shape stable for deployments that configure
//! `capture_mode = "ascom"`. Detection reports no devices and connection
//! fails with a clear message; the capability flags describe what the real
//! driver surface would offer (cooling, temperature readout).

use tracing::warn;

use camera_core::{
    CameraCapabilities, CameraError, CameraInfo, CameraSettings, CameraState, CapturedFrame,
};

use crate::CameraBackend;

static ASCOM_CAPABILITIES: CameraCapabilities = CameraCapabilities {
    backend_name: "ASCOM",
    supports_multiple_cameras: true,
    requires_sdk_path: false,
    supports_exposure_control: true,
    min_exposure_ms: 0.001,
    max_exposure_ms: 3_600_000.0,
    supports_auto_exposure: true,
    supports_gain_control: true,
    min_gain: 0,
    max_gain: 600,
    supports_white_balance: false,
    min_wb_value: 0,
    max_wb_value: 0,
    supports_binning: true,
    max_binning: 4,
    supports_flip: false,
    supports_offset: true,
    supports_raw16: true,
    native_bit_depth: 16,
    is_color_camera: true,
    bayer_pattern: None,
    supports_temperature: true,
    supports_cooling: true,
    supports_scheduled_capture: true,
    metadata_fields: &["CAMERA", "EXPOSURE", "GAIN", "TEMP_C", "RES", "DATETIME"],
};

/// Placeholder for ASCOM/Alpaca driver support
pub struct AscomBackend {
    settings: CameraSettings,
}

impl AscomBackend {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }
}

impl CameraBackend for AscomBackend {
    fn initialize(&mut self) -> Result<(), CameraError> {
        warn!("ASCOM backend selected but driver support is not implemented");
        Ok(())
    }

    fn detect(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(Vec::new())
    }

    fn connect(
        &mut self,
        _index: usize,
        _settings: Option<&CameraSettings>,
    ) -> Result<(), CameraError> {
        Err(CameraError::DeviceOpenFailed {
            attempts: 1,
            last_error: "ASCOM driver support is not implemented".into(),
        })
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        self.connect(0, None)
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        self.settings = settings.clone();
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CapturedFrame, CameraError> {
        Err(CameraError::NotConnected)
    }

    fn disconnect(&mut self) {}

    fn state(&self) -> CameraState {
        CameraState::Disconnected
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &ASCOM_CAPABILITIES
    }

    fn camera_info(&self) -> Option<&CameraInfo> {
        None
    }

    fn current_settings(&self) -> CameraSettings {
        self.settings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_fails_with_clear_message() {
        let mut backend = AscomBackend::new(&CameraSettings::default());
        backend.initialize().unwrap();
        assert!(backend.detect().unwrap().is_empty());
        let err = backend.connect(0, None).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
        assert_eq!(backend.state(), CameraState::Disconnected);
    }
}
