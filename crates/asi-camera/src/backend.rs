//! `CameraBackend` implementation over an SDK session

use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use camera_backend::CameraBackend;
use camera_core::frame::{apply_wb_gains, debayer_raw16, debayer_raw8, insert_stats, keys};
use camera_core::{
    CameraCapabilities, CameraError, CameraInfo, CameraSettings, CameraState, CapturedFrame,
    FrameStats, WhiteBalanceMode,
};

use crate::driver::{AsiCameraProperty, AsiControl, AsiDriver, AsiExposureStatus, AsiImgType};
use crate::native::NativeAsiDriver;
use crate::session::{ConnectTiming, SdkSession};
use crate::sim::SimulatedAsiDriver;

/// Grace period past the exposure time before a capture is a timeout
const EXPOSURE_GRACE: Duration = Duration::from_secs(2);

const EXPOSURE_POLL: Duration = Duration::from_millis(10);

/// Neutral point of the ASI white balance scale
const WB_NEUTRAL: f64 = 50.0;

fn base_capabilities() -> CameraCapabilities {
    CameraCapabilities {
        backend_name: "ASI",
        supports_multiple_cameras: true,
        requires_sdk_path: true,
        supports_exposure_control: true,
        min_exposure_ms: 0.032,
        max_exposure_ms: 2_000_000.0,
        supports_auto_exposure: true,
        supports_gain_control: true,
        min_gain: 0,
        max_gain: 600,
        supports_white_balance: true,
        min_wb_value: 1,
        max_wb_value: 99,
        supports_binning: true,
        max_binning: 2,
        supports_flip: true,
        supports_offset: true,
        supports_raw16: true,
        native_bit_depth: 12,
        is_color_camera: true,
        bayer_pattern: None,
        supports_temperature: true,
        supports_cooling: false,
        supports_scheduled_capture: true,
        metadata_fields: &[
            "CAMERA", "EXPOSURE", "GAIN", "TEMP_C", "TEMP_F", "RES", "DATETIME", "BRIGHTNESS",
        ],
    }
}

fn format_exposure(exposure_ms: f64) -> String {
    if exposure_ms >= 1000.0 {
        format!("{:.1}s", exposure_ms / 1000.0)
    } else {
        format!("{exposure_ms:.0}ms")
    }
}

/// ZWO ASI camera backend
///
/// The SDK library is loaded at `initialize` time, not construction, so a
/// missing library is a reported error rather than a construction panic.
pub struct AsiBackend {
    session: Option<SdkSession>,
    timing: ConnectTiming,
    settings: CameraSettings,
    state: CameraState,
    capabilities: CameraCapabilities,
    info: Option<CameraInfo>,
}

impl AsiBackend {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            session: None,
            timing: ConnectTiming::default(),
            settings: settings.clone(),
            state: CameraState::Disconnected,
            capabilities: base_capabilities(),
            info: None,
        }
    }

    /// Backend over the in-process simulation instead of the vendor SDK
    pub fn simulated(settings: &CameraSettings) -> Self {
        Self::with_driver(Box::new(SimulatedAsiDriver::new()), settings)
    }

    /// Backend over an explicit driver (tests, simulation variants)
    pub fn with_driver(driver: Box<dyn AsiDriver>, settings: &CameraSettings) -> Self {
        let timing = ConnectTiming::immediate();
        Self {
            session: Some(SdkSession::new(driver).with_timing(timing.clone())),
            timing,
            settings: settings.clone(),
            state: CameraState::Disconnected,
            capabilities: base_capabilities(),
            info: None,
        }
    }

    fn session_mut(&mut self) -> Result<&mut SdkSession, CameraError> {
        self.session.as_mut().ok_or(CameraError::NotInitialized)
    }

    /// Refine capability bounds from the connected device's control caps
    fn refine_capabilities(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Some(cap) = session.cap(AsiControl::Exposure) {
            self.capabilities.min_exposure_ms = cap.min as f64 / 1000.0;
            self.capabilities.max_exposure_ms = cap.max as f64 / 1000.0;
        }
        if let Some(cap) = session.cap(AsiControl::Gain) {
            self.capabilities.min_gain = cap.min;
            self.capabilities.max_gain = cap.max;
        }
        if let Some(property) = session.property() {
            self.capabilities.is_color_camera = property.is_color;
            self.capabilities.bayer_pattern = property.bayer_pattern;
            self.capabilities.native_bit_depth = property.bit_depth;
            self.capabilities.max_binning =
                property.supported_bins.iter().copied().max().unwrap_or(1);
        }
    }

    fn info_from(property: &AsiCameraProperty, index: usize) -> CameraInfo {
        CameraInfo {
            index,
            name: property.name.clone(),
            backend: "ASI",
            device_id: Some(property.name.clone()),
            max_width: Some(property.max_width),
            max_height: Some(property.max_height),
            pixel_size_um: Some(property.pixel_size_um),
            is_color: property.is_color,
            bit_depth: property.bit_depth,
            driver_id: None,
        }
    }

    /// Wait out an in-flight exposure, bounded by exposure plus grace
    fn await_exposure(&mut self) -> Result<(), CameraError> {
        let exposure_ms = self.settings.exposure_ms;
        let deadline = Instant::now() + self.settings.exposure() + EXPOSURE_GRACE;
        let session = self.session_mut()?;
        loop {
            match session.exposure_status()? {
                AsiExposureStatus::Success => return Ok(()),
                AsiExposureStatus::Failed => {
                    return Err(CameraError::ExposureFailed(
                        "device reported exposure failure".into(),
                    ))
                }
                AsiExposureStatus::Idle | AsiExposureStatus::Working => {
                    if Instant::now() >= deadline {
                        return Err(CameraError::ExposureTimeout { exposure_ms });
                    }
                    std::thread::sleep(EXPOSURE_POLL);
                }
            }
        }
    }

    fn to_rgb(&self, raw: &[u8], width: u32, height: u32) -> Result<RgbImage, CameraError> {
        let session = self.session.as_ref().ok_or(CameraError::NotInitialized)?;
        let pattern = session.property().and_then(|p| p.bayer_pattern);
        match (session.img_type(), pattern) {
            (AsiImgType::Raw8, Some(pattern)) => debayer_raw8(raw, width, height, pattern),
            (AsiImgType::Raw16, Some(pattern)) => debayer_raw16(raw, width, height, pattern),
            // Mono sensor: replicate luminance into all channels
            (AsiImgType::Y8, _) | (_, None) => {
                let expected = width as usize * height as usize;
                if raw.len() < expected {
                    return Err(CameraError::Device(format!(
                        "mono frame size mismatch: got {} bytes, expected {expected}",
                        raw.len()
                    )));
                }
                let mut out = RgbImage::new(width, height);
                for (pixel, &v) in out.pixels_mut().zip(raw.iter()) {
                    *pixel = image::Rgb([v, v, v]);
                }
                Ok(out)
            }
        }
    }
}

impl CameraBackend for AsiBackend {
    fn initialize(&mut self) -> Result<(), CameraError> {
        if self.session.is_some() {
            return Ok(());
        }
        let driver = NativeAsiDriver::load(self.settings.sdk_path.as_deref())
            .map_err(|reason| CameraError::SdkUnavailable { reason })?;
        self.session = Some(SdkSession::new(Box::new(driver)).with_timing(self.timing.clone()));
        Ok(())
    }

    fn detect(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        let detected = self.session_mut()?.detect()?;
        Ok(detected
            .iter()
            .enumerate()
            .map(|(index, property)| Self::info_from(property, index))
            .collect())
    }

    fn connect(
        &mut self,
        index: usize,
        settings: Option<&CameraSettings>,
    ) -> Result<(), CameraError> {
        if let Some(settings) = settings {
            self.settings = settings.clone();
        }
        self.state = CameraState::Connecting;
        let settings = self.settings.clone();
        match self.session_mut()?.connect(index, &settings) {
            Ok(()) => {
                self.refine_capabilities();
                self.info = self
                    .session
                    .as_ref()
                    .and_then(|s| s.property())
                    .map(|p| Self::info_from(p, index));
                self.state = CameraState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = CameraState::Error;
                Err(e)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        self.state = CameraState::Connecting;
        let settings = self.settings.clone();
        let name = settings
            .camera_name
            .clone()
            .or_else(|| self.info.as_ref().map(|i| i.name.clone()));
        match self.session_mut()?.reconnect_safe(name.as_deref(), &settings) {
            Ok(()) => {
                self.refine_capabilities();
                self.info = self
                    .session
                    .as_ref()
                    .and_then(|s| s.property())
                    .map(|p| Self::info_from(p, 0));
                self.state = CameraState::Connected;
                info!("camera reconnected");
                Ok(())
            }
            Err(e) => {
                self.state = CameraState::Error;
                Err(e)
            }
        }
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        self.settings = settings.clone();
        if self.state.is_connected() {
            let settings = self.settings.clone();
            self.session_mut()?.configure(&settings)?;
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CapturedFrame, CameraError> {
        if !self.state.is_connected() {
            return Err(CameraError::NotConnected);
        }

        let exposure = self.settings.exposure();
        let exposure_ms = self.settings.exposure_ms;
        {
            let session = self.session_mut()?;
            session.set_exposure_ms(exposure_ms)?;
            session.start_exposure()?;
        }
        self.await_exposure()?;

        let (width, height, img_type) = {
            let session = self.session_mut()?;
            let (w, h) = session.dimensions();
            (w, h, session.img_type())
        };
        let mut raw = vec![0u8; width as usize * height as usize * img_type.bytes_per_pixel()];
        self.session_mut()?.download_exposure(&mut raw)?;

        let mut image = self.to_rgb(&raw, width, height)?;

        let mut raw_rgb_no_wb = None;
        if self.settings.wb_mode == WhiteBalanceMode::Software {
            raw_rgb_no_wb = Some(image.clone());
            apply_wb_gains(
                &mut image,
                self.settings.wb_r as f64 / WB_NEUTRAL,
                self.settings.wb_b as f64 / WB_NEUTRAL,
            );
        }
        // Hardware flip is applied by the device; nothing to do here

        let mut frame = CapturedFrame::new(image, exposure);
        frame.raw_rgb_no_wb = raw_rgb_no_wb;
        if let Some(info) = &self.info {
            frame.metadata.insert(keys::CAMERA.into(), info.name.clone());
        }
        frame
            .metadata
            .insert(keys::EXPOSURE.into(), format_exposure(exposure_ms));
        frame
            .metadata
            .insert(keys::GAIN.into(), self.settings.gain.to_string());
        if let Some(pattern) = self.capabilities.bayer_pattern {
            frame
                .metadata
                .insert(keys::BAYER_PATTERN.into(), pattern.to_string());
        }
        if let Some(session) = self.session.as_mut() {
            if let Some(temp_c) = session.temperature_c() {
                frame
                    .metadata
                    .insert(keys::TEMP_C.into(), format!("{temp_c:.1}"));
                frame
                    .metadata
                    .insert(keys::TEMP_F.into(), format!("{:.1}", temp_c * 9.0 / 5.0 + 32.0));
            }
        }
        let stats = FrameStats::compute(frame.image.as_raw());
        insert_stats(&mut frame.metadata, &stats);
        let brightness = frame.brightness(self.settings.brightness_metric);
        frame
            .metadata
            .insert(keys::BRIGHTNESS.into(), format!("{brightness:.1}"));

        debug!(
            exposure = %format_exposure(exposure_ms),
            brightness = %stats.mean,
            "frame captured"
        );
        Ok(frame)
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.disconnect();
        } else {
            warn!("disconnect on uninitialized backend");
        }
        self.state = CameraState::Disconnected;
    }

    fn state(&self) -> CameraState {
        self.state
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &self.capabilities
    }

    fn camera_info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }

    fn current_settings(&self) -> CameraSettings {
        self.settings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_core::BrightnessMetric;

    fn sim_backend(model: impl Fn(f64) -> f64 + Send + 'static) -> AsiBackend {
        let driver = SimulatedAsiDriver::new().with_brightness_model(model);
        let mut backend = AsiBackend::with_driver(Box::new(driver), &CameraSettings::default());
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn test_detect_connect_capture() {
        let mut backend = sim_backend(|_| 80.0);
        let detected = backend.detect().unwrap();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].name, "Simulated ASI676MC");

        backend.connect(0, None).unwrap();
        assert_eq!(backend.state(), CameraState::Connected);
        assert!(backend.capabilities().bayer_pattern.is_some());

        let frame = backend.capture_frame().unwrap();
        let brightness = frame.brightness(BrightnessMetric::Mean);
        assert!((brightness - 80.0).abs() < 2.0, "brightness {brightness}");
        assert!(frame.metadata.contains_key("EXPOSURE"));
        assert!(frame.metadata.contains_key("TEMP_C"));
    }

    #[test]
    fn test_capture_before_connect_is_rejected() {
        let mut backend = sim_backend(|_| 80.0);
        assert!(matches!(
            backend.capture_frame(),
            Err(CameraError::NotConnected)
        ));
    }

    #[test]
    fn test_hung_exposure_times_out() {
        let mut driver = SimulatedAsiDriver::new();
        driver.set_exposures_hang(true);
        let mut settings = CameraSettings::default();
        settings.exposure_ms = 1.0;
        let mut backend = AsiBackend::with_driver(Box::new(driver), &settings);
        backend.initialize().unwrap();
        backend.connect(0, None).unwrap();
        // 1ms exposure plus the grace period; completes in ~2s
        let err = backend.capture_frame().unwrap_err();
        assert!(matches!(err, CameraError::ExposureTimeout { .. }));
    }

    #[test]
    fn test_failed_exposure_is_reported() {
        let mut driver = SimulatedAsiDriver::new();
        driver.fail_next_exposures(1);
        let mut backend = AsiBackend::with_driver(Box::new(driver), &CameraSettings::default());
        backend.initialize().unwrap();
        backend.connect(0, None).unwrap();
        assert!(matches!(
            backend.capture_frame(),
            Err(CameraError::ExposureFailed(_))
        ));
        // The next exposure succeeds
        assert!(backend.capture_frame().is_ok());
    }

    #[test]
    fn test_software_wb_keeps_raw_copy() {
        let mut settings = CameraSettings::default();
        settings.wb_mode = WhiteBalanceMode::Software;
        settings.wb_r = 75;
        settings.wb_b = 25;
        let driver = SimulatedAsiDriver::new().with_brightness_model(|_| 100.0);
        let mut backend = AsiBackend::with_driver(Box::new(driver), &settings);
        backend.initialize().unwrap();
        backend.connect(0, None).unwrap();

        let frame = backend.capture_frame().unwrap();
        let raw = frame.raw_rgb_no_wb.as_ref().unwrap();
        let balanced = frame.image.get_pixel(0, 0);
        let unbalanced = raw.get_pixel(0, 0);
        assert!(balanced[0] > unbalanced[0]); // red gain 1.5
        assert!(balanced[2] < unbalanced[2]); // blue gain 0.5
    }

    #[test]
    fn test_exposure_formatting() {
        assert_eq!(format_exposure(250.0), "250ms");
        assert_eq!(format_exposure(30_000.0), "30.0s");
    }
}
