//! SDK session lifecycle
//!
//! Owns the open/init/configure/close choreography against an [`AsiDriver`]
//! and keeps the per-connection state (camera ID, property, control caps,
//! ROI). USB-attached cameras are flaky right after enumeration, so opening
//! is paced: a settle delay before the first attempt, a bounded number of
//! open retries, and a stabilization pause after init before any control
//! traffic.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use camera_core::{CameraError, CameraSettings, FlipMode, WhiteBalanceMode};

use crate::driver::{
    AsiCameraProperty, AsiControl, AsiControlCaps, AsiDriver, AsiExposureStatus, AsiImgType,
};

/// Pacing around device open
///
/// Defaults match what the hardware needs; tests shrink them to zero.
#[derive(Debug, Clone)]
pub struct ConnectTiming {
    /// Settle delay before the first open attempt
    pub pre_open_delay: Duration,
    /// Delay between failed open attempts
    pub retry_delay: Duration,
    /// Pause after init before the camera accepts control traffic
    pub stabilization: Duration,
    /// Open attempts before giving up
    pub attempts: u32,
}

impl Default for ConnectTiming {
    fn default() -> Self {
        Self {
            pre_open_delay: Duration::from_millis(500),
            retry_delay: Duration::from_secs(1),
            stabilization: Duration::from_millis(300),
            attempts: 3,
        }
    }
}

impl ConnectTiming {
    /// No delays, same attempt budget
    pub fn immediate() -> Self {
        Self {
            pre_open_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            stabilization: Duration::ZERO,
            attempts: 3,
        }
    }
}

/// One driver plus at most one open camera
pub struct SdkSession {
    driver: Box<dyn AsiDriver>,
    timing: ConnectTiming,
    camera_id: Option<i32>,
    property: Option<AsiCameraProperty>,
    caps: Vec<AsiControlCaps>,
    img_type: AsiImgType,
    width: u32,
    height: u32,
    disconnect_lock: Mutex<()>,
}

impl SdkSession {
    pub fn new(driver: Box<dyn AsiDriver>) -> Self {
        Self {
            driver,
            timing: ConnectTiming::default(),
            camera_id: None,
            property: None,
            caps: Vec::new(),
            img_type: AsiImgType::Raw8,
            width: 0,
            height: 0,
            disconnect_lock: Mutex::new(()),
        }
    }

    pub fn with_timing(mut self, timing: ConnectTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn is_open(&self) -> bool {
        self.camera_id.is_some()
    }

    pub fn property(&self) -> Option<&AsiCameraProperty> {
        self.property.as_ref()
    }

    pub fn img_type(&self) -> AsiImgType {
        self.img_type
    }

    /// Active ROI dimensions (after binning)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn cap(&self, control: AsiControl) -> Option<&AsiControlCaps> {
        self.caps.iter().find(|c| c.control == control)
    }

    /// Enumerate attached cameras without opening any
    pub fn detect(&mut self) -> Result<Vec<AsiCameraProperty>, CameraError> {
        let count = self.driver.camera_count()?;
        let mut found = Vec::with_capacity(count);
        for index in 0..count {
            found.push(self.driver.camera_property(index)?);
        }
        Ok(found)
    }

    /// Open and prepare the camera at a detection index
    pub fn connect(&mut self, index: usize, settings: &CameraSettings) -> Result<(), CameraError> {
        if self.is_open() {
            self.disconnect();
        }
        let property = self.driver.camera_property(index)?;
        let camera_id = property.camera_id;

        std::thread::sleep(self.timing.pre_open_delay);
        let mut last_error = String::new();
        let mut opened = false;
        for attempt in 1..=self.timing.attempts {
            match self.driver.open(camera_id) {
                Ok(()) => {
                    opened = true;
                    break;
                }
                Err(e) => {
                    warn!(attempt, camera = %property.name, error = %e, "open attempt failed");
                    last_error = e.to_string();
                    if attempt < self.timing.attempts {
                        std::thread::sleep(self.timing.retry_delay);
                    }
                }
            }
        }
        if !opened {
            return Err(CameraError::DeviceOpenFailed {
                attempts: self.timing.attempts,
                last_error,
            });
        }

        if let Err(e) = self.driver.init(camera_id) {
            let _ = self.driver.close(camera_id);
            return Err(e);
        }
        std::thread::sleep(self.timing.stabilization);

        self.caps = self.driver.control_caps(camera_id)?;
        self.camera_id = Some(camera_id);
        let name = property.name.clone();
        self.property = Some(property);

        self.apply_roi(settings)?;
        self.configure(settings)?;

        info!(camera = %name, camera_id, "camera connected");
        Ok(())
    }

    /// Reconnect after a dropout, matching by name when one is remembered
    ///
    /// Detection indices are not stable across hot-plug, so the previous
    /// index is meaningless. A remembered name that no longer matches
    /// anything falls back to the first enumerated device; cameras can
    /// re-enumerate under a slightly different name. Only when enumeration
    /// comes back empty is one full SDK reset attempted before giving up.
    pub fn reconnect_safe(
        &mut self,
        name: Option<&str>,
        settings: &CameraSettings,
    ) -> Result<(), CameraError> {
        let remembered = name
            .map(str::to_string)
            .or_else(|| self.property.as_ref().map(|p| p.name.clone()));
        self.disconnect();

        if let Some(index) = self.find_by_name(remembered.as_deref())? {
            return self.connect(index, settings);
        }

        info!("no cameras enumerated, resetting SDK");
        self.driver.reset()?;
        match self.find_by_name(remembered.as_deref())? {
            Some(index) => self.connect(index, settings),
            None => Err(CameraError::DeviceOpenFailed {
                attempts: 1,
                last_error: "no camera found after SDK reset".to_string(),
            }),
        }
    }

    fn find_by_name(&mut self, name: Option<&str>) -> Result<Option<usize>, CameraError> {
        let detected = self.detect()?;
        if detected.is_empty() {
            return Ok(None);
        }
        if let Some(name) = name {
            if let Some(index) = detected.iter().position(|p| p.name == name) {
                return Ok(Some(index));
            }
            warn!(name, "remembered camera missing from enumeration, taking the first device");
        }
        Ok(Some(0))
    }

    fn apply_roi(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        let Some(camera_id) = self.camera_id else {
            return Err(CameraError::NotConnected);
        };
        let property = self
            .property
            .clone()
            .ok_or(CameraError::NotConnected)?;

        let mut binning = settings.binning.max(1);
        if !property.supported_bins.contains(&binning) {
            warn!(binning, "unsupported binning, falling back to 1");
            binning = 1;
        }
        // Full frame at the chosen binning; the SDK wants width % 8 == 0
        // and height % 2 == 0
        let width = (property.max_width / binning) & !7;
        let height = (property.max_height / binning) & !1;

        let img_type = if !property.is_color {
            AsiImgType::Y8
        } else if settings.use_16bit && property.bit_depth > 8 {
            AsiImgType::Raw16
        } else {
            AsiImgType::Raw8
        };

        self.driver
            .set_roi(camera_id, width, height, binning, img_type)?;
        self.width = width;
        self.height = height;
        self.img_type = img_type;
        debug!(width, height, binning, ?img_type, "ROI configured");
        Ok(())
    }

    /// Clamp a requested value into a control's device range
    fn clamp_to_cap(&self, control: AsiControl, requested: i64) -> i64 {
        match self.cap(control) {
            Some(cap) => {
                let clamped = requested.clamp(cap.min, cap.max);
                if clamped != requested {
                    warn!(
                        ?control,
                        requested,
                        clamped,
                        "value outside device range, clamped"
                    );
                }
                clamped
            }
            None => requested,
        }
    }

    /// Apply settings to the open camera, clamping out-of-range values
    pub fn configure(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        let camera_id = self.camera_id.ok_or(CameraError::NotConnected)?;

        let exposure_us = self.clamp_to_cap(
            AsiControl::Exposure,
            (settings.exposure_ms * 1000.0).round() as i64,
        );
        self.driver
            .set_control(camera_id, AsiControl::Exposure, exposure_us, false)?;

        let gain = self.clamp_to_cap(AsiControl::Gain, settings.gain);
        self.driver
            .set_control(camera_id, AsiControl::Gain, gain, false)?;

        match settings.wb_mode {
            WhiteBalanceMode::Auto => {
                for control in [AsiControl::WhiteBalanceRed, AsiControl::WhiteBalanceBlue] {
                    if let Some(cap) = self.cap(control) {
                        let default = cap.default;
                        self.driver.set_control(camera_id, control, default, true)?;
                    }
                }
            }
            WhiteBalanceMode::Manual => {
                let red = self.clamp_to_cap(AsiControl::WhiteBalanceRed, settings.wb_r);
                let blue = self.clamp_to_cap(AsiControl::WhiteBalanceBlue, settings.wb_b);
                self.driver
                    .set_control(camera_id, AsiControl::WhiteBalanceRed, red, false)?;
                self.driver
                    .set_control(camera_id, AsiControl::WhiteBalanceBlue, blue, false)?;
            }
            // Neutral device gains; balance is applied after debayer
            WhiteBalanceMode::Software => {
                for control in [AsiControl::WhiteBalanceRed, AsiControl::WhiteBalanceBlue] {
                    if let Some(cap) = self.cap(control) {
                        let default = cap.default;
                        self.driver
                            .set_control(camera_id, control, default, false)?;
                    }
                }
            }
        }

        if self.cap(AsiControl::Offset).is_some() {
            let offset = self.clamp_to_cap(AsiControl::Offset, settings.offset);
            self.driver
                .set_control(camera_id, AsiControl::Offset, offset, false)?;
        }

        if self.cap(AsiControl::Flip).is_some() {
            let flip = match settings.flip {
                FlipMode::None => 0,
                FlipMode::Horizontal => 1,
                FlipMode::Vertical => 2,
                FlipMode::Both => 3,
            };
            self.driver
                .set_control(camera_id, AsiControl::Flip, flip, false)?;
        }

        if settings.binning.max(1) != self.active_binning() {
            self.apply_roi(settings)?;
        }
        Ok(())
    }

    fn active_binning(&self) -> u32 {
        match self.property.as_ref() {
            Some(p) if self.width > 0 => (p.max_width / self.width).max(1),
            _ => 1,
        }
    }

    /// Update the exposure control only, for calibration steps
    pub fn set_exposure_ms(&mut self, exposure_ms: f64) -> Result<(), CameraError> {
        let camera_id = self.camera_id.ok_or(CameraError::NotConnected)?;
        let exposure_us =
            self.clamp_to_cap(AsiControl::Exposure, (exposure_ms * 1000.0).round() as i64);
        self.driver
            .set_control(camera_id, AsiControl::Exposure, exposure_us, false)
    }

    pub fn start_exposure(&mut self) -> Result<(), CameraError> {
        let camera_id = self.camera_id.ok_or(CameraError::NotConnected)?;
        self.driver.start_exposure(camera_id)
    }

    pub fn exposure_status(&mut self) -> Result<AsiExposureStatus, CameraError> {
        let camera_id = self.camera_id.ok_or(CameraError::NotConnected)?;
        self.driver.exposure_status(camera_id)
    }

    pub fn download_exposure(&mut self, buffer: &mut [u8]) -> Result<(), CameraError> {
        let camera_id = self.camera_id.ok_or(CameraError::NotConnected)?;
        self.driver.download_exposure(camera_id, buffer)
    }

    /// Sensor temperature in °C, when the device reports one
    pub fn temperature_c(&mut self) -> Option<f64> {
        let camera_id = self.camera_id?;
        self.cap(AsiControl::Temperature)?;
        match self.driver.get_control(camera_id, AsiControl::Temperature) {
            // The SDK reports tenths of a degree
            Ok((value, _)) => Some(value as f64 / 10.0),
            Err(_) => None,
        }
    }

    /// Close the camera, resetting controls to factory defaults first
    ///
    /// Idempotent, and serialized against concurrent teardown so a drop
    /// guard racing an explicit disconnect cannot double-close.
    pub fn disconnect(&mut self) {
        let _guard = self
            .disconnect_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(camera_id) = self.camera_id.take() else {
            return;
        };
        for cap in &self.caps {
            if !cap.is_writable {
                continue;
            }
            if let Err(e) = self
                .driver
                .set_control(camera_id, cap.control, cap.default, false)
            {
                debug!(control = ?cap.control, error = %e, "factory reset of control failed");
            }
        }
        if let Err(e) = self.driver.close(camera_id) {
            warn!(error = %e, "close failed during disconnect");
        }
        self.caps.clear();
        // Keep `property` so a later reconnect can match by name
        info!(camera_id, "camera disconnected");
    }
}
