//! In-process SDK simulation
//!
//! Behaves like the vendor SDK for one synthetic color camera: exposures
//! complete instantly with a uniform frame whose brightness follows an
//! injectable response curve. Fault injection covers transient open
//! failures, failed exposures, hung exposures and device vanish, which is
//! everything the session and engine recovery paths need to be tested
//! against without hardware.

use std::collections::HashMap;

use camera_core::{BayerPattern, CameraError};

use crate::driver::{
    AsiCameraProperty, AsiControl, AsiControlCaps, AsiDriver, AsiExposureStatus, AsiImgType,
};

/// Maps exposure in milliseconds to frame brightness (0-255)
pub type BrightnessModel = Box<dyn Fn(f64) -> f64 + Send>;

struct SimCamera {
    property: AsiCameraProperty,
    visible: bool,
    open: bool,
    controls: HashMap<AsiControl, i64>,
    caps: Vec<AsiControlCaps>,
    status: AsiExposureStatus,
    roi: (u32, u32, u32, AsiImgType),
}

fn default_caps() -> Vec<AsiControlCaps> {
    let cap = |control, min, max, default, auto, writable| AsiControlCaps {
        control,
        min,
        max,
        default,
        is_auto_supported: auto,
        is_writable: writable,
    };
    vec![
        cap(AsiControl::Gain, 0, 600, 210, true, true),
        // Exposure is in microseconds, SDK convention
        cap(AsiControl::Exposure, 32, 2_000_000_000, 10_000, true, true),
        cap(AsiControl::WhiteBalanceRed, 1, 99, 52, true, true),
        cap(AsiControl::WhiteBalanceBlue, 1, 99, 95, true, true),
        cap(AsiControl::Offset, 0, 80, 8, false, true),
        cap(AsiControl::BandwidthOverload, 40, 100, 50, true, true),
        cap(AsiControl::Flip, 0, 3, 0, false, true),
        cap(AsiControl::Temperature, -500, 1000, 250, false, false),
    ]
}

fn default_camera(name: &str, camera_id: i32) -> SimCamera {
    let caps = default_caps();
    let controls = caps.iter().map(|c| (c.control, c.default)).collect();
    SimCamera {
        property: AsiCameraProperty {
            name: name.to_string(),
            camera_id,
            max_width: 64,
            max_height: 48,
            is_color: true,
            bayer_pattern: Some(BayerPattern::Rggb),
            pixel_size_um: 2.0,
            bit_depth: 12,
            supported_bins: vec![1, 2],
        },
        visible: true,
        open: false,
        controls,
        caps,
        status: AsiExposureStatus::Idle,
        roi: (64, 48, 1, AsiImgType::Raw8),
    }
}

/// SDK stand-in with injectable faults
pub struct SimulatedAsiDriver {
    cameras: Vec<SimCamera>,
    brightness_model: BrightnessModel,
    open_failures_remaining: u32,
    exposure_failures_remaining: u32,
    exposures_hang: bool,
    restore_on_reset: bool,
    resets: u32,
}

impl SimulatedAsiDriver {
    pub fn new() -> Self {
        Self {
            cameras: vec![default_camera("Simulated ASI676MC", 0)],
            // Linear response saturating at white
            brightness_model: Box::new(|exposure_ms| (exposure_ms * 0.5).min(255.0)),
            open_failures_remaining: 0,
            exposure_failures_remaining: 0,
            exposures_hang: false,
            restore_on_reset: true,
            resets: 0,
        }
    }

    pub fn with_brightness_model(mut self, model: impl Fn(f64) -> f64 + Send + 'static) -> Self {
        self.brightness_model = Box::new(model);
        self
    }

    /// Make the next `n` open attempts fail
    pub fn fail_next_opens(&mut self, n: u32) {
        self.open_failures_remaining = n;
    }

    /// Make the next `n` exposures report failure after starting
    pub fn fail_next_exposures(&mut self, n: u32) {
        self.exposure_failures_remaining = n;
    }

    /// Exposures never complete (for timeout paths)
    pub fn set_exposures_hang(&mut self, hang: bool) {
        self.exposures_hang = hang;
    }

    /// Drop a camera from enumeration, as if unplugged
    pub fn vanish(&mut self, index: usize) {
        if let Some(cam) = self.cameras.get_mut(index) {
            cam.visible = false;
            cam.open = false;
        }
    }

    /// Whether vanished cameras come back after an SDK reset
    pub fn set_restore_on_reset(&mut self, restore: bool) {
        self.restore_on_reset = restore;
    }

    /// How many SDK resets have been requested
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Current value of a control on the first camera, for assertions
    pub fn control_value(&self, control: AsiControl) -> Option<i64> {
        self.cameras[0].controls.get(&control).copied()
    }

    fn visible_index(&self, index: usize) -> Option<usize> {
        self.cameras
            .iter()
            .enumerate()
            .filter(|(_, c)| c.visible)
            .map(|(i, _)| i)
            .nth(index)
    }

    fn by_id_mut(&mut self, camera_id: i32) -> Result<&mut SimCamera, CameraError> {
        self.cameras
            .iter_mut()
            .find(|c| c.property.camera_id == camera_id && c.visible)
            .ok_or_else(|| CameraError::Device(format!("no camera with ID {camera_id}")))
    }
}

impl Default for SimulatedAsiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AsiDriver for SimulatedAsiDriver {
    fn camera_count(&mut self) -> Result<usize, CameraError> {
        Ok(self.cameras.iter().filter(|c| c.visible).count())
    }

    fn camera_property(&mut self, index: usize) -> Result<AsiCameraProperty, CameraError> {
        let i = self
            .visible_index(index)
            .ok_or_else(|| CameraError::Device(format!("no camera at index {index}")))?;
        Ok(self.cameras[i].property.clone())
    }

    fn open(&mut self, camera_id: i32) -> Result<(), CameraError> {
        if self.open_failures_remaining > 0 {
            self.open_failures_remaining -= 1;
            return Err(CameraError::Device("simulated open failure".into()));
        }
        self.by_id_mut(camera_id)?.open = true;
        Ok(())
    }

    fn init(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let cam = self.by_id_mut(camera_id)?;
        if !cam.open {
            return Err(CameraError::Device("init on closed camera".into()));
        }
        Ok(())
    }

    fn close(&mut self, camera_id: i32) -> Result<(), CameraError> {
        if let Ok(cam) = self.by_id_mut(camera_id) {
            cam.open = false;
            cam.status = AsiExposureStatus::Idle;
        }
        Ok(())
    }

    fn control_caps(&mut self, camera_id: i32) -> Result<Vec<AsiControlCaps>, CameraError> {
        Ok(self.by_id_mut(camera_id)?.caps.clone())
    }

    fn set_control(
        &mut self,
        camera_id: i32,
        control: AsiControl,
        value: i64,
        _auto: bool,
    ) -> Result<(), CameraError> {
        self.by_id_mut(camera_id)?.controls.insert(control, value);
        Ok(())
    }

    fn get_control(
        &mut self,
        camera_id: i32,
        control: AsiControl,
    ) -> Result<(i64, bool), CameraError> {
        let value = self
            .by_id_mut(camera_id)?
            .controls
            .get(&control)
            .copied()
            .unwrap_or(0);
        Ok((value, false))
    }

    fn set_roi(
        &mut self,
        camera_id: i32,
        width: u32,
        height: u32,
        binning: u32,
        img_type: AsiImgType,
    ) -> Result<(), CameraError> {
        self.by_id_mut(camera_id)?.roi = (width, height, binning, img_type);
        Ok(())
    }

    fn start_exposure(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let hang = self.exposures_hang;
        let fail = if self.exposure_failures_remaining > 0 {
            self.exposure_failures_remaining -= 1;
            true
        } else {
            false
        };
        let cam = self.by_id_mut(camera_id)?;
        if !cam.open {
            return Err(CameraError::Device("exposure on closed camera".into()));
        }
        cam.status = if hang {
            AsiExposureStatus::Working
        } else if fail {
            AsiExposureStatus::Failed
        } else {
            AsiExposureStatus::Success
        };
        Ok(())
    }

    fn exposure_status(&mut self, camera_id: i32) -> Result<AsiExposureStatus, CameraError> {
        Ok(self.by_id_mut(camera_id)?.status)
    }

    fn download_exposure(&mut self, camera_id: i32, buffer: &mut [u8]) -> Result<(), CameraError> {
        let exposure_us = {
            let cam = self.by_id_mut(camera_id)?;
            if cam.status != AsiExposureStatus::Success {
                return Err(CameraError::Device("no completed exposure".into()));
            }
            cam.controls
                .get(&AsiControl::Exposure)
                .copied()
                .unwrap_or(0)
        };
        let level = (self.brightness_model)(exposure_us as f64 / 1000.0).clamp(0.0, 255.0) as u8;

        let cam = self.by_id_mut(camera_id)?;
        match cam.roi.3 {
            AsiImgType::Raw8 | AsiImgType::Y8 => buffer.fill(level),
            AsiImgType::Raw16 => {
                let value = (level as u16) * 257;
                for chunk in buffer.chunks_exact_mut(2) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        cam.status = AsiExposureStatus::Idle;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CameraError> {
        self.resets += 1;
        for cam in &mut self.cameras {
            cam.open = false;
            cam.status = AsiExposureStatus::Idle;
            if self.restore_on_reset {
                cam.visible = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_model_drives_frame_level() {
        let mut driver =
            SimulatedAsiDriver::new().with_brightness_model(|exposure_ms| exposure_ms);
        driver.open(0).unwrap();
        driver
            .set_control(0, AsiControl::Exposure, 120_000, false)
            .unwrap();
        driver.start_exposure(0).unwrap();
        assert_eq!(driver.exposure_status(0).unwrap(), AsiExposureStatus::Success);
        let mut buf = [0u8; 16];
        driver.download_exposure(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 120));
    }

    #[test]
    fn test_open_fault_injection_is_transient() {
        let mut driver = SimulatedAsiDriver::new();
        driver.fail_next_opens(2);
        assert!(driver.open(0).is_err());
        assert!(driver.open(0).is_err());
        assert!(driver.open(0).is_ok());
    }

    #[test]
    fn test_vanish_and_reset_restore() {
        let mut driver = SimulatedAsiDriver::new();
        driver.vanish(0);
        assert_eq!(driver.camera_count().unwrap(), 0);
        driver.reset().unwrap();
        assert_eq!(driver.camera_count().unwrap(), 1);
        assert_eq!(driver.resets(), 1);
    }
}
