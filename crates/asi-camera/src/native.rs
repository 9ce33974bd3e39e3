//! libloading-backed driver for the real ASI SDK
//!
//! The SDK shared library is opened at runtime, so the binary runs on hosts
//! without the vendor library installed (they just cannot use the ASI
//! backend). All required entry points are resolved once at load time;
//! a library that is present but incomplete fails fast with the missing
//! symbol name.

use std::os::raw::{c_char, c_int, c_long, c_uchar};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use camera_core::{BayerPattern, CameraError, SdkLoadError};

use crate::driver::{
    AsiCameraProperty, AsiControl, AsiControlCaps, AsiDriver, AsiExposureStatus, AsiImgType,
};

#[cfg(target_os = "windows")]
const DEFAULT_LIBRARY: &str = "ASICamera2.dll";
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY: &str = "libASICamera2.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_LIBRARY: &str = "libASICamera2.so";

/// ASI_CAMERA_INFO
#[repr(C)]
struct AsiCameraInfoRaw {
    name: [c_char; 64],
    camera_id: c_int,
    max_height: c_long,
    max_width: c_long,
    is_color_cam: c_int,
    bayer_pattern: c_int,
    supported_bins: [c_int; 16],
    supported_video_format: [c_int; 8],
    pixel_size: f64,
    mechanical_shutter: c_int,
    st4_port: c_int,
    is_cooler_cam: c_int,
    is_usb3_host: c_int,
    is_usb3_camera: c_int,
    elec_per_adu: f32,
    bit_depth: c_int,
    is_trigger_cam: c_int,
    unused: [c_char; 16],
}

/// ASI_CONTROL_CAPS
#[repr(C)]
struct AsiControlCapsRaw {
    name: [c_char; 64],
    description: [c_char; 128],
    max_value: c_long,
    min_value: c_long,
    default_value: c_long,
    is_auto_supported: c_int,
    is_writable: c_int,
    control_type: c_int,
    unused: [c_char; 32],
}

const REQUIRED_SYMBOLS: &[&str] = &[
    "ASIGetNumOfConnectedCameras",
    "ASIGetCameraProperty",
    "ASIOpenCamera",
    "ASIInitCamera",
    "ASICloseCamera",
    "ASIGetNumOfControls",
    "ASIGetControlCaps",
    "ASISetControlValue",
    "ASIGetControlValue",
    "ASISetROIFormat",
    "ASIStartExposure",
    "ASIGetExpStatus",
    "ASIGetDataAfterExp",
];

fn c_string(bytes: &[c_char]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end]
        .iter()
        .map(|&b| b as u8 as char)
        .collect()
}

fn check(code: c_int, what: &str) -> Result<(), CameraError> {
    if code == 0 {
        Ok(())
    } else {
        Err(CameraError::Device(format!(
            "{what} failed with ASI error code {code}"
        )))
    }
}

/// Driver over the real vendor shared library
#[derive(Debug)]
pub struct NativeAsiDriver {
    library: Library,
    /// Where the library came from, for `reset`
    source: Option<PathBuf>,
}

impl NativeAsiDriver {
    /// Load the SDK from an explicit path or the default library name
    pub fn load(sdk_path: Option<&Path>) -> Result<Self, SdkLoadError> {
        let library = match sdk_path {
            Some(path) => {
                if !path.exists() {
                    return Err(SdkLoadError::MissingBinary {
                        path: path.display().to_string(),
                    });
                }
                unsafe { Library::new(path) }
                    .map_err(|e| SdkLoadError::LoadFailed(e.to_string()))?
            }
            None => unsafe { Library::new(DEFAULT_LIBRARY) }.map_err(|_| {
                SdkLoadError::NotConfigured {
                    default: DEFAULT_LIBRARY.to_string(),
                }
            })?,
        };

        for symbol in REQUIRED_SYMBOLS {
            let found = unsafe { library.get::<*const ()>(symbol.as_bytes()) }.is_ok();
            if !found {
                return Err(SdkLoadError::MissingSymbol {
                    symbol: symbol.to_string(),
                });
            }
        }

        info!(
            library = sdk_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| DEFAULT_LIBRARY.to_string()),
            "ASI SDK loaded"
        );
        Ok(Self {
            library,
            source: sdk_path.map(Path::to_path_buf),
        })
    }

    fn sym<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>, CameraError> {
        unsafe { self.library.get(name.as_bytes()) }
            .map_err(|e| CameraError::Device(format!("SDK symbol '{name}' unavailable: {e}")))
    }
}

impl AsiDriver for NativeAsiDriver {
    fn camera_count(&mut self) -> Result<usize, CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn() -> c_int> =
            self.sym("ASIGetNumOfConnectedCameras")?;
        let count = unsafe { f() };
        Ok(count.max(0) as usize)
    }

    fn camera_property(&mut self, index: usize) -> Result<AsiCameraProperty, CameraError> {
        let f: libloading::Symbol<
            '_,
            unsafe extern "C" fn(*mut AsiCameraInfoRaw, c_int) -> c_int,
        > = self.sym("ASIGetCameraProperty")?;
        let mut raw = std::mem::MaybeUninit::<AsiCameraInfoRaw>::zeroed();
        check(
            unsafe { f(raw.as_mut_ptr(), index as c_int) },
            "ASIGetCameraProperty",
        )?;
        let raw = unsafe { raw.assume_init() };

        let bayer_pattern = if raw.is_color_cam != 0 {
            Some(match raw.bayer_pattern {
                0 => BayerPattern::Rggb,
                1 => BayerPattern::Bggr,
                2 => BayerPattern::Grbg,
                _ => BayerPattern::Gbrg,
            })
        } else {
            None
        };
        Ok(AsiCameraProperty {
            name: c_string(&raw.name),
            camera_id: raw.camera_id,
            max_width: raw.max_width.max(0) as u32,
            max_height: raw.max_height.max(0) as u32,
            is_color: raw.is_color_cam != 0,
            bayer_pattern,
            pixel_size_um: raw.pixel_size,
            bit_depth: raw.bit_depth.clamp(0, 255) as u8,
            supported_bins: raw
                .supported_bins
                .iter()
                .take_while(|&&b| b > 0)
                .map(|&b| b as u32)
                .collect(),
        })
    }

    fn open(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn(c_int) -> c_int> =
            self.sym("ASIOpenCamera")?;
        check(unsafe { f(camera_id) }, "ASIOpenCamera")
    }

    fn init(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn(c_int) -> c_int> =
            self.sym("ASIInitCamera")?;
        check(unsafe { f(camera_id) }, "ASIInitCamera")
    }

    fn close(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn(c_int) -> c_int> =
            self.sym("ASICloseCamera")?;
        check(unsafe { f(camera_id) }, "ASICloseCamera")
    }

    fn control_caps(&mut self, camera_id: i32) -> Result<Vec<AsiControlCaps>, CameraError> {
        let count_fn: libloading::Symbol<'_, unsafe extern "C" fn(c_int, *mut c_int) -> c_int> =
            self.sym("ASIGetNumOfControls")?;
        let mut count: c_int = 0;
        check(
            unsafe { count_fn(camera_id, &mut count) },
            "ASIGetNumOfControls",
        )?;

        let caps_fn: libloading::Symbol<
            '_,
            unsafe extern "C" fn(c_int, c_int, *mut AsiControlCapsRaw) -> c_int,
        > = self.sym("ASIGetControlCaps")?;
        let mut caps = Vec::new();
        for i in 0..count.max(0) {
            let mut raw = std::mem::MaybeUninit::<AsiControlCapsRaw>::zeroed();
            check(
                unsafe { caps_fn(camera_id, i, raw.as_mut_ptr()) },
                "ASIGetControlCaps",
            )?;
            let raw = unsafe { raw.assume_init() };
            // Controls we do not drive are simply skipped
            let Some(control) = AsiControl::from_id(raw.control_type) else {
                continue;
            };
            caps.push(AsiControlCaps {
                control,
                min: raw.min_value as i64,
                max: raw.max_value as i64,
                default: raw.default_value as i64,
                is_auto_supported: raw.is_auto_supported != 0,
                is_writable: raw.is_writable != 0,
            });
        }
        debug!(camera_id, controls = caps.len(), "queried control caps");
        Ok(caps)
    }

    fn set_control(
        &mut self,
        camera_id: i32,
        control: AsiControl,
        value: i64,
        auto: bool,
    ) -> Result<(), CameraError> {
        let f: libloading::Symbol<
            '_,
            unsafe extern "C" fn(c_int, c_int, c_long, c_int) -> c_int,
        > = self.sym("ASISetControlValue")?;
        check(
            unsafe { f(camera_id, control.id(), value as c_long, auto as c_int) },
            "ASISetControlValue",
        )
    }

    fn get_control(
        &mut self,
        camera_id: i32,
        control: AsiControl,
    ) -> Result<(i64, bool), CameraError> {
        let f: libloading::Symbol<
            '_,
            unsafe extern "C" fn(c_int, c_int, *mut c_long, *mut c_int) -> c_int,
        > = self.sym("ASIGetControlValue")?;
        let mut value: c_long = 0;
        let mut auto: c_int = 0;
        check(
            unsafe { f(camera_id, control.id(), &mut value, &mut auto) },
            "ASIGetControlValue",
        )?;
        Ok((value as i64, auto != 0))
    }

    fn set_roi(
        &mut self,
        camera_id: i32,
        width: u32,
        height: u32,
        binning: u32,
        img_type: AsiImgType,
    ) -> Result<(), CameraError> {
        let f: libloading::Symbol<
            '_,
            unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int) -> c_int,
        > = self.sym("ASISetROIFormat")?;
        check(
            unsafe {
                f(
                    camera_id,
                    width as c_int,
                    height as c_int,
                    binning as c_int,
                    img_type.id(),
                )
            },
            "ASISetROIFormat",
        )
    }

    fn start_exposure(&mut self, camera_id: i32) -> Result<(), CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn(c_int, c_int) -> c_int> =
            self.sym("ASIStartExposure")?;
        // Second argument is the legacy "is dark frame" flag
        check(unsafe { f(camera_id, 0) }, "ASIStartExposure")
    }

    fn exposure_status(&mut self, camera_id: i32) -> Result<AsiExposureStatus, CameraError> {
        let f: libloading::Symbol<'_, unsafe extern "C" fn(c_int, *mut c_int) -> c_int> =
            self.sym("ASIGetExpStatus")?;
        let mut status: c_int = 0;
        check(unsafe { f(camera_id, &mut status) }, "ASIGetExpStatus")?;
        Ok(match status {
            0 => AsiExposureStatus::Idle,
            1 => AsiExposureStatus::Working,
            2 => AsiExposureStatus::Success,
            _ => AsiExposureStatus::Failed,
        })
    }

    fn download_exposure(&mut self, camera_id: i32, buffer: &mut [u8]) -> Result<(), CameraError> {
        let f: libloading::Symbol<
            '_,
            unsafe extern "C" fn(c_int, *mut c_uchar, c_long) -> c_int,
        > = self.sym("ASIGetDataAfterExp")?;
        check(
            unsafe { f(camera_id, buffer.as_mut_ptr(), buffer.len() as c_long) },
            "ASIGetDataAfterExp",
        )
    }

    fn reset(&mut self) -> Result<(), CameraError> {
        info!("reloading ASI SDK library");
        let reloaded = Self::load(self.source.as_deref())
            .map_err(|reason| CameraError::SdkUnavailable { reason })?;
        // Dropping the old Library dlcloses the previous handle
        *self = reloaded;
        Ok(())
    }
}
