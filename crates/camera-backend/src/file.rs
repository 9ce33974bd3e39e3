//! Directory-watch pseudo-camera
//!
//! Simulates a camera by watching a directory for new image files, so the
//! rest of the pipeline can treat externally captured images uniformly with
//! live hardware. There is no exposure or gain control; metadata comes from
//! sidecar `.txt` files next to the images.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use camera_core::frame::{insert_stats, keys};
use camera_core::{
    CameraCapabilities, CameraError, CameraInfo, CameraSettings, CameraState, CapturedFrame,
    FrameStats,
};

use crate::sidecar::{derive_metadata, parse_sidecar};
use crate::CameraBackend;

static FILE_CAPABILITIES: CameraCapabilities = CameraCapabilities {
    backend_name: "File",
    supports_multiple_cameras: false,
    requires_sdk_path: false,
    supports_exposure_control: false,
    min_exposure_ms: 0.0,
    max_exposure_ms: 0.0,
    supports_auto_exposure: false,
    supports_gain_control: false,
    min_gain: 0,
    max_gain: 0,
    supports_white_balance: false,
    min_wb_value: 0,
    max_wb_value: 0,
    supports_binning: false,
    max_binning: 1,
    supports_flip: false,
    supports_offset: false,
    supports_raw16: true,
    native_bit_depth: 8,
    is_color_camera: true,
    bayer_pattern: None, // source files are already debayered
    supports_temperature: false,
    supports_cooling: false,
    supports_scheduled_capture: false,
    metadata_fields: &[
        "CAMERA", "EXPOSURE", "GAIN", "TEMP", "RES", "DATETIME", "FILENAME", "SESSION",
    ],
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// How long one `capture_frame` call polls before reporting no new frame
const DEFAULT_WAIT: Duration = Duration::from_secs(2);

const POLL_STEP: Duration = Duration::from_millis(100);

/// Camera-like backend over a watched directory
pub struct FileWatchBackend {
    settings: CameraSettings,
    state: CameraState,
    info: Option<CameraInfo>,
    directory: Option<PathBuf>,
    /// Only files modified after this point count as new captures
    watermark: SystemTime,
    wait: Duration,
}

impl FileWatchBackend {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            settings: settings.clone(),
            state: CameraState::Disconnected,
            info: None,
            directory: None,
            watermark: SystemTime::now(),
            wait: DEFAULT_WAIT,
        }
    }

    fn configured_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| self.settings.watch_directory.clone())
    }

    fn info_for(directory: &std::path::Path) -> CameraInfo {
        let dir_name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| directory.display().to_string());
        CameraInfo {
            index: 0,
            name: format!("Directory: {dir_name}"),
            backend: "File",
            device_id: Some(directory.display().to_string()),
            max_width: None,
            max_height: None,
            pixel_size_um: None,
            is_color: true,
            bit_depth: 8,
            driver_id: None,
        }
    }

    /// Oldest image file newer than the watermark, if any
    fn next_new_file(&self) -> Result<Option<(PathBuf, SystemTime)>, CameraError> {
        let Some(dir) = self.configured_directory() else {
            return Err(CameraError::NotConnected);
        };
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CameraError::Device(format!("cannot read {}: {e}", dir.display())))?;

        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if mtime <= self.watermark {
                continue;
            }
            // Process in arrival order
            let is_older = newest.as_ref().map(|(_, t)| mtime < *t).unwrap_or(true);
            if is_older {
                newest = Some((path, mtime));
            }
        }
        Ok(newest)
    }

    fn load_frame(&mut self, path: PathBuf, mtime: SystemTime) -> Result<CapturedFrame, CameraError> {
        let image = image::open(&path)
            .map_err(|e| CameraError::Device(format!("failed to load {}: {e}", path.display())))?
            .to_rgb8();
        self.watermark = mtime;

        let mut frame = CapturedFrame::new(image, Duration::ZERO);

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let session = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut sidecar = parse_sidecar(&path.with_extension("txt"));
        derive_metadata(&mut sidecar, &filename, &session);
        for (key, value) in sidecar {
            // The image itself is authoritative for resolution and time
            frame.metadata.entry(key).or_insert(value);
        }

        let stats = FrameStats::compute(frame.image.as_raw());
        insert_stats(&mut frame.metadata, &stats);
        frame.metadata.insert(
            keys::BRIGHTNESS.into(),
            format!("{:.1}", frame.brightness(self.settings.brightness_metric)),
        );

        debug!(file = %path.display(), "picked up new image");
        Ok(frame)
    }
}

impl CameraBackend for FileWatchBackend {
    fn initialize(&mut self) -> Result<(), CameraError> {
        match self.settings.watch_directory.as_deref() {
            Some(dir) if dir.exists() => {
                info!(directory = %dir.display(), "file watch backend ready")
            }
            Some(dir) => {
                // The directory may be created later; not fatal
                warn!(directory = %dir.display(), "watch directory does not exist yet")
            }
            None => info!("file watch backend ready, no directory configured"),
        }
        Ok(())
    }

    fn detect(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        match self.settings.watch_directory.as_deref() {
            Some(dir) if dir.exists() => Ok(vec![Self::info_for(dir)]),
            _ => Ok(Vec::new()),
        }
    }

    fn connect(
        &mut self,
        _index: usize,
        settings: Option<&CameraSettings>,
    ) -> Result<(), CameraError> {
        if let Some(settings) = settings {
            self.settings = settings.clone();
        }
        self.state = CameraState::Connecting;
        let Some(dir) = self.settings.watch_directory.clone() else {
            self.state = CameraState::Disconnected;
            return Err(CameraError::InvalidConfig(
                "no watch directory configured".into(),
            ));
        };
        if !dir.exists() {
            self.state = CameraState::Disconnected;
            return Err(CameraError::DeviceOpenFailed {
                attempts: 1,
                last_error: format!("directory does not exist: {}", dir.display()),
            });
        }
        self.info = Some(Self::info_for(&dir));
        self.directory = Some(dir.clone());
        self.watermark = SystemTime::now();
        self.state = CameraState::Connected;
        info!(directory = %dir.display(), "connected to watch directory");
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        self.connect(0, None)
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        // Only the watch directory and brightness metric matter here; the
        // exposure/gain/WB concerns do not apply to file sources.
        if settings.watch_directory != self.settings.watch_directory {
            self.directory = None;
        }
        self.settings = settings.clone();
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CapturedFrame, CameraError> {
        if !self.state.is_connected() {
            return Err(CameraError::NotConnected);
        }
        let deadline = Instant::now() + self.wait;
        loop {
            if let Some((path, mtime)) = self.next_new_file()? {
                return self.load_frame(path, mtime);
            }
            if Instant::now() >= deadline {
                return Err(CameraError::NoFrameAvailable);
            }
            std::thread::sleep(POLL_STEP);
        }
    }

    fn disconnect(&mut self) {
        if self.state == CameraState::Disconnected {
            return;
        }
        self.directory = None;
        self.info = None;
        self.state = CameraState::Disconnected;
        info!("disconnected from watch directory");
    }

    fn state(&self) -> CameraState {
        self.state
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &FILE_CAPABILITIES
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
    use image::RgbImage;

    fn temp_watch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("watch-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn settings_for(dir: &std::path::Path) -> CameraSettings {
        CameraSettings {
            watch_directory: Some(dir.to_path_buf()),
            ..CameraSettings::default()
        }
    }

    fn backend_for(dir: &std::path::Path) -> FileWatchBackend {
        let mut backend = FileWatchBackend::new(&settings_for(dir));
        backend.wait = Duration::from_millis(300);
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn test_detect_without_directory_is_empty() {
        let mut backend = FileWatchBackend::new(&CameraSettings::default());
        assert!(backend.detect().unwrap().is_empty());
    }

    #[test]
    fn test_picks_up_new_image_with_sidecar() {
        let dir = temp_watch_dir("pickup");
        let mut backend = backend_for(&dir);
        backend.connect(0, None).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        RgbImage::from_pixel(8, 8, image::Rgb([50, 60, 70]))
            .save(dir.join("frame.png"))
            .unwrap();
        std::fs::write(dir.join("frame.txt"), "[TestCam]\nGain = 250\n").unwrap();

        let frame = backend.capture_frame().unwrap();
        assert_eq!(frame.image.width(), 8);
        assert_eq!(frame.metadata.get("CAMERA").unwrap(), "TestCam");
        assert_eq!(frame.metadata.get("GAIN").unwrap(), "250");
        assert_eq!(frame.metadata.get("FILENAME").unwrap(), "frame.png");
        assert!(frame.metadata.contains_key("MEAN"));

        // Same file is not delivered twice
        assert!(matches!(
            backend.capture_frame(),
            Err(CameraError::NoFrameAvailable)
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_no_new_frame_times_out_quietly() {
        let dir = temp_watch_dir("timeout");
        let mut backend = backend_for(&dir);
        backend.connect(0, None).unwrap();
        assert!(matches!(
            backend.capture_frame(),
            Err(CameraError::NoFrameAvailable)
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_double_disconnect_is_noop() {
        let dir = temp_watch_dir("disc");
        let mut backend = backend_for(&dir);
        backend.connect(0, None).unwrap();
        backend.disconnect();
        backend.disconnect();
        assert_eq!(backend.state(), CameraState::Disconnected);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_connect_missing_directory_fails_clean() {
        let settings = CameraSettings {
            watch_directory: Some(PathBuf::from("/definitely/not/here")),
            ..CameraSettings::default()
        };
        let mut backend = FileWatchBackend::new(&settings);
        assert!(backend.connect(0, None).is_err());
        assert_eq!(backend.state(), CameraState::Disconnected);
    }
}
