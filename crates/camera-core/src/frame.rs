//! Captured frames, Bayer handling and software white balance

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::CameraError;
use crate::settings::FlipMode;
use crate::stats::{self, BrightnessMetric, FrameStats};

/// Free-form string-keyed frame metadata, consumed by overlay/output code
pub type Metadata = HashMap<String, String>;

/// Well-known metadata keys
pub mod keys {
    pub const CAMERA: &str = "CAMERA";
    pub const EXPOSURE: &str = "EXPOSURE";
    pub const GAIN: &str = "GAIN";
    pub const TEMP_C: &str = "TEMP_C";
    pub const TEMP_F: &str = "TEMP_F";
    pub const RES: &str = "RES";
    pub const DATETIME: &str = "DATETIME";
    pub const FILENAME: &str = "FILENAME";
    pub const SESSION: &str = "SESSION";
    pub const BRIGHTNESS: &str = "BRIGHTNESS";
    pub const MEAN: &str = "MEAN";
    pub const MEDIAN: &str = "MEDIAN";
    pub const MIN: &str = "MIN";
    pub const MAX: &str = "MAX";
    pub const STD_DEV: &str = "STD_DEV";
    pub const P25: &str = "P25";
    pub const P75: &str = "P75";
    pub const P95: &str = "P95";
    pub const BAYER_PATTERN: &str = "BAYER_PATTERN";
}

/// Insert the standard brightness statistics keys
pub fn insert_stats(metadata: &mut Metadata, stats: &FrameStats) {
    metadata.insert(keys::MEAN.into(), format!("{:.1}", stats.mean));
    metadata.insert(keys::MEDIAN.into(), format!("{:.1}", stats.median));
    metadata.insert(keys::MIN.into(), stats.min.to_string());
    metadata.insert(keys::MAX.into(), stats.max.to_string());
    metadata.insert(keys::STD_DEV.into(), format!("{:.2}", stats.std_dev));
    metadata.insert(keys::P25.into(), format!("{:.1}", stats.p25));
    metadata.insert(keys::P75.into(), format!("{:.1}", stats.p75));
    metadata.insert(keys::P95.into(), format!("{:.1}", stats.p95));
}

/// Color filter array layout of a raw sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BayerPattern {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl BayerPattern {
    /// (row, col) offsets within a 2x2 cell of (red, green-a, green-b, blue)
    fn offsets(self) -> [(u32, u32); 4] {
        match self {
            BayerPattern::Rggb => [(0, 0), (0, 1), (1, 0), (1, 1)],
            BayerPattern::Bggr => [(1, 1), (0, 1), (1, 0), (0, 0)],
            BayerPattern::Grbg => [(0, 1), (0, 0), (1, 1), (1, 0)],
            BayerPattern::Gbrg => [(1, 0), (0, 0), (1, 1), (0, 1)],
        }
    }
}

impl std::fmt::Display for BayerPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BayerPattern::Rggb => "RGGB",
            BayerPattern::Bggr => "BGGR",
            BayerPattern::Grbg => "GRBG",
            BayerPattern::Gbrg => "GBRG",
        };
        f.write_str(s)
    }
}

/// Outcome of one successful exposure
///
/// Produced by exactly one capture attempt and handed to the consumer by
/// move; the backend retains nothing after the frame leaves it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Debayered RGB frame
    pub image: RgbImage,
    /// Free-form metadata (exposure, gain, temperature, statistics, ...)
    pub metadata: Metadata,
    /// Pre-white-balance RGB for advanced consumers (dev mode, FITS saving)
    pub raw_rgb_no_wb: Option<RgbImage>,
    /// Exposure used for this frame
    pub exposure: Duration,
    /// Wall-clock capture time
    pub timestamp: DateTime<Local>,
}

impl CapturedFrame {
    pub fn new(image: RgbImage, exposure: Duration) -> Self {
        let timestamp = Local::now();
        let mut metadata = Metadata::new();
        metadata.insert(
            keys::DATETIME.into(),
            timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        metadata.insert(
            keys::RES.into(),
            format!("{}x{}", image.width(), image.height()),
        );
        Self {
            image,
            metadata,
            raw_rgb_no_wb: None,
            exposure,
            timestamp,
        }
    }

    /// Frame brightness under the given metric
    pub fn brightness(&self, metric: BrightnessMetric) -> f64 {
        stats::brightness(self.image.as_raw(), metric)
    }

    /// Percentage of clipped pixels in the frame
    pub fn clipped_percent(&self) -> f64 {
        stats::clipped_percent(self.image.as_raw(), stats::CLIPPING_THRESHOLD)
    }
}

/// Nearest-neighbor debayer of an 8-bit raw frame
///
/// Each 2x2 cell is collapsed to one (R, G, B) triple (greens averaged) and
/// written to all four output pixels. Fast and artifact-tolerant; allsky
/// consumers downscale heavily anyway.
pub fn debayer_raw8(
    raw: &[u8],
    width: u32,
    height: u32,
    pattern: BayerPattern,
) -> Result<RgbImage, CameraError> {
    let expected = width as usize * height as usize;
    if raw.len() != expected {
        return Err(CameraError::Device(format!(
            "raw frame size mismatch: got {} bytes, expected {expected}",
            raw.len()
        )));
    }
    let sample = |y: u32, x: u32| -> u16 {
        let y = y.min(height.saturating_sub(1));
        let x = x.min(width.saturating_sub(1));
        raw[(y * width + x) as usize] as u16
    };

    let [ro, g0, g1, bo] = pattern.offsets();
    let mut out = RgbImage::new(width, height);
    let mut by = 0;
    while by < height {
        let mut bx = 0;
        while bx < width {
            let r = sample(by + ro.0, bx + ro.1) as u8;
            let g = ((sample(by + g0.0, bx + g0.1) + sample(by + g1.0, bx + g1.1)) / 2) as u8;
            let b = sample(by + bo.0, bx + bo.1) as u8;
            for dy in 0..2 {
                for dx in 0..2 {
                    let (y, x) = (by + dy, bx + dx);
                    if y < height && x < width {
                        out.put_pixel(x, y, image::Rgb([r, g, b]));
                    }
                }
            }
            bx += 2;
        }
        by += 2;
    }
    Ok(out)
}

/// Debayer a 16-bit little-endian raw frame, scaling to 8 bits (÷257)
pub fn debayer_raw16(
    raw: &[u8],
    width: u32,
    height: u32,
    pattern: BayerPattern,
) -> Result<RgbImage, CameraError> {
    let expected = width as usize * height as usize * 2;
    if raw.len() != expected {
        return Err(CameraError::Device(format!(
            "raw16 frame size mismatch: got {} bytes, expected {expected}",
            raw.len()
        )));
    }
    let scaled: Vec<u8> = raw
        .chunks_exact(2)
        .map(|c| (u16::from_le_bytes([c[0], c[1]]) / 257) as u8)
        .collect();
    debayer_raw8(&scaled, width, height, pattern)
}

/// Apply software white balance channel gains in place
pub fn apply_wb_gains(image: &mut RgbImage, red_gain: f64, blue_gain: f64) {
    for pixel in image.pixels_mut() {
        pixel[0] = (f64::from(pixel[0]) * red_gain).round().clamp(0.0, 255.0) as u8;
        pixel[2] = (f64::from(pixel[2]) * blue_gain).round().clamp(0.0, 255.0) as u8;
    }
}

/// Apply the configured flip
pub fn apply_flip(image: &mut RgbImage, flip: FlipMode) {
    match flip {
        FlipMode::None => {}
        FlipMode::Horizontal => imageops::flip_horizontal_in_place(image),
        FlipMode::Vertical => imageops::flip_vertical_in_place(image),
        FlipMode::Both => {
            imageops::flip_horizontal_in_place(image);
            imageops::flip_vertical_in_place(image);
        }
    }
}
