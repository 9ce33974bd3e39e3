//! Brightness statistics over 8-bit frame data
//!
//! All functions operate on raw interleaved pixel bytes; for RGB frames the
//! statistics run over all channels, matching how the calibration target
//! brightness is defined (0-255 scale).

use serde::{Deserialize, Serialize};

/// Pixel value above which a pixel counts as clipped (overexposed)
pub const CLIPPING_THRESHOLD: u8 = 245;

/// Fraction of clipped pixels above which a frame counts as clipping
pub const CLIPPING_PERCENT_LIMIT: f64 = 5.0;

/// How frame brightness is reduced to a single number
///
/// Percentile-based metrics are the default: they emphasize the brighter
/// sky region over a potentially dark foreground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMetric {
    Mean,
    Median,
    Percentile(u8),
}

impl Default for BrightnessMetric {
    fn default() -> Self {
        BrightnessMetric::Percentile(75)
    }
}

fn histogram(data: &[u8]) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in data {
        hist[v as usize] += 1;
    }
    hist
}

/// Value at the given percentile (0-100) of the data
pub fn percentile(data: &[u8], p: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let hist = histogram(data);
    let rank = (p.clamp(0.0, 100.0) / 100.0 * data.len() as f64).ceil() as u64;
    let mut seen = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        seen += count;
        if seen >= rank.max(1) {
            return value as f64;
        }
    }
    255.0
}

/// Mean pixel value
pub fn mean(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: u64 = data.iter().map(|&v| v as u64).sum();
    sum as f64 / data.len() as f64
}

/// Frame brightness under the chosen metric
pub fn brightness(data: &[u8], metric: BrightnessMetric) -> f64 {
    match metric {
        BrightnessMetric::Mean => mean(data),
        BrightnessMetric::Median => percentile(data, 50.0),
        BrightnessMetric::Percentile(p) => percentile(data, f64::from(p)),
    }
}

/// Percentage of pixels strictly above the clipping threshold
pub fn clipped_percent(data: &[u8], threshold: u8) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let clipped = data.iter().filter(|&&v| v > threshold).count();
    clipped as f64 / data.len() as f64 * 100.0
}

/// Whether a clipped percentage exceeds the clipping limit
pub fn is_clipping(clipped_percent: f64) -> bool {
    clipped_percent > CLIPPING_PERCENT_LIMIT
}

/// Per-frame brightness statistics, attached to frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub mean: f64,
    pub median: f64,
    pub min: u8,
    pub max: u8,
    pub std_dev: f64,
    pub p25: f64,
    pub p75: f64,
    pub p95: f64,
}

impl FrameStats {
    pub fn compute(data: &[u8]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                median: 0.0,
                min: 0,
                max: 0,
                std_dev: 0.0,
                p25: 0.0,
                p75: 0.0,
                p95: 0.0,
            };
        }
        let mean = mean(data);
        let var: f64 = data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / data.len() as f64;
        Self {
            mean,
            median: percentile(data, 50.0),
            min: *data.iter().min().unwrap_or(&0),
            max: *data.iter().max().unwrap_or(&0),
            std_dev: var.sqrt(),
            p25: percentile(data, 25.0),
            p75: percentile(data, 75.0),
            p95: percentile(data, 95.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mean_brightness_uniform() {
        let img = vec![128u8; 100 * 100];
        assert_eq!(brightness(&img, BrightnessMetric::Mean), 128.0);
    }

    #[test]
    fn test_median_ignores_outliers() {
        let mut img = vec![100u8; 100 * 100];
        for v in img.iter_mut().take(1000) {
            *v = 255; // 10% bright pixels
        }
        assert_eq!(brightness(&img, BrightnessMetric::Median), 100.0);
    }

    #[test]
    fn test_percentile_ordering_on_gradient() {
        let img: Vec<u8> = (0..10_000).map(|i| (i * 255 / 9_999) as u8).collect();
        let p75 = brightness(&img, BrightnessMetric::Percentile(75));
        let p25 = brightness(&img, BrightnessMetric::Percentile(25));
        assert!(p75 > p25);
        assert!((180.0..200.0).contains(&p75), "p75 = {p75}");
        assert!((60.0..70.0).contains(&p25), "p25 = {p25}");
    }

    #[test]
    fn test_clipping_percentages() {
        let img = vec![100u8; 100 * 100];
        assert_eq!(clipped_percent(&img, CLIPPING_THRESHOLD), 0.0);
        assert!(!is_clipping(clipped_percent(&img, CLIPPING_THRESHOLD)));

        let mut img = vec![100u8; 100 * 100];
        for v in img.iter_mut().take(300) {
            *v = 250; // 3% clipped: under the limit
        }
        let pct = clipped_percent(&img, CLIPPING_THRESHOLD);
        assert_eq!(pct, 3.0);
        assert!(!is_clipping(pct));

        let mut img = vec![100u8; 100 * 100];
        for v in img.iter_mut().take(1000) {
            *v = 250; // 10% clipped: over the limit
        }
        let pct = clipped_percent(&img, CLIPPING_THRESHOLD);
        assert_eq!(pct, 10.0);
        assert!(is_clipping(pct));
    }

    #[test]
    fn test_custom_clipping_threshold() {
        let img = vec![200u8; 64];
        assert_eq!(clipped_percent(&img, 150), 100.0);
        assert_eq!(clipped_percent(&img, 245), 0.0);
    }

    #[test]
    fn test_stats_on_empty_frame() {
        let stats = FrameStats::compute(&[]);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.max, 0);
    }

    proptest! {
        #[test]
        fn prop_percentile_within_data_range(data in prop::collection::vec(any::<u8>(), 1..500)) {
            let lo = *data.iter().min().unwrap() as f64;
            let hi = *data.iter().max().unwrap() as f64;
            for p in [0.0, 25.0, 50.0, 75.0, 95.0, 100.0] {
                let v = percentile(&data, p);
                prop_assert!(v >= lo && v <= hi);
            }
        }

        #[test]
        fn prop_mean_between_min_and_max(data in prop::collection::vec(any::<u8>(), 1..500)) {
            let m = mean(&data);
            let lo = *data.iter().min().unwrap() as f64;
            let hi = *data.iter().max().unwrap() as f64;
            prop_assert!(m >= lo && m <= hi);
        }
    }
}
