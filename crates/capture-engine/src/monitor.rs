//! Runtime brightness monitoring between calibrations
//!
//! Tracks a slow-moving baseline so gradual dawn/dusk drift passes
//! unnoticed, while sky-condition jumps (clouds clearing, moonrise, lights)
//! trigger a full recalibration. Everything in between gets a single
//! conservative exposure nudge.

use tracing::debug;

/// What to do with the exposure after a steady-state frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorAction {
    /// Brightness is where it should be
    Hold,
    /// Multiply the exposure by this factor
    Nudge(f64),
    /// Conditions changed drastically; run a full calibration pass
    Recalibrate,
}

/// Baseline tracker for one capture session
pub struct ExposureMonitor {
    target: f64,
    max_exposure_ms: f64,
    baseline: Option<f64>,
}

impl ExposureMonitor {
    /// Baseline EMA weight on the previous value
    const EMA_OLD: f64 = 0.95;

    const NUDGE_UP: f64 = 1.3;
    const NUDGE_DOWN: f64 = 0.7;

    pub fn new(target: f64, max_exposure_ms: f64) -> Self {
        Self {
            target: target.max(1.0),
            max_exposure_ms,
            baseline: None,
        }
    }

    /// Seed (or clear) the baseline, typically right after calibration
    pub fn reset(&mut self, baseline: Option<f64>) {
        self.baseline = baseline;
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Judge one captured frame
    pub fn observe(
        &mut self,
        brightness: f64,
        clipped_percent: f64,
        exposure_ms: f64,
    ) -> MonitorAction {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(brightness);
            return MonitorAction::Hold;
        };

        // Previously dark scene pinned at max exposure that has brightened
        // past target: a shorter exposure is newly reachable
        let dark_scene_brightened = exposure_ms >= self.max_exposure_ms - f64::EPSILON
            && baseline < self.target
            && brightness > self.target;

        if brightness > 2.0 * baseline
            || brightness < 0.5 * baseline
            || clipped_percent > 50.0
            || dark_scene_brightened
        {
            debug!(brightness, baseline, clipped_percent, "drastic brightness change");
            self.baseline = None;
            return MonitorAction::Recalibrate;
        }

        self.baseline = Some(Self::EMA_OLD * baseline + (1.0 - Self::EMA_OLD) * brightness);

        if brightness < 0.8 * self.target {
            MonitorAction::Nudge(Self::NUDGE_UP)
        } else if brightness > 1.2 * self.target {
            MonitorAction::Nudge(Self::NUDGE_DOWN)
        } else {
            MonitorAction::Hold
        }
    }
}
