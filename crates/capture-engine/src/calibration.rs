//! Auto-exposure calibration
//!
//! Pure convergence algorithm over (exposure, brightness) samples; the
//! capture loop takes the trial frames and feeds measurements in. Once the
//! target is bracketed by one sample below and one above, linear
//! interpolation between the closest such pair replaces multiplicative
//! stepping, which is what makes convergence fast.

use tracing::debug;

use camera_core::stats::CLIPPING_PERCENT_LIMIT;

/// One trial: exposure tried and brightness measured
#[derive(Debug, Clone, Copy)]
pub struct CalibrationSample {
    pub exposure_ms: f64,
    pub brightness: f64,
}

/// What the loop should do after a trial frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Target reached (or accepted at the exposure ceiling)
    Converged {
        exposure_ms: f64,
        brightness: f64,
        at_max: bool,
    },
    /// Try again at this exposure
    Retry { next_exposure_ms: f64 },
    /// Attempt budget exhausted; keep the last exposure and move on
    GaveUp {
        last_exposure_ms: f64,
        brightness: f64,
    },
}

/// Convergence state for one calibration pass
pub struct Calibrator {
    target: f64,
    min_exposure_ms: f64,
    max_exposure_ms: f64,
    max_attempts: u32,
    samples: Vec<CalibrationSample>,
    stall_streak: u32,
}

impl Calibrator {
    pub const MAX_ATTEMPTS: u32 = 15;

    /// Converged when within this fraction of the target
    pub const TOLERANCE_FRACTION: f64 = 0.2;

    /// Brightness delta below which an attempt counts as stalled
    const STALL_DELTA: f64 = 0.5;

    pub fn new(target: f64, min_exposure_ms: f64, max_exposure_ms: f64) -> Self {
        Self {
            target: target.max(1.0),
            min_exposure_ms: min_exposure_ms.max(0.0),
            max_exposure_ms: max_exposure_ms.max(min_exposure_ms),
            max_attempts: Self::MAX_ATTEMPTS,
            samples: Vec::new(),
            stall_streak: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.samples.len() as u32
    }

    /// Record one trial frame and decide the next move
    pub fn observe(
        &mut self,
        exposure_ms: f64,
        brightness: f64,
        clipped_percent: f64,
    ) -> CalibrationStep {
        if let Some(last) = self.samples.last() {
            if (brightness - last.brightness).abs() < Self::STALL_DELTA {
                self.stall_streak += 1;
            } else {
                self.stall_streak = 0;
            }
        }
        self.samples.push(CalibrationSample {
            exposure_ms,
            brightness,
        });

        let tolerance = Self::TOLERANCE_FRACTION * self.target;
        if (brightness - self.target).abs() < tolerance {
            debug!(
                attempts = self.attempts(),
                exposure_ms, brightness, "calibration converged"
            );
            return CalibrationStep::Converged {
                exposure_ms,
                brightness,
                at_max: false,
            };
        }

        // A dim frame at the exposure ceiling is accepted; retrying cannot
        // make it brighter
        if brightness < self.target && exposure_ms >= self.max_exposure_ms - f64::EPSILON {
            debug!(brightness, "accepting calibration at maximum exposure");
            return CalibrationStep::Converged {
                exposure_ms: self.max_exposure_ms,
                brightness,
                at_max: true,
            };
        }

        if self.attempts() >= self.max_attempts {
            return CalibrationStep::GaveUp {
                last_exposure_ms: exposure_ms,
                brightness,
            };
        }

        let next = self.next_exposure(exposure_ms, brightness, clipped_percent);
        CalibrationStep::Retry {
            next_exposure_ms: next,
        }
    }

    /// Closest below-target and above-target samples, when both exist
    fn brackets(&self) -> Option<(CalibrationSample, CalibrationSample)> {
        let below = self
            .samples
            .iter()
            .filter(|s| s.brightness < self.target)
            .max_by(|a, b| a.brightness.total_cmp(&b.brightness))?;
        let above = self
            .samples
            .iter()
            .filter(|s| s.brightness > self.target)
            .min_by(|a, b| a.brightness.total_cmp(&b.brightness))?;
        Some((*below, *above))
    }

    fn next_exposure(&mut self, exposure_ms: f64, brightness: f64, clipped_percent: f64) -> f64 {
        let clipping = clipped_percent > CLIPPING_PERCENT_LIMIT;

        if let Some((low, high)) = self.brackets() {
            if high.brightness > low.brightness {
                let mut next = low.exposure_ms
                    + (self.target - low.brightness) * (high.exposure_ms - low.exposure_ms)
                        / (high.brightness - low.brightness);
                if clipping {
                    next = next.min(exposure_ms);
                }
                return next.clamp(self.min_exposure_ms, self.max_exposure_ms);
            }
        }

        // Unbracketed: multiplicative step toward the target, capped harder
        // the closer brightness already is
        let ratio = brightness / self.target;
        let mut factor = self.target / brightness.max(1.0);
        if ratio < 0.3 {
            factor = factor.min(5.0);
        } else if ratio < 0.5 {
            factor = factor.min(3.0);
        } else if ratio < 0.8 {
            factor = factor.min(2.0);
        } else if ratio <= 1.0 {
            factor = factor.min(1.25);
        } else {
            factor = factor.clamp(0.5, 0.95);
        }

        // A stalled search is pushing against something (usually the dark
        // floor); escalate the step so it breaks free or hits a bound
        let escalation = match self.stall_streak {
            0 | 1 => 1.0,
            2 => 2.5,
            _ => 4.0,
        };
        if escalation > 1.0 {
            debug!(streak = self.stall_streak, escalation, "calibration stalled");
            if factor >= 1.0 {
                factor *= escalation;
            } else {
                factor /= escalation;
            }
        }

        if clipping && factor > 1.0 {
            debug!(clipped_percent, "clipping guard holding exposure down");
            factor = 0.7;
        }

        (exposure_ms * factor).clamp(self.min_exposure_ms, self.max_exposure_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run_to_convergence(
        calibrator: &mut Calibrator,
        mut exposure_ms: f64,
        model: impl Fn(f64) -> f64,
    ) -> CalibrationStep {
        loop {
            let brightness = model(exposure_ms);
            match calibrator.observe(exposure_ms, brightness, 0.0) {
                CalibrationStep::Retry { next_exposure_ms } => exposure_ms = next_exposure_ms,
                done => return done,
            }
        }
    }

    #[test]
    fn test_converges_on_linear_response() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 30_000.0);
        let step = run_to_convergence(&mut calibrator, 100.0, |e| (e / 10.0).min(255.0));
        match step {
            CalibrationStep::Converged {
                brightness, at_max, ..
            } => {
                assert!((brightness - 100.0).abs() < 20.0);
                assert!(!at_max);
            }
            other => panic!("expected convergence, got {other:?}"),
        }
        assert!(calibrator.attempts() <= Calibrator::MAX_ATTEMPTS);
    }

    #[test]
    fn test_accepts_dim_frame_at_max_exposure() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 1_000.0);
        // Scene so dark even max exposure only reaches 12
        let step = run_to_convergence(&mut calibrator, 100.0, |e| e / 80.0);
        match step {
            CalibrationStep::Converged {
                exposure_ms,
                at_max,
                ..
            } => {
                assert!(at_max);
                assert_eq!(exposure_ms, 1_000.0);
            }
            other => panic!("expected max-exposure acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_clipping_guard_never_increases_exposure() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 30_000.0);
        // Brightness below target but frame heavily clipped
        let step = calibrator.observe(500.0, 60.0, 12.0);
        match step {
            CalibrationStep::Retry { next_exposure_ms } => {
                assert!(next_exposure_ms <= 500.0, "exposure rose while clipping");
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_stall_escalates_step() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 30_000.0);
        // Three near-identical dark readings well below 30% of target
        let first = match calibrator.observe(100.0, 10.0, 0.0) {
            CalibrationStep::Retry { next_exposure_ms } => next_exposure_ms,
            other => panic!("{other:?}"),
        };
        let _ = calibrator.observe(first, 10.2, 0.0);
        let third = match calibrator.observe(first, 10.3, 0.0) {
            CalibrationStep::Retry { next_exposure_ms } => next_exposure_ms,
            other => panic!("{other:?}"),
        };
        // Cap alone is 5x; escalation pushes past it
        assert!(third > first * 5.0, "no escalation: {first} -> {third}");
    }

    #[test]
    fn test_gives_up_after_attempt_budget() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 30_000.0);
        // Brightness pinned at 200 regardless of exposure: oscillates forever.
        // Feed alternating values so stall escalation never kicks in.
        let mut exposure = 100.0;
        let mut step = CalibrationStep::Retry {
            next_exposure_ms: exposure,
        };
        for i in 0..Calibrator::MAX_ATTEMPTS + 1 {
            let brightness = if i % 2 == 0 { 200.0 } else { 40.0 };
            step = calibrator.observe(exposure, brightness, 0.0);
            match step {
                CalibrationStep::Retry { next_exposure_ms } => exposure = next_exposure_ms,
                _ => break,
            }
        }
        match step {
            CalibrationStep::GaveUp { .. } => {
                assert_eq!(calibrator.attempts(), Calibrator::MAX_ATTEMPTS);
            }
            other => panic!("expected give-up, got {other:?}"),
        }
    }

    #[test]
    fn test_immediate_convergence_inside_tolerance() {
        let mut calibrator = Calibrator::new(100.0, 0.032, 30_000.0);
        assert!(matches!(
            calibrator.observe(250.0, 85.0, 0.0),
            CalibrationStep::Converged { at_max: false, .. }
        ));
    }

    proptest! {
        /// With the target bracketed, interpolation lands strictly between
        /// the bracketing exposures
        #[test]
        fn prop_interpolation_stays_between_brackets(
            low_e in 1.0f64..1_000.0,
            span in 1.0f64..10_000.0,
            b_low in 1.0f64..79.0,
            b_high in 121.0f64..255.0,
        ) {
            let high_e = low_e + span;
            let mut calibrator = Calibrator::new(100.0, 0.001, 1_000_000.0);
            prop_assert!(
                matches!(
                    calibrator.observe(low_e, b_low, 0.0),
                    CalibrationStep::Retry { .. }
                ),
                "expected retry on first observation"
            );
            match calibrator.observe(high_e, b_high, 0.0) {
                CalibrationStep::Retry { next_exposure_ms } => {
                    prop_assert!(next_exposure_ms > low_e);
                    prop_assert!(next_exposure_ms < high_e);
                }
                other => prop_assert!(false, "expected retry, got {:?}", other),
            }
        }

        /// Suggested exposures never leave the configured bounds
        #[test]
        fn prop_next_exposure_respects_bounds(
            exposure in 0.001f64..100_000.0,
            brightness in 0.0f64..255.0,
            clipped in 0.0f64..100.0,
        ) {
            let mut calibrator = Calibrator::new(100.0, 1.0, 5_000.0);
            if let CalibrationStep::Retry { next_exposure_ms } =
                calibrator.observe(exposure, brightness, clipped)
            {
                prop_assert!(next_exposure_ms >= 1.0);
                prop_assert!(next_exposure_ms <= 5_000.0);
            }
        }
    }
}
