//! The capture loop state machine
//!
//! One background thread per engine instance drives a backend through
//! calibration, scheduled windows and error recovery. All events reach the
//! consumer over the engine's channel, sent from the capture thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::NaiveTime;
use tracing::{error, info, warn};

use camera_backend::CameraBackend;
use camera_core::{CameraError, CameraSettings, CameraState, CapturedFrame};

use crate::calibration::{Calibrator, CalibrationStep};
use crate::events::EventSender;
use crate::monitor::{ExposureMonitor, MonitorAction};

/// Consecutive capture failures tolerated before the run is declared dead
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// How long `stop` waits for the capture thread before giving up on it
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Granularity of interruptible sleeps
const STOP_POLL: Duration = Duration::from_millis(50);

/// Re-check cadence while parked outside the scheduled window
const IDLE_RECHECK: Duration = Duration::from_secs(30);

fn local_time() -> NaiveTime {
    chrono::Local::now().time()
}

/// Loop pacing and clock source
///
/// Defaults are the production values; tests shrink the delays and pin
/// the clock so the schedule and recovery paths run in milliseconds.
#[derive(Debug, Clone)]
pub struct EngineTiming {
    /// Unit the exponential reconnect backoff scales
    pub backoff_unit: Duration,
    /// Re-check cadence while parked outside the scheduled window
    pub idle_recheck: Duration,
    /// Wall-clock source for schedule checks
    pub clock: fn() -> NaiveTime,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_secs(1),
            idle_recheck: IDLE_RECHECK,
            clock: local_time,
        }
    }
}

impl EngineTiming {
    /// Millisecond pacing, same clock
    pub fn immediate() -> Self {
        Self {
            backoff_unit: Duration::from_millis(1),
            idle_recheck: Duration::from_millis(20),
            clock: local_time,
        }
    }

    /// Backoff before reconnect attempt `attempt` (1-based)
    ///
    /// `None` means the error budget is spent and the loop must stop.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > MAX_CONSECUTIVE_ERRORS {
            return None;
        }
        Some(self.backoff_unit * 2u32.pow(attempt).min(32))
    }
}

/// Backoff at production pacing, `min(2^attempt, 32)` seconds
pub fn reconnect_backoff(attempt: u32) -> Option<Duration> {
    EngineTiming::default().backoff(attempt)
}

/// Sleep in short slices so a stop request is honored promptly
fn interruptible_sleep(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// Releases the device on every exit path, panics included
struct BackendGuard {
    backend: Box<dyn CameraBackend>,
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.backend.disconnect();
    }
}

/// One frame outside the continuous loop
///
/// The engine owns the backend while running, so a manual capture and the
/// loop can never race on the same device handle.
pub fn capture_once(backend: &mut dyn CameraBackend) -> Result<CapturedFrame, CameraError> {
    if !backend.is_connected() {
        return Err(CameraError::NotConnected);
    }
    backend.capture_frame()
}

/// What the engine is doing right now
///
/// Unlike [`CameraState`] this keeps the terminal error, so a run that
/// died of reconnect exhaustion is distinguishable from a plain stop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    /// Connecting or reconnecting to the device
    Connecting,
    /// Running auto-exposure calibration
    Calibrating,
    /// Capturing frames
    Capturing,
    /// Device released while outside the scheduled capture window
    ScheduledIdle,
    /// Stopped normally, or not capturing yet
    Stopped,
    /// Stopped on a terminal error
    Failed(CameraError),
}

fn status_of(state: CameraState, terminal: Option<CameraError>) -> EngineStatus {
    if let Some(error) = terminal {
        return EngineStatus::Failed(error);
    }
    match state {
        CameraState::Connecting => EngineStatus::Connecting,
        CameraState::Calibrating => EngineStatus::Calibrating,
        CameraState::Capturing => EngineStatus::Capturing,
        CameraState::ScheduledIdle => EngineStatus::ScheduledIdle,
        CameraState::Disconnected | CameraState::Connected | CameraState::Error => {
            EngineStatus::Stopped
        }
    }
}

/// State the capture thread publishes for the owning handle
struct EngineShared {
    state: CameraState,
    terminal: Option<CameraError>,
}

/// Handle to a running capture loop
///
/// Dropping the handle requests a stop but does not wait; call
/// [`CaptureEngine::stop`] for an orderly shutdown.
pub struct CaptureEngine {
    stop: Arc<AtomicBool>,
    shared: Arc<Mutex<EngineShared>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Spawn the capture thread over a connected backend
    pub fn start(
        backend: Box<dyn CameraBackend>,
        settings: CameraSettings,
        events: EventSender,
    ) -> Self {
        Self::start_with_timing(backend, settings, events, EngineTiming::default())
    }

    /// [`CaptureEngine::start`] with explicit pacing, for tests
    pub fn start_with_timing(
        backend: Box<dyn CameraBackend>,
        settings: CameraSettings,
        events: EventSender,
        timing: EngineTiming,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Mutex::new(EngineShared {
            state: backend.state(),
            terminal: None,
        }));

        let worker = {
            let stop = Arc::clone(&stop);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("capture-loop".into())
                .spawn(move || {
                    let mut run = CaptureRun {
                        guard: BackendGuard { backend },
                        settings,
                        events,
                        timing,
                        stop,
                        shared,
                    };
                    run.run();
                })
                .unwrap_or_else(|e| {
                    // Thread spawn only fails under resource exhaustion
                    panic!("failed to spawn capture thread: {e}")
                })
        };

        Self {
            stop,
            shared,
            worker: Some(worker),
        }
    }

    pub fn state(&self) -> CameraState {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn status(&self) -> EngineStatus {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        status_of(shared.state, shared.terminal.clone())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    /// Request a stop and wait for the capture thread
    ///
    /// Waits out an in-flight long exposure up to a fixed deadline; a
    /// thread that still has not finished by then is logged and left to
    /// finish on its own.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL);
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
        } else {
            warn!("capture thread did not stop within {JOIN_TIMEOUT:?}, detaching");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Everything the capture thread owns
struct CaptureRun {
    guard: BackendGuard,
    settings: CameraSettings,
    events: EventSender,
    timing: EngineTiming,
    stop: Arc<AtomicBool>,
    shared: Arc<Mutex<EngineShared>>,
}

impl CaptureRun {
    fn set_state(&self, new: CameraState) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.state != new {
            shared.state = new;
            drop(shared);
            self.events.state(new);
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn run(&mut self) {
        let schedule = self.settings.schedule();
        let min_exposure_ms = self.guard.backend.capabilities().min_exposure_ms;
        let mut monitor = ExposureMonitor::new(
            self.settings.target_brightness,
            self.settings.max_exposure_ms,
        );
        let mut calibrated = false;
        let mut scheduled_idle = false;
        let mut consecutive_errors: u32 = 0;

        self.set_state(CameraState::Capturing);
        self.events.log("capture loop started");

        while !self.stopping() {
            if schedule.is_enabled() {
                if !schedule.contains((self.timing.clock)()) {
                    if !scheduled_idle {
                        info!("outside capture window, disconnecting camera");
                        self.events.log("outside capture window, camera idle");
                        self.guard.backend.disconnect();
                        self.set_state(CameraState::ScheduledIdle);
                        scheduled_idle = true;
                    }
                    interruptible_sleep(&self.stop, self.timing.idle_recheck);
                    continue;
                }
                if scheduled_idle {
                    info!("capture window open, reconnecting camera");
                    self.set_state(CameraState::Connecting);
                    match self.guard.backend.reconnect() {
                        Ok(()) => {
                            scheduled_idle = false;
                            // Light conditions have moved since last night
                            calibrated = false;
                            monitor.reset(None);
                            self.set_state(CameraState::Capturing);
                        }
                        Err(e) => {
                            self.events.error(e);
                            if !self.recover(&mut consecutive_errors) {
                                return;
                            }
                            continue;
                        }
                    }
                }
            }

            if self.settings.auto_exposure && !calibrated {
                match self.calibrate(min_exposure_ms) {
                    Ok(Some(baseline)) => {
                        calibrated = true;
                        monitor.reset(Some(baseline));
                    }
                    Ok(None) => {
                        // Stop requested mid-calibration
                        break;
                    }
                    Err(e) => {
                        if e.is_fatal() {
                            self.fail(e);
                            return;
                        }
                        self.events.error(e);
                        if !self.recover(&mut consecutive_errors) {
                            return;
                        }
                        continue;
                    }
                }
                self.set_state(CameraState::Capturing);
            }

            match self.guard.backend.capture_frame() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    if self.settings.auto_exposure {
                        self.adjust_exposure(&frame, &mut monitor, &mut calibrated);
                    }
                    self.events.frame(frame);
                    interruptible_sleep(&self.stop, self.settings.interval());
                }
                // Directory-watch: nothing new yet; not an error
                Err(CameraError::NoFrameAvailable) => {
                    interruptible_sleep(&self.stop, STOP_POLL);
                }
                Err(e) if e.is_fatal() => {
                    self.fail(e);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "capture failed");
                    self.events.error(e);
                    if !self.recover(&mut consecutive_errors) {
                        return;
                    }
                }
            }
        }

        self.events.log("capture loop stopped");
        self.set_state(CameraState::Disconnected);
        // BackendGuard releases the device when the thread unwinds
    }

    /// One calibration pass; `Ok(Some(brightness))` is the new baseline
    fn calibrate(&mut self, min_exposure_ms: f64) -> Result<Option<f64>, CameraError> {
        self.set_state(CameraState::Calibrating);
        self.events.calibrating(true);
        self.events.log("auto-exposure calibration started");

        let result = self.calibration_loop(min_exposure_ms);

        self.events.calibrating(false);
        match &result {
            Ok(Some(brightness)) => {
                self.events
                    .log(format!("calibration finished at brightness {brightness:.1}"));
            }
            Ok(None) => {}
            Err(e) => self.events.log(format!("calibration aborted: {e}")),
        }
        result
    }

    fn calibration_loop(&mut self, min_exposure_ms: f64) -> Result<Option<f64>, CameraError> {
        let mut calibrator = Calibrator::new(
            self.settings.target_brightness,
            min_exposure_ms,
            self.settings.max_exposure_ms,
        );
        let mut exposure_ms = self.settings.exposure_ms;

        loop {
            if self.stopping() {
                return Ok(None);
            }
            self.apply_exposure(exposure_ms)?;
            let frame = self.guard.backend.capture_frame()?;
            let brightness = frame.brightness(self.settings.brightness_metric);
            let clipped = frame.clipped_percent();

            match calibrator.observe(exposure_ms, brightness, clipped) {
                CalibrationStep::Converged {
                    exposure_ms: converged,
                    brightness,
                    at_max,
                } => {
                    self.settings.exposure_ms = converged;
                    self.apply_exposure(converged)?;
                    if at_max {
                        info!(brightness, "calibration accepted at maximum exposure");
                    }
                    return Ok(Some(brightness));
                }
                CalibrationStep::Retry { next_exposure_ms } => {
                    exposure_ms = next_exposure_ms;
                }
                CalibrationStep::GaveUp {
                    last_exposure_ms,
                    brightness,
                } => {
                    self.settings.exposure_ms = last_exposure_ms;
                    // Non-fatal: capture proceeds at the last exposure
                    self.events.error(CameraError::CalibrationDidNotConverge {
                        attempts: calibrator.attempts(),
                        last_exposure_ms,
                    });
                    return Ok(Some(brightness));
                }
            }
        }
    }

    fn apply_exposure(&mut self, exposure_ms: f64) -> Result<(), CameraError> {
        let mut settings = self.settings.clone();
        settings.exposure_ms = exposure_ms;
        self.guard.backend.configure(&settings)?;
        self.settings.exposure_ms = exposure_ms;
        Ok(())
    }

    fn adjust_exposure(
        &mut self,
        frame: &CapturedFrame,
        monitor: &mut ExposureMonitor,
        calibrated: &mut bool,
    ) {
        let brightness = frame.brightness(self.settings.brightness_metric);
        let clipped = frame.clipped_percent();
        match monitor.observe(brightness, clipped, self.settings.exposure_ms) {
            MonitorAction::Hold => {}
            MonitorAction::Nudge(factor) => {
                let nudged =
                    (self.settings.exposure_ms * factor).min(self.settings.max_exposure_ms);
                if let Err(e) = self.apply_exposure(nudged) {
                    warn!(error = %e, "exposure nudge failed");
                }
            }
            MonitorAction::Recalibrate => {
                self.events.log("brightness changed drastically, recalibrating");
                *calibrated = false;
            }
        }
    }

    /// Backoff and reconnect after a failed iteration
    ///
    /// Returns false when the error budget is spent and the loop must end.
    fn recover(&mut self, consecutive_errors: &mut u32) -> bool {
        *consecutive_errors += 1;
        let Some(backoff) = self.timing.backoff(*consecutive_errors) else {
            self.fail(CameraError::ReconnectExhausted {
                attempts: MAX_CONSECUTIVE_ERRORS,
            });
            return false;
        };

        warn!(
            attempt = *consecutive_errors,
            ?backoff,
            "reconnecting after capture failure"
        );
        self.events.log(format!(
            "reconnect attempt {consecutive_errors} in {backoff:?}"
        ));
        interruptible_sleep(&self.stop, backoff);
        if self.stopping() {
            return false;
        }

        self.set_state(CameraState::Connecting);
        match self.guard.backend.reconnect() {
            Ok(()) => {
                self.set_state(CameraState::Capturing);
                true
            }
            Err(e) => {
                if e.is_fatal() {
                    self.fail(e);
                    return false;
                }
                self.events.error(e);
                // Stay in the loop; the next iteration fails fast and
                // comes back here with a bigger backoff
                true
            }
        }
    }

    /// Terminal failure: report, mark, and let the guard release the device
    fn fail(&mut self, error: CameraError) {
        error!(error = %error, "capture run ended");
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terminal = Some(error.clone());
        self.events.error(error);
        self.set_state(CameraState::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_is_exponential_capped() {
        let secs: Vec<u64> = (1..=5)
            .map(|n| reconnect_backoff(n).unwrap().as_secs())
            .collect();
        assert_eq!(secs, [2, 4, 8, 16, 32]);
        assert_eq!(reconnect_backoff(6), None);
        assert_eq!(reconnect_backoff(0), None);
    }

    #[test]
    fn test_scaled_backoff_keeps_the_sequence() {
        let timing = EngineTiming {
            backoff_unit: Duration::from_millis(1),
            ..Default::default()
        };
        let ms: Vec<u128> = (1..=5)
            .map(|n| timing.backoff(n).unwrap().as_millis())
            .collect();
        assert_eq!(ms, [2, 4, 8, 16, 32]);
        assert_eq!(timing.backoff(0), None);
        assert_eq!(timing.backoff(6), None);
    }

    #[test]
    fn test_status_keeps_the_terminal_error() {
        let exhausted = CameraError::ReconnectExhausted { attempts: 5 };
        assert_eq!(
            status_of(CameraState::Error, Some(exhausted.clone())),
            EngineStatus::Failed(exhausted)
        );
        // A plain stop carries no error
        assert_eq!(status_of(CameraState::Disconnected, None), EngineStatus::Stopped);
        assert_eq!(
            status_of(CameraState::ScheduledIdle, None),
            EngineStatus::ScheduledIdle
        );
        assert_eq!(status_of(CameraState::Capturing, None), EngineStatus::Capturing);
        assert_eq!(status_of(CameraState::Calibrating, None), EngineStatus::Calibrating);
    }

    #[test]
    fn test_capture_once_requires_connection() {
        let mut backend = asi_camera::AsiBackend::simulated(&CameraSettings::default());
        backend.initialize().unwrap();
        assert!(matches!(
            capture_once(&mut backend),
            Err(CameraError::NotConnected)
        ));
        backend.connect(0, None).unwrap();
        assert!(capture_once(&mut backend).is_ok());
    }

    #[test]
    fn test_interruptible_sleep_returns_early_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        interruptible_sleep(&stop, Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
