//! Capture loop scenarios over the simulated driver and the file backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use asi_camera::{AsiBackend, SimulatedAsiDriver};
use camera_backend::{CameraBackend, FileWatchBackend};
use camera_core::{BrightnessMetric, CameraError, CameraSettings, CameraState};
use capture_engine::{
    channel, CaptureEngine, CaptureEvent, EngineStatus, EngineTiming, MAX_CONSECUTIVE_ERRORS,
};

/// Collect events until one matches, panicking on timeout
fn wait_for(
    rx: &Receiver<CaptureEvent>,
    timeout: Duration,
    pred: impl Fn(&CaptureEvent) -> bool,
) -> Vec<CaptureEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("timed out; events so far: {seen:?}"));
        let event = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("timed out; events so far: {seen:?}"));
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn connected_sim_backend(
    settings: &CameraSettings,
    driver: SimulatedAsiDriver,
) -> Box<dyn CameraBackend> {
    let mut backend = AsiBackend::with_driver(Box::new(driver), settings);
    backend.initialize().unwrap();
    backend.connect(0, None).unwrap();
    Box::new(backend)
}

#[test]
fn test_auto_exposure_converges_before_first_frame() {
    let mut settings = CameraSettings::default();
    settings.auto_exposure = true;
    settings.target_brightness = 100.0;
    settings.max_exposure_ms = 30_000.0;
    settings.exposure_ms = 100.0;
    settings.interval_secs = 0.05;

    let driver =
        SimulatedAsiDriver::new().with_brightness_model(|exposure_ms| (exposure_ms / 10.0).min(100.0));
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(backend, settings, tx);

    let events = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, CaptureEvent::Frame(_))
    });

    let calibration_started = events
        .iter()
        .position(|e| matches!(e, CaptureEvent::Calibrating(true)))
        .expect("calibration never started");
    let calibration_finished = events
        .iter()
        .position(|e| matches!(e, CaptureEvent::Calibrating(false)))
        .expect("calibration never finished");
    assert!(calibration_started < calibration_finished);

    let CaptureEvent::Frame(frame) = events.last().unwrap() else {
        unreachable!();
    };
    let brightness = frame.brightness(BrightnessMetric::default());
    assert!(
        (brightness - 100.0).abs() <= 20.0,
        "converged brightness {brightness}"
    );

    engine.stop();
    assert!(!engine.is_running());
}

#[test]
fn test_transient_exposure_failure_recovers() {
    let mut settings = CameraSettings::default();
    settings.exposure_ms = 1.0;
    settings.interval_secs = 0.05;

    let mut driver = SimulatedAsiDriver::new().with_brightness_model(|_| 80.0);
    driver.fail_next_exposures(1);
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(backend, settings, tx);

    // First capture fails, then a backoff plus reconnect, then a frame
    let events = wait_for(&rx, Duration::from_secs(15), |e| {
        matches!(e, CaptureEvent::Frame(_))
    });
    assert!(
        events
            .iter()
            .any(|e| matches!(e, CaptureEvent::Error(CameraError::ExposureFailed(_)))),
        "expected the failed exposure to be reported: {events:?}"
    );

    engine.stop();
    assert_eq!(engine.state(), CameraState::Disconnected);
}

#[test]
fn test_stop_halts_loop_and_releases_device() {
    let mut settings = CameraSettings::default();
    settings.exposure_ms = 1.0;
    settings.interval_secs = 5.0; // long interval; stop must interrupt it

    let driver = SimulatedAsiDriver::new().with_brightness_model(|_| 80.0);
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(backend, settings, tx);
    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, CaptureEvent::Frame(_))
    });

    let stopped_at = Instant::now();
    engine.stop();
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert!(!engine.is_running());
    assert_eq!(engine.state(), CameraState::Disconnected);
}

#[test]
fn test_persistent_failures_exhaust_reconnects() {
    let mut settings = CameraSettings::default();
    settings.exposure_ms = 1.0;
    settings.interval_secs = 0.01;

    let mut driver = SimulatedAsiDriver::new().with_brightness_model(|_| 80.0);
    driver.fail_next_exposures(50);
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut engine =
        CaptureEngine::start_with_timing(backend, settings, tx, EngineTiming::immediate());

    let events = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, CaptureEvent::Error(CameraError::ReconnectExhausted { .. }))
    });

    // Five reconnects are granted; the failure after the fifth ends the run
    let failures = events
        .iter()
        .filter(|e| matches!(e, CaptureEvent::Error(CameraError::ExposureFailed(_))))
        .count() as u32;
    assert_eq!(failures, MAX_CONSECUTIVE_ERRORS + 1, "events: {events:?}");
    assert!(
        !events.iter().any(|e| matches!(e, CaptureEvent::Frame(_))),
        "no frame should slip through: {events:?}"
    );

    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(engine.state(), CameraState::Error);
    assert_eq!(
        engine.status(),
        EngineStatus::Failed(CameraError::ReconnectExhausted {
            attempts: MAX_CONSECUTIVE_ERRORS
        })
    );
}

static WINDOW_OPEN: AtomicBool = AtomicBool::new(false);

fn scripted_clock() -> chrono::NaiveTime {
    let hhmm = if WINDOW_OPEN.load(Ordering::SeqCst) {
        "22:00"
    } else {
        "12:00"
    };
    chrono::NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
}

#[test]
fn test_schedule_reentry_reconnects_and_recalibrates() {
    WINDOW_OPEN.store(false, Ordering::SeqCst);

    let mut settings = CameraSettings::default();
    settings.exposure_ms = 1.0;
    settings.interval_secs = 0.01;
    settings.auto_exposure = true;
    settings.target_brightness = 100.0;
    settings.scheduled_capture_enabled = true;
    settings.scheduled_start_time = "21:00".into();
    settings.scheduled_end_time = "23:00".into();

    let driver =
        SimulatedAsiDriver::new().with_brightness_model(|exposure_ms| (exposure_ms * 10.0).min(255.0));
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut timing = EngineTiming::immediate();
    timing.clock = scripted_clock;
    let mut engine = CaptureEngine::start_with_timing(backend, settings, tx, timing);

    // Daytime: the engine parks and releases the device
    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, CaptureEvent::State(CameraState::ScheduledIdle))
    });
    assert_eq!(engine.status(), EngineStatus::ScheduledIdle);

    // Nightfall: the window opens and capture resumes
    WINDOW_OPEN.store(true, Ordering::SeqCst);
    let events = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, CaptureEvent::Frame(_))
    });
    assert!(
        events
            .iter()
            .any(|e| matches!(e, CaptureEvent::State(CameraState::Connecting))),
        "reopening the window must reconnect: {events:?}"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, CaptureEvent::Calibrating(true))),
        "reopening the window must recalibrate: {events:?}"
    );

    engine.stop();
    assert_eq!(engine.state(), CameraState::Disconnected);
}

#[test]
fn test_outside_schedule_goes_idle_and_disconnects() {
    let now = chrono::Local::now();
    let fmt = |offset_hours: i64| {
        (now + chrono::Duration::hours(offset_hours))
            .format("%H:%M")
            .to_string()
    };

    let mut settings = CameraSettings::default();
    settings.exposure_ms = 1.0;
    settings.interval_secs = 0.05;
    settings.scheduled_capture_enabled = true;
    // A window one hour away never contains "now"
    settings.scheduled_start_time = fmt(1);
    settings.scheduled_end_time = fmt(2);

    let driver = SimulatedAsiDriver::new().with_brightness_model(|_| 80.0);
    let backend = connected_sim_backend(&settings, driver);

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(backend, settings, tx);

    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, CaptureEvent::State(CameraState::ScheduledIdle))
    });
    assert_eq!(engine.state(), CameraState::ScheduledIdle);

    engine.stop();
}

#[test]
fn test_file_backend_waits_without_erroring() {
    let dir = std::env::temp_dir().join(format!("engine-watch-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let mut settings = CameraSettings::default();
    settings.watch_directory = Some(dir.clone());
    settings.interval_secs = 0.05;

    let mut backend = FileWatchBackend::new(&settings);
    backend.initialize().unwrap();
    backend.connect(0, None).unwrap();

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(Box::new(backend), settings, tx);

    // Drop an image in after the loop has already gone around empty-handed
    let image_dir = dir.clone();
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(700));
        image::RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90]))
            .save(image_dir.join("capture.png"))
            .unwrap();
    });

    let events = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, CaptureEvent::Frame(_))
    });
    assert!(
        !events.iter().any(|e| matches!(e, CaptureEvent::Error(_))),
        "empty directory polls must not surface errors: {events:?}"
    );

    writer.join().unwrap();
    engine.stop();
    let _ = std::fs::remove_dir_all(dir);
}
