//! Headless capture runner
//!
//! Drives the capture engine from the command line: picks a backend from a
//! settings file, connects, and logs every event the engine emits. Useful
//! on observatory hosts with no display and for soak-testing a camera
//! overnight.
//!
//! ```text
//! allsky-capture --settings settings.json [--auto-stop 600]
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camera_backend::CameraBackend;
use camera_core::{CameraError, CameraSettings};
use capture_engine::{channel, create_from_settings, CaptureEngine, CaptureEvent};

struct Args {
    settings_path: Option<PathBuf>,
    auto_stop: Option<Duration>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        settings_path: None,
        auto_stop: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--settings" => {
                let value = iter.next().context("--settings requires a path")?;
                args.settings_path = Some(PathBuf::from(value));
            }
            "--auto-stop" => {
                let value = iter.next().context("--auto-stop requires seconds")?;
                let secs: u64 = value.parse().context("--auto-stop wants a whole number")?;
                args.auto_stop = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => {
                println!("usage: allsky-capture [--settings <file.json>] [--auto-stop <secs>]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn load_settings(path: Option<&PathBuf>) -> Result<CameraSettings> {
    let Some(path) = path else {
        info!("no settings file given, using defaults");
        return Ok(CameraSettings::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read settings file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("invalid settings in {}", path.display()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    info!("=== Allsky Capture v{} ===", env!("CARGO_PKG_VERSION"));

    let args = parse_args()?;
    let settings = load_settings(args.settings_path.as_ref())?;

    let mut backend = create_from_settings(&settings)?;
    backend.initialize()?;

    let detected = backend.detect()?;
    if detected.is_empty() {
        bail!("no cameras found for backend '{}'", settings.capture_mode);
    }
    for info in &detected {
        info!(camera = %info, "detected");
    }

    // Prefer the configured camera name, else the first device
    let index = settings
        .camera_name
        .as_deref()
        .and_then(|name| detected.iter().position(|i| i.name == name))
        .unwrap_or(0);
    backend.connect(index, Some(&settings))?;
    info!(camera = %detected[index], "connected");

    let (tx, rx) = channel();
    let mut engine = CaptureEngine::start(backend, settings, tx);

    let deadline = args.auto_stop.map(|d| Instant::now() + d);
    let exit = drain_events(&rx, deadline);

    engine.stop();
    info!(status = ?engine.status(), "capture stopped");
    exit
}

/// Log events until the engine dies, the channel closes or the deadline hits
fn drain_events(
    rx: &std::sync::mpsc::Receiver<CaptureEvent>,
    deadline: Option<Instant>,
) -> Result<()> {
    let mut frames: u64 = 0;
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                info!(frames, "auto-stop deadline reached");
                return Ok(());
            }
        }
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(CaptureEvent::Frame(frame)) => {
                frames += 1;
                info!(
                    frames,
                    resolution = frame.metadata.get("RES").map(String::as_str).unwrap_or("?"),
                    brightness = frame
                        .metadata
                        .get("BRIGHTNESS")
                        .map(String::as_str)
                        .unwrap_or("?"),
                    "frame captured"
                );
            }
            Ok(CaptureEvent::Error(e)) => {
                if matches!(
                    e,
                    CameraError::ReconnectExhausted { .. } | CameraError::SdkUnavailable { .. }
                ) {
                    error!(error = %e, "capture run is over");
                    bail!("capture failed: {e}");
                }
                warn!(error = %e, "capture error");
            }
            Ok(CaptureEvent::Log(message)) => info!("{message}"),
            Ok(CaptureEvent::State(state)) => info!(%state, "state changed"),
            Ok(CaptureEvent::Calibrating(active)) => {
                info!(active, "auto-exposure calibration");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            // Engine thread is gone; its last events are already drained
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}
