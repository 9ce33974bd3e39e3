//! Backend selection and construction

use std::str::FromStr;

use tracing::{debug, warn};

use asi_camera::AsiBackend;
use camera_backend::{AscomBackend, CameraBackend, FileWatchBackend};
use camera_core::{CameraError, CameraInfo, CameraSettings};

/// The backend families the factory can build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// ZWO ASI camera through the vendor SDK
    Asi,
    /// Directory-watch pseudo-camera
    File,
    /// ASCOM/Alpaca placeholder
    Ascom,
    /// Simulated ASI camera, for development without hardware
    Simulated,
}

impl FromStr for BackendKind {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zwo" | "asi" | "camera" => Ok(BackendKind::Asi),
            "file" | "watch" | "directory" => Ok(BackendKind::File),
            "ascom" | "alpaca" => Ok(BackendKind::Ascom),
            "sim" | "dev" | "simulated" => Ok(BackendKind::Simulated),
            other => Err(CameraError::UnknownBackend(other.to_string())),
        }
    }
}

/// Spellings accepted in `capture_mode`, canonical name first
pub fn available_backends() -> &'static [&'static str] {
    &["camera", "watch", "ascom", "sim"]
}

/// Build a backend of the given kind
pub fn create_backend(kind: BackendKind, settings: &CameraSettings) -> Box<dyn CameraBackend> {
    debug!(?kind, "creating camera backend");
    match kind {
        BackendKind::Asi => Box::new(AsiBackend::new(settings)),
        BackendKind::File => Box::new(FileWatchBackend::new(settings)),
        BackendKind::Ascom => Box::new(AscomBackend::new(settings)),
        BackendKind::Simulated => Box::new(AsiBackend::simulated(settings)),
    }
}

/// Build the backend named by `capture_mode`
pub fn create_from_settings(
    settings: &CameraSettings,
) -> Result<Box<dyn CameraBackend>, CameraError> {
    let kind = settings.capture_mode.parse()?;
    Ok(create_backend(kind, settings))
}

/// Run detection across every real backend family
///
/// Backends that fail to initialize (typically a missing SDK) contribute
/// nothing rather than failing the whole pass.
pub fn detect_all(settings: &CameraSettings) -> Vec<CameraInfo> {
    let mut found = Vec::new();
    for kind in [BackendKind::Asi, BackendKind::File, BackendKind::Ascom] {
        let mut backend = create_backend(kind, settings);
        if let Err(e) = backend.initialize() {
            debug!(?kind, error = %e, "backend unavailable, skipping detection");
            continue;
        }
        match backend.detect() {
            Ok(mut infos) => found.append(&mut infos),
            Err(e) => warn!(?kind, error = %e, "detection failed"),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_aliases() {
        assert_eq!("zwo".parse::<BackendKind>().unwrap(), BackendKind::Asi);
        assert_eq!("ASI".parse::<BackendKind>().unwrap(), BackendKind::Asi);
        assert_eq!("camera".parse::<BackendKind>().unwrap(), BackendKind::Asi);
        assert_eq!("watch".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!(
            "directory".parse::<BackendKind>().unwrap(),
            BackendKind::File
        );
        assert_eq!("alpaca".parse::<BackendKind>().unwrap(), BackendKind::Ascom);
        assert_eq!(
            "sim".parse::<BackendKind>().unwrap(),
            BackendKind::Simulated
        );
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        let err = "gphoto".parse::<BackendKind>().unwrap_err();
        assert_eq!(err, CameraError::UnknownBackend("gphoto".into()));
    }

    #[test]
    fn test_create_from_settings_uses_capture_mode() {
        let mut settings = CameraSettings::default();
        settings.capture_mode = "sim".into();
        let mut backend = create_from_settings(&settings).unwrap();
        backend.initialize().unwrap();
        assert_eq!(backend.capabilities().backend_name, "ASI");
    }
}
