//! Camera connection and capture states

use serde::{Deserialize, Serialize};

/// Camera connection and capture state
///
/// Exactly one state is active per engine instance. Transitions happen only
/// through the backend/engine methods; every transition is reported through
/// the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraState {
    /// Not connected to any camera
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected but not capturing
    Connected,
    /// Actively capturing frames
    Capturing,
    /// Running auto-exposure calibration
    Calibrating,
    /// Error state (requires reconnection)
    Error,
    /// Device released while outside the scheduled capture window
    ScheduledIdle,
}

impl CameraState {
    /// Whether this state implies an open device handle
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            CameraState::Connected | CameraState::Capturing | CameraState::Calibrating
        )
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CameraState::Disconnected => "disconnected",
            CameraState::Connecting => "connecting",
            CameraState::Connected => "connected",
            CameraState::Capturing => "capturing",
            CameraState::Calibrating => "calibrating",
            CameraState::Error => "error",
            CameraState::ScheduledIdle => "scheduled idle",
        };
        f.write_str(s)
    }
}
