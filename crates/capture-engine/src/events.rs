//! Events emitted by the capture loop
//!
//! Consumers receive everything over one mpsc channel instead of
//! registering callbacks, so slow consumers never stall the capture thread
//! and a dropped receiver just means events go nowhere.

use std::sync::mpsc;

use camera_core::{CameraError, CameraState, CapturedFrame};

/// Everything the capture loop tells the outside world
#[derive(Debug)]
pub enum CaptureEvent {
    /// A frame was captured
    Frame(Box<CapturedFrame>),
    /// A non-fatal or fatal error occurred (fatal errors end the loop)
    Error(CameraError),
    /// Human-readable progress message
    Log(String),
    /// The engine's state changed
    State(CameraState),
    /// Auto-exposure calibration started (`true`) or finished (`false`)
    Calibrating(bool),
}

/// Sending half, cloneable across the engine's internals
///
/// Sends never fail from the engine's point of view; a disconnected
/// receiver silently discards.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<CaptureEvent>,
}

impl EventSender {
    pub fn send(&self, event: CaptureEvent) {
        let _ = self.tx.send(event);
    }

    pub fn frame(&self, frame: CapturedFrame) {
        self.send(CaptureEvent::Frame(Box::new(frame)));
    }

    pub fn error(&self, error: CameraError) {
        self.send(CaptureEvent::Error(error));
    }

    pub fn log(&self, message: impl Into<String>) {
        self.send(CaptureEvent::Log(message.into()));
    }

    pub fn state(&self, state: CameraState) {
        self.send(CaptureEvent::State(state));
    }

    pub fn calibrating(&self, active: bool) {
        self.send(CaptureEvent::Calibrating(active));
    }
}

/// A fresh event channel
pub fn channel() -> (EventSender, mpsc::Receiver<CaptureEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        tx.log("nobody listening");
        tx.state(CameraState::Connected);
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = channel();
        tx.calibrating(true);
        tx.log("step");
        tx.calibrating(false);
        assert!(matches!(rx.recv().unwrap(), CaptureEvent::Calibrating(true)));
        assert!(matches!(rx.recv().unwrap(), CaptureEvent::Log(_)));
        assert!(matches!(rx.recv().unwrap(), CaptureEvent::Calibrating(false)));
    }
}
