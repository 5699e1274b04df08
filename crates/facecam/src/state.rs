//! State shared between the dashboard and the capture worker.

use actix_web::web::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

pub const MSG_CAMERA_UNAVAILABLE: &str =
    "Unable to access the webcam. Make sure it is connected and try again.";
pub const MSG_STOP_HINT: &str = "Press 'q' to stop the webcam.";
pub const MSG_READ_FAILED: &str = "Failed to read frame from webcam.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerLevel {
    Info,
    Success,
    Error,
}

/// A status message shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub level: BannerLevel,
    pub message: String,
}

impl Banner {
    pub fn new(level: BannerLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// What `GET /api/status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub frames: u64,
    pub banners: Vec<Banner>,
}

/// The "Start Webcam" flag, session banners and the latest annotated frame.
///
/// Startup banners (provisioning results) persist; session banners are
/// replaced whenever a new session begins.
pub struct LiveState {
    running: AtomicBool,
    frames: AtomicU64,
    startup: Vec<Banner>,
    session: Mutex<Vec<Banner>>,
    latest: watch::Sender<Option<Bytes>>,
}

impl LiveState {
    pub fn new(startup: Vec<Banner>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            running: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            startup,
            session: Mutex::new(Vec::new()),
            latest,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip the flag on. Returns false if a session is already running.
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Flip the flag off. The worker exits after its current frame.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reset per-session state at the start of a capture session.
    pub fn begin_session(&self) {
        self.session_banners().clear();
        self.frames.store(0, Ordering::SeqCst);
    }

    pub fn push_banner(&self, level: BannerLevel, message: impl Into<String>) {
        self.session_banners().push(Banner::new(level, message));
    }

    /// Replace the latest frame.
    pub fn publish(&self, jpeg: Bytes) {
        self.latest.send_replace(Some(jpeg));
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    pub fn latest_frame(&self) -> Option<Bytes> {
        self.latest.borrow().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let mut banners = self.startup.clone();
        banners.extend(self.session_banners().iter().cloned());
        StatusSnapshot {
            running: self.is_running(),
            frames: self.frames.load(Ordering::SeqCst),
            banners,
        }
    }

    fn session_banners(&self) -> MutexGuard<'_, Vec<Banner>> {
        // A panic while holding the lock leaves a plain Vec behind; keep using it.
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_start_is_exclusive() {
        let state = LiveState::new(Vec::new());
        assert!(state.try_start());
        assert!(!state.try_start());
        state.request_stop();
        assert!(!state.is_running());
        assert!(state.try_start());
    }

    #[test]
    fn test_begin_session_keeps_startup_banners() {
        let downloaded = Banner::new(BannerLevel::Success, "det_10g.onnx downloaded");
        let state = LiveState::new(vec![downloaded.clone()]);
        state.push_banner(BannerLevel::Error, MSG_READ_FAILED);
        assert_eq!(state.snapshot().banners.len(), 2);

        state.begin_session();
        let banners = state.snapshot().banners;
        assert_eq!(banners, vec![downloaded]);
    }

    #[test]
    fn test_publish_replaces_latest_frame() {
        let state = LiveState::new(Vec::new());
        assert!(state.latest_frame().is_none());

        state.publish(Bytes::from_static(b"one"));
        state.publish(Bytes::from_static(b"two"));
        assert_eq!(state.latest_frame().as_deref(), Some(&b"two"[..]));
        assert_eq!(state.snapshot().frames, 2);
    }

    #[test]
    fn test_banner_serializes_lowercase_level() {
        let json = serde_json::to_value(Banner::new(BannerLevel::Info, MSG_STOP_HINT)).unwrap();
        assert_eq!(json["level"], "info");
        assert_eq!(json["message"], "Press 'q' to stop the webcam.");
    }
}
