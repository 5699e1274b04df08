use crate::state::{BannerLevel, LiveState, MSG_CAMERA_UNAVAILABLE, MSG_READ_FAILED, MSG_STOP_HINT};
use actix_web::web::Bytes;
use facecam_core::{ChannelOrder, Frame, FrameAnnotator, Recogniser};
use facecam_hw::{CameraError, FrameSource};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture thread exited")]
    ChannelClosed,
}

/// Why a capture session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The camera could not be opened; the loop never ran.
    CameraUnavailable,
    /// The run flag was cleared.
    Stopped,
    ReadFailed,
    AnnotateFailed,
    EncodeFailed,
}

/// Messages sent from dashboard handlers to the capture thread.
enum CaptureRequest {
    Start,
}

/// Clone-safe handle to the capture thread.
#[derive(Clone)]
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureRequest>,
}

impl CaptureHandle {
    /// Ask the worker to run a session. The caller sets the run flag first.
    ///
    /// A start already waiting in the queue satisfies the request.
    pub fn start(&self) -> Result<(), EngineError> {
        match self.tx.try_send(CaptureRequest::Start) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("start request already queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::ChannelClosed),
        }
    }
}

/// Spawn the capture worker on a dedicated OS thread.
///
/// The worker owns the annotator (and so the ONNX sessions) and opens a fresh
/// camera through `open` for every session.
pub fn spawn_capture_worker<R, S, F>(
    mut annotator: FrameAnnotator<R>,
    mut open: F,
    state: Arc<LiveState>,
    jpeg_quality: u8,
) -> Result<CaptureHandle, EngineError>
where
    R: Recogniser + Send + 'static,
    S: FrameSource,
    F: FnMut() -> Result<S, CameraError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CaptureRequest>(1);

    std::thread::Builder::new()
        .name("facecam-capture".into())
        .spawn(move || {
            tracing::info!("capture thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    CaptureRequest::Start => {
                        if !state.is_running() {
                            tracing::debug!("stale start request, skipping");
                            continue;
                        }
                        let outcome = run_session(&mut open, &mut annotator, &state, jpeg_quality);
                        tracing::info!(?outcome, "capture session ended");
                    }
                }
            }
            tracing::info!("capture thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(CaptureHandle { tx })
}

/// Run one capture session until the run flag clears or a frame fails.
///
/// The camera is dropped, and so released, before this returns. A failed
/// session clears the run flag; a stopped one leaves it to the dashboard, so a
/// start that lands after the loop exits is picked up by the queued request.
pub fn run_session<R, S, F>(
    open: &mut F,
    annotator: &mut FrameAnnotator<R>,
    state: &LiveState,
    jpeg_quality: u8,
) -> SessionOutcome
where
    R: Recogniser,
    S: FrameSource,
    F: FnMut() -> Result<S, CameraError>,
{
    state.begin_session();

    let mut source = match open() {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "failed to open camera");
            state.push_banner(BannerLevel::Error, MSG_CAMERA_UNAVAILABLE);
            state.request_stop();
            return SessionOutcome::CameraUnavailable;
        }
    };
    state.push_banner(BannerLevel::Info, MSG_STOP_HINT);

    let outcome = capture_loop(&mut source, annotator, state, jpeg_quality);
    if outcome != SessionOutcome::Stopped {
        state.request_stop();
    }
    drop(source);
    outcome
}

fn capture_loop<R: Recogniser, S: FrameSource>(
    source: &mut S,
    annotator: &mut FrameAnnotator<R>,
    state: &LiveState,
    jpeg_quality: u8,
) -> SessionOutcome {
    while state.is_running() {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "frame read failed");
                state.push_banner(BannerLevel::Error, MSG_READ_FAILED);
                return SessionOutcome::ReadFailed;
            }
        };

        let annotated = match annotator.annotate(frame) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "annotation failed");
                state.push_banner(BannerLevel::Error, format!("Face recognition failed: {e}"));
                return SessionOutcome::AnnotateFailed;
            }
        };

        match encode_jpeg(annotated, jpeg_quality) {
            Ok(jpeg) => state.publish(jpeg),
            Err(e) => {
                tracing::error!(error = %e, "jpeg encoding failed");
                state.push_banner(BannerLevel::Error, format!("Failed to encode frame: {e}"));
                return SessionOutcome::EncodeFailed;
            }
        }
    }
    SessionOutcome::Stopped
}

/// Convert to RGB for display and encode as JPEG.
pub fn encode_jpeg(frame: Frame, quality: u8) -> Result<Bytes, image::ImageError> {
    let frame = frame.into_order(ChannelOrder::Rgb);
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecam_core::{Face, FaceBox, Prediction, RecogniserError};
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Counts calls; reports one face on every frame.
    #[derive(Clone, Default)]
    struct CountingRecogniser {
        calls: Arc<AtomicUsize>,
    }

    impl Recogniser for CountingRecogniser {
        fn recognise(&mut self, _image: &RgbImage) -> Result<Vec<Face>, RecogniserError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prediction = Prediction {
                label: "alice".into(),
                confidence: 0.9,
            };
            Ok(vec![Face {
                bb: FaceBox {
                    left: 2,
                    top: 2,
                    right: 10,
                    bottom: 10,
                },
                top_prediction: prediction.clone(),
                all_predictions: vec![prediction],
            }])
        }
    }

    /// Solid blue BGR frames. Clears the run flag after `stop_after` reads,
    /// the way the dashboard toggle would, and fails reads past `fail_after`.
    /// With `restart_on_drop` the flag is set again as the camera is released.
    struct FakeSource {
        reads: usize,
        stop_after: Option<usize>,
        fail_after: Option<usize>,
        restart_on_drop: bool,
        state: Arc<LiveState>,
        released: Arc<AtomicBool>,
    }

    impl FakeSource {
        fn new(state: &Arc<LiveState>, released: &Arc<AtomicBool>) -> Self {
            Self {
                reads: 0,
                stop_after: None,
                fail_after: None,
                restart_on_drop: false,
                state: Arc::clone(state),
                released: Arc::clone(released),
            }
        }
    }

    impl FrameSource for FakeSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if self.fail_after.is_some_and(|n| self.reads >= n) {
                return Err(CameraError::CaptureFailed("device unplugged".into()));
            }
            self.reads += 1;
            if self.stop_after.is_some_and(|n| self.reads >= n) {
                self.state.request_stop();
            }
            let data = [255u8, 0, 0].repeat(32 * 32);
            Ok(Frame::new(data, 32, 32, ChannelOrder::Bgr).unwrap())
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            if self.restart_on_drop {
                self.state.try_start();
            }
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn annotator() -> (FrameAnnotator<CountingRecogniser>, Arc<AtomicUsize>) {
        let recogniser = CountingRecogniser::default();
        let calls = Arc::clone(&recogniser.calls);
        (FrameAnnotator::new(recogniser), calls)
    }

    fn messages(state: &LiveState) -> Vec<String> {
        state.snapshot().banners.into_iter().map(|b| b.message).collect()
    }

    #[test]
    fn test_unavailable_camera_never_enters_loop() {
        let state = Arc::new(LiveState::new(Vec::new()));
        assert!(state.try_start());
        let (mut annotator, calls) = annotator();

        let mut open = || -> Result<FakeSource, CameraError> {
            Err(CameraError::DeviceNotFound("/dev/video0".into()))
        };
        let outcome = run_session(&mut open, &mut annotator, &state, 80);

        assert_eq!(outcome, SessionOutcome::CameraUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!state.is_running());
        assert_eq!(messages(&state), vec![MSG_CAMERA_UNAVAILABLE.to_string()]);
        assert!(state.latest_frame().is_none());
    }

    #[test]
    fn test_clearing_flag_stops_and_releases_camera() {
        let state = Arc::new(LiveState::new(Vec::new()));
        assert!(state.try_start());
        let released = Arc::new(AtomicBool::new(false));
        let (mut annotator, calls) = annotator();

        let mut open = || {
            let mut source = FakeSource::new(&state, &released);
            source.stop_after = Some(3);
            Ok(source)
        };
        let outcome = run_session(&mut open, &mut annotator, &state, 80);

        assert_eq!(outcome, SessionOutcome::Stopped);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.snapshot().frames, 3);
        assert_eq!(messages(&state), vec![MSG_STOP_HINT.to_string()]);
    }

    #[test]
    fn test_published_frame_is_rgb_jpeg() {
        let state = Arc::new(LiveState::new(Vec::new()));
        assert!(state.try_start());
        let released = Arc::new(AtomicBool::new(false));
        let (mut annotator, _) = annotator();

        let mut open = || {
            let mut source = FakeSource::new(&state, &released);
            source.stop_after = Some(1);
            Ok(source)
        };
        run_session(&mut open, &mut annotator, &state, 95);

        let jpeg = state.latest_frame().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().into_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        // Blue in BGR stays blue once displayed (away from the green box).
        let px = decoded.get_pixel(28, 28);
        assert!(px[2] > 200 && px[0] < 60, "unexpected pixel {px:?}");
    }

    #[test]
    fn test_read_failure_ends_session() {
        let state = Arc::new(LiveState::new(Vec::new()));
        assert!(state.try_start());
        let released = Arc::new(AtomicBool::new(false));
        let (mut annotator, calls) = annotator();

        let mut open = || {
            let mut source = FakeSource::new(&state, &released);
            source.fail_after = Some(2);
            Ok(source)
        };
        let outcome = run_session(&mut open, &mut annotator, &state, 80);

        assert_eq!(outcome, SessionOutcome::ReadFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!state.is_running());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(
            messages(&state),
            vec![MSG_STOP_HINT.to_string(), MSG_READ_FAILED.to_string()]
        );
    }

    #[test]
    fn test_new_session_clears_previous_banners() {
        let state = Arc::new(LiveState::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));
        let (mut annotator, _) = annotator();

        assert!(state.try_start());
        let mut failing = || -> Result<FakeSource, CameraError> {
            Err(CameraError::DeviceBusy("/dev/video0".into()))
        };
        run_session(&mut failing, &mut annotator, &state, 80);

        assert!(state.try_start());
        let mut open = || {
            let mut source = FakeSource::new(&state, &released);
            source.stop_after = Some(1);
            Ok(source)
        };
        run_session(&mut open, &mut annotator, &state, 80);
        assert_eq!(messages(&state), vec![MSG_STOP_HINT.to_string()]);
    }

    #[test]
    fn test_worker_runs_session_on_start() {
        let state = Arc::new(LiveState::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));
        let (annotator, calls) = annotator();

        let worker_state = Arc::clone(&state);
        let worker_released = Arc::clone(&released);
        let open = move || {
            let mut source = FakeSource::new(&worker_state, &worker_released);
            source.stop_after = Some(2);
            Ok(source)
        };
        let handle = spawn_capture_worker(annotator, open, Arc::clone(&state), 80).unwrap();

        assert!(state.try_start());
        handle.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(released.load(Ordering::SeqCst));
        assert!(!state.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_after_loop_exit_keeps_flag() {
        let state = Arc::new(LiveState::new(Vec::new()));
        assert!(state.try_start());
        let released = Arc::new(AtomicBool::new(false));
        let (mut annotator, _) = annotator();

        let mut open = || {
            let mut source = FakeSource::new(&state, &released);
            source.stop_after = Some(1);
            source.restart_on_drop = true;
            Ok(source)
        };
        let outcome = run_session(&mut open, &mut annotator, &state, 80);

        assert_eq!(outcome, SessionOutcome::Stopped);
        assert!(released.load(Ordering::SeqCst));
        assert!(state.is_running());
    }

    #[test]
    fn test_start_with_request_already_queued_succeeds() {
        let (tx, rx) = mpsc::channel(1);
        let handle = CaptureHandle { tx };
        handle.start().unwrap();
        handle.start().unwrap();

        drop(rx);
        assert!(matches!(handle.start(), Err(EngineError::ChannelClosed)));
    }
}
