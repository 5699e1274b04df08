//! Browser dashboard: the page, webcam toggle, status and latest frame.

use crate::engine::CaptureHandle;
use crate::state::{BannerLevel, LiveState, StatusSnapshot};
use actix_web::{
    http::header,
    web::{self, Data, Json},
    App, HttpResponse, HttpServer, Scope,
};
use serde::Deserialize;
use std::sync::Arc;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Shared by every handler.
pub struct Dashboard {
    pub state: Arc<LiveState>,
    pub capture: CaptureHandle,
}

#[derive(Debug, Deserialize)]
pub struct WebcamToggle {
    pub running: bool,
}

pub fn scope() -> Scope {
    web::scope("/api")
        .service(web::resource("/status").route(web::get().to(status)))
        .service(web::resource("/webcam").route(web::post().to(toggle_webcam)))
        .service(web::resource("/frame.jpg").route(web::get().to(latest_frame)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(scope());
}

async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn status(dashboard: Data<Dashboard>) -> Json<StatusSnapshot> {
    Json(dashboard.state.snapshot())
}

async fn toggle_webcam(
    dashboard: Data<Dashboard>,
    request: Json<WebcamToggle>,
) -> Json<StatusSnapshot> {
    let state = &dashboard.state;
    if request.running {
        if state.try_start() {
            tracing::info!("webcam start requested");
            if let Err(e) = dashboard.capture.start() {
                tracing::error!(error = %e, "failed to hand start request to capture thread");
                state.request_stop();
                state.push_banner(BannerLevel::Error, format!("Unable to start capture: {e}"));
            }
        }
    } else if state.is_running() {
        tracing::info!("webcam stop requested");
        state.request_stop();
    }
    Json(state.snapshot())
}

async fn latest_frame(dashboard: Data<Dashboard>) -> HttpResponse {
    match dashboard.state.latest_frame() {
        Some(jpeg) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Serve the dashboard until the server is shut down (Ctrl-C).
pub async fn serve(bind: &str, port: u16, dashboard: Dashboard) -> std::io::Result<()> {
    let dashboard = Data::new(dashboard);
    tracing::info!("dashboard listening on http://{bind}:{port}/");
    HttpServer::new(move || App::new().app_data(dashboard.clone()).configure(configure))
        .workers(2)
        .bind((bind, port))?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_capture_worker;
    use crate::state::MSG_CAMERA_UNAVAILABLE;
    use actix_web::{http::StatusCode, test};
    use facecam_core::{ChannelOrder, Face, Frame, FrameAnnotator, Recogniser, RecogniserError};
    use facecam_hw::{CameraError, FrameSource};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct NoFaces;

    impl Recogniser for NoFaces {
        fn recognise(&mut self, _image: &RgbImage) -> Result<Vec<Face>, RecogniserError> {
            Ok(Vec::new())
        }
    }

    struct NoCamera;

    impl FrameSource for NoCamera {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            Err(CameraError::CaptureFailed("unreachable".into()))
        }
    }

    /// A camera that takes `delay` per frame. `open` counts live handles.
    struct SlowCamera {
        delay: Duration,
        open: Arc<AtomicUsize>,
    }

    impl FrameSource for SlowCamera {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            std::thread::sleep(self.delay);
            Ok(Frame::new(vec![0; 8 * 8 * 3], 8, 8, ChannelOrder::Bgr).unwrap())
        }
    }

    impl Drop for SlowCamera {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn dashboard() -> Data<Dashboard> {
        let state = Arc::new(LiveState::new(Vec::new()));
        let open = || -> Result<NoCamera, CameraError> {
            Err(CameraError::DeviceNotFound("/dev/video0".into()))
        };
        let capture =
            spawn_capture_worker(FrameAnnotator::new(NoFaces), open, Arc::clone(&state), 80)
                .unwrap();
        Data::new(Dashboard { state, capture })
    }

    fn toggle(running: bool) -> actix_web::test::TestRequest {
        test::TestRequest::post()
            .uri("/api/webcam")
            .set_json(serde_json::json!({ "running": running }))
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[actix_web::test]
    async fn test_index_serves_page() {
        let app = test::init_service(App::new().app_data(dashboard()).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let html = std::str::from_utf8(&body).unwrap();
        assert!(html.contains("Live Face Recognition"));
        assert!(html.contains("Start Webcam"));
    }

    #[actix_web::test]
    async fn test_frame_before_first_capture_is_no_content() {
        let app = test::init_service(App::new().app_data(dashboard()).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/frame.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_latest_frame_is_served_as_jpeg() {
        let dashboard = dashboard();
        dashboard.state.publish(web::Bytes::from_static(b"\xff\xd8jpeg"));
        let app =
            test::init_service(App::new().app_data(dashboard.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/frame.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
        assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"\xff\xd8jpeg"));
    }

    #[actix_web::test]
    async fn test_stop_clears_flag() {
        let dashboard = dashboard();
        // Flag set without a queued session, as if a session were mid-frame.
        assert!(dashboard.state.try_start());
        let app =
            test::init_service(App::new().app_data(dashboard.clone()).configure(configure)).await;

        let status: serde_json::Value =
            test::call_and_read_body_json(&app, toggle(false).to_request()).await;
        assert_eq!(status["running"], false);
        assert!(!dashboard.state.is_running());
    }

    #[actix_web::test]
    async fn test_start_with_missing_camera_reports_error_banner() {
        let dashboard = dashboard();
        let app =
            test::init_service(App::new().app_data(dashboard.clone()).configure(configure)).await;

        let resp = test::call_service(&app, toggle(true).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // The worker thread clears the flag once opening fails.
        wait_until(|| !dashboard.state.is_running());

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["running"], false);
        assert_eq!(status["banners"][0]["level"], "error");
        assert_eq!(status["banners"][0]["message"], MSG_CAMERA_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_quick_stop_start_toggles_end_running() {
        let state = Arc::new(LiveState::new(Vec::new()));
        let cameras = Arc::new(AtomicUsize::new(0));
        let live = Arc::clone(&cameras);
        let open = move || -> Result<SlowCamera, CameraError> {
            live.fetch_add(1, Ordering::SeqCst);
            Ok(SlowCamera {
                delay: Duration::from_millis(50),
                open: Arc::clone(&live),
            })
        };
        let capture =
            spawn_capture_worker(FrameAnnotator::new(NoFaces), open, Arc::clone(&state), 80)
                .unwrap();
        let dashboard = Data::new(Dashboard {
            state: Arc::clone(&state),
            capture,
        });
        let app =
            test::init_service(App::new().app_data(dashboard.clone()).configure(configure)).await;

        test::call_service(&app, toggle(true).to_request()).await;
        wait_until(|| state.snapshot().frames > 0);

        // Well inside one frame time of the running session.
        for running in [false, true, false, true] {
            test::call_service(&app, toggle(running).to_request()).await;
        }

        std::thread::sleep(Duration::from_millis(500));
        let req = test::TestRequest::get().uri("/api/status").to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["running"], true);
        assert!(status["banners"]
            .as_array()
            .unwrap()
            .iter()
            .all(|b| b["level"] != "error"));
        assert!(status["frames"].as_u64().unwrap() > 1);

        test::call_service(&app, toggle(false).to_request()).await;
        wait_until(|| cameras.load(Ordering::SeqCst) == 0);
        assert_eq!(cameras.load(Ordering::SeqCst), 0);
        assert!(!state.is_running());
    }

    #[actix_web::test]
    async fn test_malformed_toggle_is_rejected() {
        let app = test::init_service(App::new().app_data(dashboard()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/webcam")
            .set_json(serde_json::json!({ "on": true }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }
}
