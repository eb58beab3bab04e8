use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::analysis::NoiseConfig;
use crate::audio::DeviceInfo;
use crate::engine::{EngineHandle, EngineStatus};
use crate::error::{AudioError, CalibrationError, ConfigError, ErrorCode};

use super::sse;

/// Calibration window used when the request has no body
const DEFAULT_CALIBRATION_SECONDS: f32 = 2.0;

/// Extra time granted to a calibration beyond its window
const CALIBRATION_GRACE: Duration = Duration::from_secs(2);

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub handle: Arc<EngineHandle>,
}

impl HttpState {
    pub fn new(handle: Arc<EngineHandle>) -> Self {
        Self { handle }
    }
}

/// Engine errors mapped to JSON `{ "error", "code" }` responses.
#[derive(Debug)]
pub struct HttpServerError {
    status: StatusCode,
    code: i32,
    message: String,
}

impl HttpServerError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: 0,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AudioError> for HttpServerError {
    fn from(err: AudioError) -> Self {
        let status = match &err {
            AudioError::InvalidParameters { .. } => StatusCode::BAD_REQUEST,
            AudioError::DeviceUnavailable { .. } | AudioError::DeviceEnumerationFailed { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AudioError::NotRunning | AudioError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.message(),
        }
    }
}

impl From<ConfigError> for HttpServerError {
    fn from(err: ConfigError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: err.code(),
            message: err.message(),
        }
    }
}

impl From<CalibrationError> for HttpServerError {
    fn from(err: CalibrationError) -> Self {
        let status = match &err {
            CalibrationError::InvalidDuration { .. } => StatusCode::BAD_REQUEST,
            CalibrationError::NoActiveSession | CalibrationError::Superseded => {
                StatusCode::CONFLICT
            }
            CalibrationError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            code: err.code(),
            message: err.message(),
        }
    }
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message, "code": self.code })),
        )
            .into_response()
    }
}

/// Health endpoint response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub engine_running: bool,
    pub subscribers: usize,
}

/// Body of `POST /api/audio/start`; field names match the web client.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub device_id: Option<usize>,
    #[serde(default, alias = "sample_rate")]
    pub samplerate: Option<u32>,
    #[serde(default, alias = "block_size")]
    pub blocksize: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CalibrateRequest {
    #[serde(default = "default_calibration_seconds")]
    pub seconds: f32,
}

fn default_calibration_seconds() -> f32 {
    DEFAULT_CALIBRATION_SECONDS
}

/// Build the Axum router with all handlers.
pub fn build_router(state: HttpState) -> Router {
    let audio = Router::new()
        .route("/devices", get(list_devices))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/noise_config", get(get_noise_config).post(set_noise_config))
        .route("/noise_calibrate", post(noise_calibrate))
        .route("/stream", get(stream));

    Router::new()
        .route("/health", get(health))
        .nest("/api/audio", audio)
        .with_state(state)
}

/// Run the HTTP server loop.
pub async fn run_http_server(state: HttpState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {addr}"))?;
    log::info!("[Http] Listening on {}", addr);
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving HTTP router")?;
    Ok(())
}

/// Run a blocking engine call off the async executor.
async fn blocking<T, F>(handle: &Arc<EngineHandle>, call: F) -> Result<T, HttpServerError>
where
    T: Send + 'static,
    F: FnOnce(&EngineHandle) -> T + Send + 'static,
{
    let handle = Arc::clone(handle);
    tokio::task::spawn_blocking(move || call(&handle))
        .await
        .map_err(|err| HttpServerError::internal(format!("engine task failed: {err}")))
}

pub async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        engine_running: state.handle.status().running,
        subscribers: state.handle.subscriber_count(),
    })
}

pub async fn list_devices(
    State(state): State<HttpState>,
) -> Result<Json<Vec<DeviceInfo>>, HttpServerError> {
    let devices = blocking(&state.handle, |handle| handle.devices()).await??;
    Ok(Json(devices))
}

pub async fn status(State(state): State<HttpState>) -> Json<EngineStatus> {
    Json(state.handle.status())
}

pub async fn start(
    State(state): State<HttpState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<EngineStatus>, HttpServerError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let status = blocking(&state.handle, move |handle| {
        handle.start(request.device_id, request.samplerate, request.blocksize)
    })
    .await??;
    Ok(Json(status))
}

pub async fn stop(State(state): State<HttpState>) -> Result<Json<EngineStatus>, HttpServerError> {
    let status = blocking(&state.handle, |handle| handle.stop()).await??;
    Ok(Json(status))
}

pub async fn get_noise_config(State(state): State<HttpState>) -> Json<NoiseConfig> {
    Json(state.handle.get_noise_config())
}

pub async fn set_noise_config(
    State(state): State<HttpState>,
    Json(config): Json<NoiseConfig>,
) -> Result<Json<NoiseConfig>, HttpServerError> {
    Ok(Json(state.handle.set_noise_config(config)?))
}

pub async fn noise_calibrate(
    State(state): State<HttpState>,
    body: Option<Json<CalibrateRequest>>,
) -> Result<Json<NoiseConfig>, HttpServerError> {
    let seconds = body
        .map(|Json(request)| request.seconds)
        .unwrap_or(DEFAULT_CALIBRATION_SECONDS);
    let ticket = blocking(&state.handle, move |handle| handle.calibrate(seconds)).await??;
    let timeout = Duration::from_secs_f32(seconds) + CALIBRATION_GRACE;
    let outcome = ticket.wait_timeout(timeout).await?;
    Ok(Json(outcome.config))
}

pub async fn stream(
    State(state): State<HttpState>,
) -> Result<sse::FrameStream, HttpServerError> {
    let (id, receiver) = blocking(&state.handle, |handle| handle.subscribe_frames()).await?;
    log::info!("[Http] SSE subscriber {} connected", id);
    Ok(sse::frames(receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::analysis::{BlockFeatures, FeatureExtractor, FeatureExtractorFactory};
    use crate::audio::SyntheticHost;
    use crate::config::AppConfig;
    use crate::error::AudioError;

    struct StallingExtractor;

    impl FeatureExtractor for StallingExtractor {
        fn extract(&mut self, _block: &[f32]) -> BlockFeatures {
            std::thread::sleep(Duration::from_millis(600));
            BlockFeatures::default()
        }
    }

    struct StallingFactory;

    impl FeatureExtractorFactory for StallingFactory {
        fn create(&self, _: u32, _: usize) -> Result<Box<dyn FeatureExtractor>, AudioError> {
            Ok(Box::new(StallingExtractor))
        }
    }

    fn make_router() -> (Router, Arc<EngineHandle>) {
        let mut config = AppConfig::default();
        config.stream.autostart_on_subscribe = false;
        let handle = Arc::new(EngineHandle::new(
            Arc::new(SyntheticHost::demo().paced(true)),
            config,
        ));
        (build_router(HttpState::new(Arc::clone(&handle))), handle)
    }

    async fn response_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = serde_json::from_slice::<Value>(&bytes).expect("JSON body");
        (status, json)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        response_json(router.clone().oneshot(request).await.expect("router call")).await
    }

    #[tokio::test]
    async fn health_reports_stopped_engine() {
        let (router, _handle) = make_router();
        let (status, json) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["engine_running"], false);
    }

    #[tokio::test]
    async fn devices_lists_synthetic_inputs() {
        let (router, _handle) = make_router();
        let (status, json) = call(&router, "GET", "/api/audio/devices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(2));
        assert_eq!(json[1]["name"], "Synthetic A4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_status_stop_round() {
        let (router, _handle) = make_router();
        let (status, json) = call(
            &router,
            "POST",
            "/api/audio/start",
            Some(serde_json::json!({ "device_id": 1, "samplerate": 44100, "blocksize": 512 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], true);
        assert_eq!(json["device_id"], 1);
        assert_eq!(json["block_size"], 512);

        let (_, json) = call(&router, "GET", "/api/audio/status", None).await;
        assert_eq!(json["state"], "running");

        let (status, json) = call(&router, "POST", "/api/audio/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], false);
    }

    #[tokio::test]
    async fn start_with_unknown_device_is_unavailable() {
        let (router, _handle) = make_router();
        let (status, json) = call(
            &router,
            "POST",
            "/api/audio/start",
            Some(serde_json::json!({ "device_id": 9 })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], 1001);
    }

    #[tokio::test]
    async fn invalid_noise_config_is_rejected() {
        let (router, handle) = make_router();
        let before = handle.get_noise_config();
        let mut body = serde_json::to_value(before).unwrap();
        body["hp_cut_hz"] = serde_json::json!(0.0);

        let (status, json) = call(&router, "POST", "/api/audio/noise_config", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 3001);
        assert_eq!(handle.get_noise_config(), before);
    }

    #[tokio::test]
    async fn noise_config_round_trips_wire_names() {
        let (router, _handle) = make_router();
        let (status, json) = call(
            &router,
            "POST",
            "/api/audio/noise_config",
            Some(serde_json::json!({ "gate_db": -42.0, "hp_enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["gate_db"], -42.0);

        let (_, json) = call(&router, "GET", "/api/audio/noise_config", None).await;
        assert_eq!(json["hp_enabled"], false);
        assert_eq!(json["gate_db"], -42.0);
    }

    #[tokio::test]
    async fn calibrate_without_session_conflicts() {
        let (router, _handle) = make_router();
        let (status, json) = call(&router, "POST", "/api/audio/noise_calibrate", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], 2002);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn calibrate_returns_updated_config() {
        let (router, handle) = make_router();
        handle.start(Some(0), None, Some(1024)).unwrap();

        let (status, json) = call(
            &router,
            "POST",
            "/api/audio/noise_calibrate",
            Some(serde_json::json!({ "seconds": 0.25 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let floor = json["noise_floor_db"].as_f64().unwrap();
        assert!(floor < -50.0, "quiet device floor was {floor}");
        handle.stop().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn calibrate_does_not_stall_executor_while_lifecycle_is_busy() {
        let mut config = AppConfig::default();
        config.stream.autostart_on_subscribe = false;
        config.audio.stop_timeout_ms = 2000;
        let handle = Arc::new(
            EngineHandle::new(Arc::new(SyntheticHost::demo()), config)
                .with_extractor_factory(Arc::new(StallingFactory)),
        );
        let router = build_router(HttpState::new(Arc::clone(&handle)));

        let starter = Arc::clone(&handle);
        tokio::task::spawn_blocking(move || starter.start(Some(1), None, Some(512)))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Holds the lifecycle lock until the stalled block finishes
        let stopper = Arc::clone(&handle);
        let stop = tokio::task::spawn_blocking(move || stopper.stop());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calibrate_router = router.clone();
        let calibrate = tokio::spawn(async move {
            call(&calibrate_router, "POST", "/api/audio/noise_calibrate", None).await
        });
        tokio::task::yield_now().await;

        let health = tokio::time::timeout(
            Duration::from_millis(300),
            call(&router, "GET", "/health", None),
        )
        .await
        .expect("health answered while calibrate waits for the engine");
        assert_eq!(health.0, StatusCode::OK);

        let (status, json) = calibrate.await.unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], 2002);
        assert!(stop.await.unwrap().is_ok());
    }
}
