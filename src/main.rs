mod cache;
mod http;
mod idempotency;
mod imaging;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod random;
mod storage;
mod upload;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeRequest, AnalyzeResponse, ApiError, ClearResponse, EnhanceRequest, EnhanceResponse,
    EnqueueResponse, IngestRequest, ValidateRequest, ValidateResponse,
};
use pipeline::{IngestError, IngestErrorKind, IngestPipeline};
use serde::Serialize;
use serde_json::{Value, json};
use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "mintmark.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = IngestPipeline::from_env();
    let (queue, _worker) = jobs::BatchQueue::spawn(pipeline.clone());
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState::new(pipeline, queue, prometheus_handle, redis);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "mintmark.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state).into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: IngestPipeline,
    queue: jobs::BatchQueue,
    openapi: Arc<Value>,
    idempotency: Arc<Mutex<HashMap<String, Value>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

impl AppState {
    fn new(
        pipeline: IngestPipeline,
        queue: jobs::BatchQueue,
        prometheus_handle: PrometheusHandle,
        redis: Option<redis::Client>,
    ) -> Self {
        let openapi: Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi": "3.0.3"}));
        Self {
            pipeline,
            queue,
            openapi: Arc::new(openapi),
            idempotency: Arc::new(Mutex::new(HashMap::new())),
            prometheus_handle,
            redis,
        }
    }
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .nest(
            "/images",
            Router::new()
                .route("/validate", post(validate_images))
                .route("/analyze", post(analyze_image))
                .route("/enhance", post(enhance_image)),
        )
        .route("/ingest", post(ingest))
        .route(
            "/batches",
            post(enqueue_batch).get(list_batches).delete(clear_batches),
        )
        .route("/batches/{id}", get(get_batch))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mintmark-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(Json((*state.openapi).clone()))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return AppError::Unauthorized.into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Quality gate over a list of files; rejected files are reported, not errors.
///
/// - Method: `POST`
/// - Path: `/images/validate`
/// - Body: `ValidateRequest`
async fn validate_images(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AppError> {
    crate::metrics::inc_requests("/images/validate");
    let results = state.pipeline.validate_files(payload.files).await?;
    let accepted = results.iter().filter(|r| r.verdict.is_valid).count();
    Ok(Json(ValidateResponse {
        accepted,
        rejected: results.len() - accepted,
        results,
    }))
}

async fn analyze_image(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    crate::metrics::inc_requests("/images/analyze");
    let response = state
        .pipeline
        .analyze(payload.file, payload.profile)
        .await?;
    Ok(Json(response))
}

async fn enhance_image(
    State(state): State<AppState>,
    Json(payload): Json<EnhanceRequest>,
) -> Result<Json<EnhanceResponse>, AppError> {
    crate::metrics::inc_requests("/images/enhance");
    let response = state
        .pipeline
        .enhance(payload.file, payload.options)
        .await?;
    Ok(Json(response))
}

/// Run the gate → upload → enhance pipeline inline.
///
/// - Method: `POST`
/// - Path: `/ingest`
/// - Headers: optional `Idempotency-Key`
/// - Body: `IngestRequest`
/// - Response: `IngestResponse` (final batch state + per-stage transcript)
async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/ingest");
    info!(
        target = "mintmark.api",
        entity_id = %payload.entity_id,
        files = payload.files.len(),
        "ingest invoked",
    );
    let pipeline = state.pipeline.clone();
    idempotent(&state, "ingest", &headers, || async move {
        let response = pipeline.run(payload).await?;
        to_value(&response)
    })
    .await
}

async fn enqueue_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/batches");
    let queue = state.queue.clone();
    idempotent(&state, "batches", &headers, || async move {
        let id = queue.enqueue(payload).await.map_err(AppError::Queue)?;
        to_value(&EnqueueResponse {
            batch_id: id.to_string(),
        })
    })
    .await
}

async fn list_batches(State(state): State<AppState>) -> Json<Vec<jobs::BatchInfo>> {
    Json(state.queue.list().await)
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::BatchInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(IngestError::invalid_input(
            "batches",
            "invalid_batch_id",
        )));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("batch"))
}

async fn clear_batches(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.queue.clear_finished().await;
    info!(target = "mintmark.api", cleared, "batch history cleared");
    Json(ClearResponse { cleared })
}

/// Replays a stored response when the request carries a known
/// `Idempotency-Key`. Keys are scoped per route.
async fn idempotent<F, Fut>(
    state: &AppState,
    route: &'static str,
    headers: &HeaderMap,
    run: F,
) -> Result<Json<Value>, AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, AppError>>,
{
    let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        return run().await.map(Json);
    };
    let key = idempotency::redis_key(route, &key);

    if let Some(client) = &state.redis {
        if let Some(existing) = idempotency::redis_get::<Value>(client, &key).await {
            return Ok(Json(existing));
        }
        let response = run().await?;
        idempotency::redis_set(client, &key, &response, idempotency::ttl_from_env()).await;
        return Ok(Json(response));
    }
    if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
        return Ok(Json(existing));
    }
    let response = run().await?;
    state.idempotency.lock().await.insert(key, response.clone());
    Ok(Json(response))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::Pipeline(IngestError::internal("serialize", err.to_string())))
}

#[derive(Debug)]
enum AppError {
    Pipeline(IngestError),
    Queue(ApiError),
    NotFound(&'static str),
    Unauthorized,
}

impl From<IngestError> for AppError {
    fn from(value: IngestError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    IngestErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    IngestErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, payload)
            }
            AppError::Queue(err) => (StatusCode::SERVICE_UNAVAILABLE, err),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(format!("{what} not found")),
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: "unauthorized".into(),
                    detail: None,
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let pipeline = IngestPipeline::demo();
        let (queue, _worker) = jobs::BatchQueue::spawn(pipeline.clone());
        let handle = PrometheusBuilder::new().build_recorder().handle();
        app(AppState::new(pipeline, queue, handle, None))
    }

    fn garbage_file() -> Value {
        json!({ "name": "scan.txt", "data": "bm90IGFuIGltYWdl" })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app();
        let (status, body) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn validate_reports_rejections_per_file() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post("/images/validate", json!({ "files": [garbage_file()] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 0);
        assert_eq!(body["rejected"], 1);
        assert_eq!(body["results"][0]["is_valid"], false);
        assert_eq!(body["results"][0]["code"], "invalid_image");
        assert_eq!(body["results"][0]["reason"], "Invalid image file");
    }

    #[tokio::test]
    async fn ingest_errors_map_to_bad_request() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post("/ingest", json!({ "entity_id": "", "files": [garbage_file()] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "request");
        assert!(body["detail"].as_str().unwrap().contains("entity_id"));
    }

    #[tokio::test]
    async fn ingest_replays_idempotent_requests() {
        let app = test_app();
        let request = || {
            let mut req = post(
                "/ingest",
                json!({ "entity_id": "coin-1", "files": [garbage_file()] }),
            );
            req.headers_mut()
                .insert("Idempotency-Key", "abc-123".parse().unwrap());
            req
        };
        let (status, first) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["batch"]["status"], "failed");
        assert_eq!(first["stages"][0]["name"], "quality_gate");
        let (_, second) = send(&app, request()).await;
        assert_eq!(first["batch"]["id"], second["batch"]["id"]);
    }

    #[tokio::test]
    async fn batches_can_be_queued_polled_and_cleared() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post(
                "/batches",
                json!({ "entity_id": "coin-2", "files": [garbage_file()] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["batch_id"].as_str().unwrap().to_string();

        let mut finished = false;
        for _ in 0..200 {
            let (status, info) = send(&app, get_req(&format!("/batches/{id}"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(info["batch"]["id"], id.as_str());
            if info["state"] == "completed" {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(finished);

        let (_, listed) = send(&app, get_req("/batches")).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let clear = Request::builder()
            .method("DELETE")
            .uri("/batches")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, clear).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], 1);
    }

    #[tokio::test]
    async fn unknown_and_malformed_batch_ids() {
        let app = test_app();
        let (status, _) = send(&app, get_req("/batches/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(
            &app,
            get_req("/batches/00000000-0000-4000-8000-000000000000"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = test_app();
        let (status, body) = send(&app, get_req("/openapi.json")).await;
        if std::env::var("OPENAPI_KEY").is_err() {
            assert_eq!(status, StatusCode::OK);
            assert!(body["paths"]["/ingest"].is_object());
        }
    }
}
