use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use polreg_auth::AccessSecret;
use polreg_store::{PolicyStore, StoreError};
use serde::Serialize;
use ulid::Ulid;

use crate::config::{GatewayConfig, StartupError};

mod index;
mod policies;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub store: PolicyStore,
    pub access: AccessSecret,
}

impl AppState {
    pub fn new(config: GatewayConfig, store: PolicyStore) -> Self {
        let access = AccessSecret::new(config.api_key.clone());
        Self {
            config,
            store,
            access,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RequestId(pub String);

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let store = PolicyStore::connect_and_migrate(
        &config.db_url,
        config.db_max_connections,
        Duration::from_millis(config.db_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize policy store: {}", err),
    })?;

    Ok(app(AppState::new(config, store)))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .route("/policies", get(policies::list).post(policies::create))
        .route("/policies.csv", get(policies::export_csv))
        .route(
            "/policies/{id}",
            get(policies::get_one).delete(policies::delete),
        )
        .layer(middleware::from_fn(track_request))
        .with_state(state)
}

/// Assigns the request id, echoes it back, and records request metrics under
/// the matched route template.
async fn track_request(mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().as_str().to_string();

    let request_id = extract_request_id(req.headers());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    crate::metrics::observe_http_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                error: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    app: String,
    version: &'static str,
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        app: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn require_access(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    polreg_auth::authorize(headers, &state.access).map_err(|err| {
        crate::metrics::observe_auth_rejection(err.code);
        json_error(StatusCode::UNAUTHORIZED, err.code, err.message, false)
    })
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Records `latency_ms` and `outcome` on the current span.
fn finish_span(started: Instant, outcome: &'static str) {
    let span = tracing::Span::current();
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    span.record("outcome", outcome);
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
            detail: None,
        }),
    )
}

fn validation_error(message: impl Into<String>, detail: Option<serde_json::Value>) -> ApiError {
    let (status, Json(mut body)) = json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "ERR_VALIDATION",
        message,
        false,
    );
    body.detail = detail;
    (status, Json(body))
}

fn store_error_response(err: &StoreError) -> ApiError {
    match err {
        StoreError::Duplicate { .. } => json_error(
            StatusCode::CONFLICT,
            "ERR_DUPLICATE_NUMBER",
            err.to_string(),
            false,
        ),
        StoreError::NotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", err.to_string(), false)
        }
        StoreError::Timeout => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_STORE_UNAVAILABLE",
            "policy store timed out".to_string(),
            true,
        ),
        StoreError::Sqlx(inner) => {
            tracing::error!(error = %inner, "policy store failure");
            internal_error("policy store failure")
        }
    }
}

fn internal_error(message: &str) -> ApiError {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_INTERNAL",
        message.to_string(),
        false,
    )
}
