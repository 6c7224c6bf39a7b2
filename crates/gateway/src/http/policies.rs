use std::time::Instant;

use axum::Extension;
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use polreg_contracts::export::{CSV_CONTENT_TYPE, CSV_FILENAME, write_csv};
use polreg_contracts::{NewPolicy, PageError, PageRange, PageRequest, PolicyRecord, ScanQuery};
use polreg_store::StoreError;
use serde::Deserialize;
use tracing::Instrument;

use super::{
    ApiError, AppState, RequestId, finish_span, internal_error, require_access,
    store_error_response, validation_error,
};
use crate::metrics::observe_policy_write;

pub(super) const TOTAL_COUNT_HEADER: &str = "x-total-count";
const RANGE_UNIT: &str = "policies";

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListParams {
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    sort: Option<String>,
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ExportParams {
    q: Option<String>,
    sort: Option<String>,
    dir: Option<String>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<(HeaderMap, Json<Vec<PolicyRecord>>), ApiError> {
    require_access(&state, &headers)?;

    let Query(params) = params.map_err(|err| validation_error(err.body_text(), None))?;
    let page = PageRequest::new(params.offset, params.limit).map_err(page_error)?;
    let query = ScanQuery::new(
        params.q.as_deref(),
        params.sort.as_deref(),
        params.dir.as_deref(),
    );

    let span = tracing::info_span!(
        "policy.list",
        request_id = %request_id,
        sort = query.sort.column(),
        dir = query.dir.as_sql(),
        offset = page.offset,
        limit = page.limit,
        total = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let scanned = match state.store.scan(&query, page).await {
            Ok(scanned) => scanned,
            Err(err) => {
                finish_span(started, "error");
                return Err(store_error_response(&err));
            }
        };
        tracing::Span::current().record("total", scanned.total);

        let range = PageRange::new(page, scanned.total);
        let content_range = HeaderValue::from_str(&range.content_range(RANGE_UNIT))
            .map_err(|_| internal_error("failed to encode Content-Range"))?;

        let mut out = HeaderMap::new();
        out.insert(TOTAL_COUNT_HEADER, HeaderValue::from(scanned.total));
        out.insert(header::CONTENT_RANGE, content_range);

        finish_span(started, "ok");
        Ok((out, Json(scanned.items)))
    }
    .instrument(span)
    .await
}

pub(super) async fn get_one(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PolicyRecord>, ApiError> {
    require_access(&state, &headers)?;
    let Path(id) = id.map_err(|err| validation_error(err.body_text(), None))?;

    let span = tracing::info_span!(
        "policy.get",
        request_id = %request_id,
        policy_id = id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        match state.store.get(id).await {
            Ok(record) => {
                finish_span(started, "ok");
                Ok(Json(record))
            }
            Err(err) => {
                finish_span(started, outcome_for(&err));
                Err(store_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await
}

pub(super) async fn create(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<NewPolicy>, JsonRejection>,
) -> Result<(StatusCode, Json<PolicyRecord>), ApiError> {
    require_access(&state, &headers)?;

    let Json(policy) = body.map_err(|err| {
        observe_policy_write("create", "invalid");
        validation_error(err.body_text(), None)
    })?;

    policy.validate().map_err(|err| {
        observe_policy_write("create", "invalid");
        let detail = serde_json::to_value(&err.errors).unwrap_or(serde_json::Value::Null);
        validation_error(err.to_string(), Some(detail))
    })?;

    let span = tracing::info_span!(
        "policy.create",
        request_id = %request_id,
        number = %policy.number,
        policy_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        match state.store.insert(&policy).await {
            Ok(record) => {
                tracing::Span::current().record("policy_id", record.id);
                observe_policy_write("create", "created");
                finish_span(started, "created");
                tracing::info!("policy created");
                Ok((StatusCode::CREATED, Json(record)))
            }
            Err(err) => {
                let outcome = outcome_for(&err);
                observe_policy_write("create", outcome);
                finish_span(started, outcome);
                Err(store_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await
}

pub(super) async fn delete(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    require_access(&state, &headers)?;
    let Path(id) = id.map_err(|err| validation_error(err.body_text(), None))?;

    let span = tracing::info_span!(
        "policy.delete",
        request_id = %request_id,
        policy_id = id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        match state.store.delete(id).await {
            Ok(()) => {
                observe_policy_write("delete", "deleted");
                finish_span(started, "deleted");
                tracing::info!("policy deleted");
                Ok(StatusCode::NO_CONTENT)
            }
            Err(err) => {
                let outcome = outcome_for(&err);
                observe_policy_write("delete", outcome);
                finish_span(started, outcome);
                Err(store_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await
}

pub(super) async fn export_csv(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    require_access(&state, &headers)?;

    let Query(params) = params.map_err(|err| validation_error(err.body_text(), None))?;
    let query = ScanQuery::new(
        params.q.as_deref(),
        params.sort.as_deref(),
        params.dir.as_deref(),
    );

    let span = tracing::info_span!(
        "policy.export",
        request_id = %request_id,
        sort = query.sort.column(),
        dir = query.dir.as_sql(),
        rows = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let records = match state.store.scan_all(&query).await {
            Ok(records) => records,
            Err(err) => {
                finish_span(started, "error");
                return Err(store_error_response(&err));
            }
        };
        tracing::Span::current().record("rows", records.len() as u64);

        let body = write_csv(&records).map_err(|err| {
            tracing::error!(error = %err, "csv export failed");
            finish_span(started, "error");
            internal_error("csv export failed")
        })?;

        finish_span(started, "ok");
        Ok((
            [
                (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", CSV_FILENAME),
                ),
            ],
            body,
        )
            .into_response())
    }
    .instrument(span)
    .await
}

fn page_error(err: PageError) -> ApiError {
    let detail = serde_json::json!([{ "field": err.field, "message": err.message }]);
    validation_error(err.to_string(), Some(detail))
}

fn outcome_for(err: &StoreError) -> &'static str {
    match err {
        StoreError::Duplicate { .. } => "duplicate",
        StoreError::NotFound { .. } => "not_found",
        StoreError::Timeout => "timeout",
        StoreError::Sqlx(_) => "error",
    }
}
