//! End-to-end HTTP behaviour of the gateway against an in-memory store.

use std::collections::HashMap;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use polreg_auth::AccessSecret;
use polreg_gateway::config::GatewayConfig;
use polreg_gateway::http::{AppState, app};
use polreg_store::PolicyStore;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn test_app() -> (Router, AccessSecret) {
    let store = PolicyStore::in_memory().await.expect("in-memory store");
    let config = GatewayConfig::from_kv(&HashMap::new()).expect("default config");
    let state = AppState::new(config, store);
    let access = state.access.clone();
    (app(state), access)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let req = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).expect("serialize body")))
            .expect("build request"),
        None => builder.body(Body::empty()).expect("build request"),
    };

    let response = router.clone().oneshot(req).await.expect("route request");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    (status, headers, bytes.to_vec())
}

async fn send_json(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, bytes) = send(router, method, uri, &[], body).await;
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, parsed)
}

async fn create(router: &Router, number: &str, holder: &str, premium: f64, status: &str) -> Value {
    let (code, body) = send_json(
        router,
        Method::POST,
        "/policies",
        Some(json!({
            "number": number,
            "holder": holder,
            "premium": premium,
            "status": status,
        })),
    )
    .await;
    assert_eq!(code, StatusCode::CREATED, "create {number}: {body}");
    body
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn create_returns_record_and_rejects_duplicate_number() {
    let (router, _) = test_app().await;

    let created = create(&router, "T-1", "Alice", 10.0, "active").await;
    assert_eq!(created["id"], 1);
    assert_eq!(created["number"], "T-1");
    assert_eq!(created["holder"], "Alice");
    assert_eq!(created["premium"], 10.0);
    assert_eq!(created["status"], "active");

    let (status, body) = send_json(
        &router,
        Method::POST,
        "/policies",
        Some(json!({"number": "T-1", "holder": "Bob", "premium": 1.0, "status": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ERR_DUPLICATE_NUMBER");

    let (status, body) = send_json(&router, Method::GET, "/policies/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["holder"], "Alice");
}

#[tokio::test]
async fn invalid_bodies_are_unprocessable() {
    let (router, _) = test_app().await;

    let (status, body) = send_json(
        &router,
        Method::POST,
        "/policies",
        Some(json!({"number": "X", "holder": "Al", "premium": -1.0, "status": "ok"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "ERR_VALIDATION");
    let fields: Vec<&str> = body["detail"]
        .as_array()
        .expect("detail array")
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert_eq!(fields, vec!["number", "premium"]);

    let (status, body) = send_json(
        &router,
        Method::POST,
        "/policies",
        Some(json!({"number": "P-100"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "ERR_VALIDATION");
}

#[tokio::test]
async fn list_sets_total_and_content_range() {
    let (router, _) = test_app().await;
    for n in 0..3 {
        create(&router, &format!("P-{n}"), "Holder", 1.0 + n as f64, "active").await;
    }

    let (status, headers, bytes) =
        send(&router, Method::GET, "/policies?limit=2&offset=0", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-total-count"), "3");
    assert_eq!(header_str(&headers, "content-range"), "policies 0-1/3");

    let items: Vec<Value> = serde_json::from_slice(&bytes).expect("json list");
    let ids: Vec<i64> = items.iter().filter_map(|i| i["id"].as_i64()).collect();
    assert_eq!(ids, vec![3, 2]);

    let (_, headers, bytes) =
        send(&router, Method::GET, "/policies?limit=2&offset=10", &[], None).await;
    assert_eq!(header_str(&headers, "content-range"), "policies 10-2/3");
    assert_eq!(bytes, b"[]");
}

#[tokio::test]
async fn list_on_empty_store_reports_zero_range() {
    let (router, _) = test_app().await;

    let (status, headers, _) = send(&router, Method::GET, "/policies", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-total-count"), "0");
    assert_eq!(header_str(&headers, "content-range"), "policies 0-0/0");
}

#[tokio::test]
async fn out_of_range_paging_is_unprocessable() {
    let (router, _) = test_app().await;

    for uri in [
        "/policies?limit=0",
        "/policies?limit=101",
        "/policies?offset=-1",
        "/policies?limit=ten",
    ] {
        let (status, body) = send_json(&router, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        assert_eq!(body["code"], "ERR_VALIDATION", "{uri}");
    }

    let (status, _) = send_json(&router, Method::GET, "/policies?limit=100", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn largest_offset_returns_empty_page() {
    let (router, _) = test_app().await;
    create(&router, "O-1", "Olga", 1.0, "active").await;

    let uri = format!("/policies?offset={}", i64::MAX);
    let (status, headers, bytes) = send(&router, Method::GET, &uri, &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-total-count"), "1");
    assert_eq!(
        header_str(&headers, "content-range"),
        format!("policies {}-0/1", i64::MAX)
    );
    assert_eq!(bytes, b"[]");
}

#[tokio::test]
async fn search_filters_list_and_unknown_sort_falls_back() {
    let (router, _) = test_app().await;
    create(&router, "A-1", "Alice", 5.0, "active").await;
    create(&router, "B-2", "Bob", 3.0, "lapsed").await;
    create(&router, "C-3", "Carol", 7.5, "active").await;

    let (_, headers, bytes) =
        send(&router, Method::GET, "/policies?q=ACTIVE", &[], None).await;
    assert_eq!(header_str(&headers, "x-total-count"), "2");
    let items: Vec<Value> = serde_json::from_slice(&bytes).expect("json list");
    let ids: Vec<i64> = items.iter().filter_map(|i| i["id"].as_i64()).collect();
    assert_eq!(ids, vec![3, 1]);

    let (status, _, bytes) = send(
        &router,
        Method::GET,
        "/policies?sort=drop%20table&dir=sideways",
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items: Vec<Value> = serde_json::from_slice(&bytes).expect("json list");
    let ids: Vec<i64> = items.iter().filter_map(|i| i["id"].as_i64()).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn csv_export_honours_sort_and_sets_attachment_headers() {
    let (router, _) = test_app().await;
    create(&router, "A-1", "Alice", 5.0, "active").await;
    create(&router, "B-2", "Bob", 3.0, "lapsed").await;
    create(&router, "C-3", "Carol, Jr.", 7.5, "active").await;

    let (status, headers, bytes) = send(
        &router,
        Method::GET,
        "/policies.csv?sort=premium&dir=asc",
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(header_str(&headers, "content-type").starts_with("text/csv"));
    assert_eq!(
        header_str(&headers, "content-disposition"),
        "attachment; filename=\"policies.csv\""
    );

    let text = String::from_utf8(bytes).expect("utf-8 csv");
    let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines[0], "id,number,holder,premium,status");
    assert_eq!(lines[1], "2,B-2,Bob,3.00,lapsed");
    assert_eq!(lines[2], "1,A-1,Alice,5.00,active");
    assert_eq!(lines[3], "3,C-3,\"Carol, Jr.\",7.50,active");
    assert_eq!(lines.len(), 4);
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let (router, _) = test_app().await;
    create(&router, "D-1", "Dana", 2.0, "active").await;

    let (status, body) = send_json(&router, Method::DELETE, "/policies/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send_json(&router, Method::GET, "/policies/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ERR_NOT_FOUND");

    let (status, _) = send_json(&router, Method::DELETE, "/policies/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send_json(&router, Method::GET, "/policies/abc", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "ERR_VALIDATION");
}

#[tokio::test]
async fn api_key_gate_applies_to_policy_routes_only() {
    let (router, access) = test_app().await;
    create(&router, "G-1", "Gina", 4.0, "active").await;

    access.set(Some("s3cret".to_string()));

    let (status, body) = send_json(&router, Method::GET, "/policies", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "ERR_AUTH_REQUIRED");

    let (status, _, bytes) = send(
        &router,
        Method::GET,
        "/policies",
        &[("x-api-key", "wrong")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&bytes).expect("json error");
    assert_eq!(body["code"], "ERR_AUTH_INVALID");

    let (status, _, _) = send(
        &router,
        Method::GET,
        "/policies",
        &[("x-api-key", "s3cret")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &router,
        Method::GET,
        "/policies.csv",
        &[("authorization", "apikey s3cret")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&router, Method::GET, "/policies/1", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(&router, Method::DELETE, "/policies/1", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(&router, Method::GET, "/policies.csv", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send_json(
        &router,
        Method::POST,
        "/policies",
        Some(json!({"number": "G-2", "holder": "Gus", "premium": 1.0, "status": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "ERR_AUTH_REQUIRED");

    // Credentials are checked before the input is looked at.
    let (status, body) = send_json(
        &router,
        Method::POST,
        "/policies",
        Some(json!({"number": "X"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "ERR_AUTH_REQUIRED");
    let (status, _) = send_json(&router, Method::GET, "/policies?limit=0", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &router,
        Method::POST,
        "/policies",
        &[("x-api-key", "s3cret")],
        Some(json!({"number": "G-2", "holder": "Gus", "premium": 1.0, "status": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    for uri in ["/", "/health", "/version", "/metrics"] {
        let (status, _, _) = send(&router, Method::GET, uri, &[], None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }

    access.set(None);
    let (status, _, _) = send(&router, Method::GET, "/policies", &[], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_version_and_request_id() {
    let (router, _) = test_app().await;

    let (status, body) = send_json(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let (status, body) = send_json(&router, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["app"], "policy-registry");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (_, headers, _) = send(
        &router,
        Method::GET,
        "/health",
        &[("x-request-id", "trace-42")],
        None,
    )
    .await;
    assert_eq!(header_str(&headers, "x-request-id"), "trace-42");

    let (_, headers, _) = send(&router, Method::GET, "/version", &[], None).await;
    assert!(!header_str(&headers, "x-request-id").is_empty());
}

#[tokio::test]
async fn health_reports_degraded_when_store_is_closed() {
    let store = PolicyStore::in_memory().await.expect("in-memory store");
    let config = GatewayConfig::from_kv(&HashMap::new()).expect("default config");
    let router = app(AppState::new(config, store.clone()));

    store.close().await;

    let (status, body) = send_json(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert!(!body["error"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn negative_zero_premium_round_trips_through_api() {
    let (router, _) = test_app().await;

    let created = create(&router, "Z-0", "Zed", -0.0, "active").await;
    let (status, fetched) = send_json(&router, Method::GET, "/policies/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created, fetched);
    assert_eq!(serde_json::to_string(&created["premium"]).expect("json"), "0.0");
}

#[tokio::test]
async fn index_page_lists_matches_newest_first() {
    let (router, _) = test_app().await;
    create(&router, "I-1", "Ivy", 1.0, "active").await;
    create(&router, "I-2", "Ian <admin>", 2.25, "active").await;
    create(&router, "J-3", "Jo", 3.0, "lapsed").await;

    let (status, headers, bytes) = send(&router, Method::GET, "/?q=active", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(header_str(&headers, "content-type").starts_with("text/html"));

    let html = String::from_utf8(bytes).expect("utf-8 html");
    assert!(html.contains("2 policies"));
    assert!(html.contains("Ian &lt;admin&gt;"));
    assert!(html.contains("<td>2.25</td>"));
    assert!(!html.contains("J-3"));
    let newer = html.find("I-2").expect("I-2 row");
    let older = html.find("I-1").expect("I-1 row");
    assert!(newer < older);
}

#[tokio::test]
async fn metrics_exposes_request_counters() {
    let (router, _) = test_app().await;
    let _ = send(&router, Method::GET, "/health", &[], None).await;

    let (status, _, bytes) = send(&router, Method::GET, "/metrics", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).expect("utf-8 metrics");
    assert!(text.contains("polreg_gateway_http_requests_total"));
    assert!(text.contains("route=\"/health\""));
}
