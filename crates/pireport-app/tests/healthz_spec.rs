use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use pireport_server::{DatasetSource, ReportError, build_api_router};

struct EmptySource;

#[async_trait::async_trait]
impl DatasetSource for EmptySource {
    async fn fetch_csv(&self) -> Result<String, ReportError> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn healthz_returns_ok_json() {
    let app = build_api_router(Arc::new(EmptySource));
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/healthz")
                .body(Body::empty())
                .expect("request builder should not fail"),
        )
        .await
        .expect("healthz handler should respond");

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .expect("content-type header present")
        .to_str()
        .expect("content-type must be valid utf-8");
    assert_eq!(content_type, "application/json; charset=utf-8");

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    let value: Value =
        serde_json::from_slice(body_bytes.as_ref()).expect("healthz response must be valid JSON");
    assert_eq!(value, json!({ "status": "ok" }));
}

#[tokio::test]
async fn healthz_rejects_post() {
    let app = build_api_router(Arc::new(EmptySource));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/healthz")
                .body(Body::empty())
                .expect("request builder should not fail"),
        )
        .await
        .expect("handler should respond");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
