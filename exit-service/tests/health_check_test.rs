mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use common::{draft_json, TestApp};
use tower::util::ServiceExt;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let (status, body) = app.call(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "exit-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let (status, _) = app.call(Method::GET, "/ready", None, None).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn metrics_expose_transition_counters() {
    let app = TestApp::spawn().await;
    exit_service::services::init_metrics();

    let (status, _) = app
        .call(Method::POST, "/requests", Some(app.student), Some(draft_json()))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("exit_transitions_total"));
}
