#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use drnav_api::{ApiError, MockApi, StatusEntry};
use drnav_core::CanonicalService;
use drnav_http::{api_router, webhook_router, AppState};
use drnav_kubehub::StaticBearer;
use serde_json::{json, Value};
use tower::ServiceExt;

fn mock() -> MockApi {
    let mut api = MockApi::new();
    api.registry = [("svc.ns".to_string(), CanonicalService { name: "svc.ns".into(), ..Default::default() })]
        .into_iter()
        .collect();
    api.status.services.insert("svc.ns".into(), StatusEntry { mode: "active".into(), ..Default::default() });
    api
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri).header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_is_no_content() {
    let app = api_router(AppState::new(Arc::new(mock())));
    let (status, body) = send(app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn get_returns_the_registry() {
    let app = api_router(AppState::new(Arc::new(mock())));
    let (status, body) = send(app, Request::get("/sitemanager").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["svc.ns"]["name"], "svc.ns");
}

#[tokio::test]
async fn post_routes_procedures() {
    let app = api_router(AppState::new(Arc::new(mock())));
    let (status, body) = send(app.clone(), post("/sitemanager", r#"{"procedure":"list"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"allServices": ["svc.ns"]}));

    let (status, body) = send(app.clone(), post("/sitemanager", r#"{"procedure":"status","run-service":"svc.ns"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["svc.ns"]["mode"], "active");

    let (status, body) = send(app, post("/sitemanager", r#"{"procedure":"active","service":"svc.ns"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Procedure active is started", "service": "svc.ns", "procedure": "active"}));
}

#[tokio::test]
async fn failed_procedure_is_bad_request() {
    let mut api = mock();
    api.failed_procedures = true;
    let app = api_router(AppState::new(Arc::new(api)));
    let (status, body) = send(app, post("/sitemanager", r#"{"procedure":"standby","service":"svc.ns"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Procedure standby failed");
}

#[tokio::test]
async fn bad_input_is_rejected() {
    let app = api_router(AppState::new(Arc::new(mock())));
    let (status, body) = send(app.clone(), post("/sitemanager", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No valid JSON data was received");

    let (status, body) = send(app, post("/sitemanager", r#"{"procedure":"reboot"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You should define procedure from list: [list status active standby disable]");
}

#[tokio::test]
async fn api_errors_map_to_status_classes() {
    let mut api = mock();
    api.error = Some(ApiError::DependencyNotFound { missing: "X".into(), referrer: "F".into() });
    let app = api_router(AppState::new(Arc::new(api)));
    let (status, body) = send(app, post("/sitemanager", r#"{"procedure":"status","service":"E"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"message": "Dependency defined in CR doesn't exist", "wrong-service": "X", "problem-cr": "F"}));

    let mut api = mock();
    api.error = Some(ApiError::Internal { message: "store down".into(), service: None });
    let app = api_router(AppState::new(Arc::new(api)));
    let (status, _) = send(app, Request::get("/sitemanager").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn bearer_is_enforced_when_configured() {
    let state = AppState::new(Arc::new(mock())).with_bearer(Arc::new(StaticBearer(Arc::new("s3cret".into()))));
    let app = api_router(state);

    let (status, body) = send(app.clone(), Request::get("/sitemanager").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "You should use Bearer for authorization");

    let wrong = Request::get("/sitemanager").header(header::AUTHORIZATION, "Bearer nope").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), wrong).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Bearer is empty or wrong");

    let right = Request::get("/sitemanager").header(header::AUTHORIZATION, "Bearer s3cret").body(Body::empty()).unwrap();
    let (status, _) = send(app.clone(), right).await;
    assert_eq!(status, StatusCode::OK);

    // health stays open
    let (status, _) = send(app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

fn admission(op: &str, object: Value) -> String {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "req-1",
            "kind": {"group": "qubership.org", "version": "v3", "kind": "SiteManager"},
            "resource": {"group": "qubership.org", "version": "v3", "resource": "sitemanagers"},
            "requestKind": {"group": "qubership.org", "version": "v3", "kind": "SiteManager"},
            "requestResource": {"group": "qubership.org", "version": "v3", "resource": "sitemanagers"},
            "name": "svc",
            "namespace": "ns",
            "operation": op,
            "userInfo": {"username": "tester"},
            "object": object,
            "dryRun": false
        }
    })
    .to_string()
}

fn sm_object() -> Value {
    json!({
        "apiVersion": "qubership.org/v3",
        "kind": "SiteManager",
        "metadata": {"name": "svc", "namespace": "ns", "uid": "uid-9"},
        "spec": {"sitemanager": {"alias": "taken"}}
    })
}

#[tokio::test]
async fn admission_denies_conflicts_with_the_exact_message() {
    let mut api = mock();
    api.conflict = Some(ApiError::NameConflict {
        name: "taken".into(),
        message: "Can't use service alias taken, this name is used for another service".into(),
    });
    let app = webhook_router(Arc::new(api));
    let (status, body) = send(app, post("/validate", &admission("CREATE", sm_object()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["uid"], "req-1");
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(body["response"]["status"]["message"], "Can't use service alias taken, this name is used for another service");
}

#[tokio::test]
async fn admission_allows_clean_objects_and_deletes() {
    let mut api = mock();
    api.conflict = Some(ApiError::NameConflict { name: "x".into(), message: "never for delete".into() });
    let app = webhook_router(Arc::new(api));
    let (_, body) = send(app, post("/validate", &admission("DELETE", Value::Null))).await;
    assert_eq!(body["response"]["allowed"], true);

    let app = webhook_router(Arc::new(mock()));
    let (_, body) = send(app, post("/validate", &admission("UPDATE", sm_object()))).await;
    assert_eq!(body["response"]["allowed"], true);
}

#[tokio::test]
async fn conversion_review_round_trip() {
    let app = webhook_router(Arc::new(mock()));
    let review = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "request": {
            "uid": "conv-1",
            "desiredAPIVersion": "netcracker.com/v1",
            "objects": [{
                "apiVersion": "netcracker.com/v3",
                "kind": "SiteManager",
                "metadata": {"name": "svc", "namespace": "ns"},
                "spec": {"sitemanager": {"module": "stateful", "parameters": {"serviceEndpoint": "svc:8080"}}}
            }]
        }
    });
    let (status, body) = send(app.clone(), post("/convert", &review.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["uid"], "conv-1");
    assert_eq!(body["response"]["result"]["status"], "Success");
    let obj = &body["response"]["convertedObjects"][0];
    assert_eq!(obj["apiVersion"], "netcracker.com/v1");
    assert_eq!(obj["spec"]["sitemanager"]["serviceEndpoint"], "svc:8080");

    let mut failing = review;
    failing["request"]["objects"][0]["spec"]["sitemanager"]["module"] = json!("custom");
    let (_, body) = send(app, post("/convert", &failing.to_string())).await;
    assert_eq!(body["response"]["result"]["status"], "Failure");
    assert!(body["response"]["result"]["message"].as_str().unwrap().contains("custom"));
    assert_eq!(body["response"]["convertedObjects"], json!([]));
}
