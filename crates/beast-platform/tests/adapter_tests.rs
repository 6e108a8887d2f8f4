//! Adapter behaviour through each platform's native entry point
//!
//! HTTP adapters are driven through their axum router with `oneshot`, the
//! function adapter through `handle`.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use async_trait::async_trait;
use beast_core::{
    AgentCore, AgentId, AgentIdentity, AnalysisError, AnalysisInput, Analyzer, CoreOptions,
    Headers, PayloadLimits, Platform, Response,
};
use beast_mesh::{Coordinator, CoordinatorConfig, InMemoryBus};
use beast_platform::{
    CloudFunctionsAdapter, CloudRunAdapter, FunctionBody, FunctionRequest, GkeAdapter,
    PlatformAdapter, http,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

fn core(platform: Platform) -> Arc<AgentCore> {
    let identity = AgentIdentity::with_id(AgentId::parse("agent-test").unwrap(), platform);
    Arc::new(AgentCore::new(Arc::new(identity)))
}

fn small_limits() -> PayloadLimits {
    PayloadLimits {
        max_bytes: 256,
        max_depth: 8,
    }
}

fn gke_app(core: Arc<AgentCore>) -> Router {
    http::router(
        Arc::new(GkeAdapter::new(core, small_limits())),
        Duration::from_secs(5),
    )
}

fn cloud_run_app(core: Arc<AgentCore>) -> Router {
    http::router(
        Arc::new(CloudRunAdapter::new(core, small_limits())),
        Duration::from_secs(5),
    )
}

/// Send one request and return the status plus the decoded envelope
async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_gke_analyze_scenario() {
    let app = gke_app(core(Platform::Gke));
    let (status, envelope) = call(&app, post("/analyze", r#"{"data":"x"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["status_code"], 200);
    assert_eq!(envelope["data"]["input_data"]["data"], "x");
    assert_eq!(envelope["data"]["analysis_result"]["status"], "analyzed");
    assert_eq!(envelope["headers"]["x-platform"], "gke");
    assert!(envelope["headers"]["x-correlation-id"].is_string());
}

#[tokio::test]
async fn test_health_is_healthy_without_coordination() {
    for app in [cloud_run_app(core(Platform::CloudRun)), gke_app(core(Platform::Gke))] {
        let (status, envelope) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope["data"]["status"], "healthy");
        assert_eq!(envelope["data"]["checks"]["coordination"], "disabled");
    }
}

#[tokio::test]
async fn test_validation_failures_share_one_envelope() {
    let app = cloud_run_app(core(Platform::CloudRun));

    let oversized = format!(r#"{{"data":"{}"}}"#, "a".repeat(400));
    let (status, envelope) = call(&app, post("/analyze", &oversized)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(envelope["status_code"], 413);
    assert_eq!(envelope["data"]["error"], "payload_too_large");

    let (status, envelope) = call(&app, get("/analyze")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(envelope["data"]["error"], "method_not_allowed");

    let (status, envelope) = call(&app, post("/summarize", r#"{"data":"x"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["data"]["status"], "error");

    let (status, envelope) = call(&app, get("/summarize")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["data"]["error"], "invalid_request");

    let (status, _) = call(&app, post("/analyze", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, post("/analyze", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_probes_answer_without_dispatch() {
    let core = core(Platform::CloudRun);
    let app = cloud_run_app(core.clone());

    let (status, body) = call(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, _) = call(&app, get("/live")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(core.metrics().snapshot().total_requests, 0);
}

struct StalledAnalyzer;

#[async_trait]
impl Analyzer for StalledAnalyzer {
    async fn analyze(&self, _input: AnalysisInput<'_>) -> Result<Value, AnalysisError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(json!({}))
    }
}

#[tokio::test]
async fn test_timed_out_analyze_counts_as_server_error() {
    let core = Arc::new(
        AgentCore::new(Arc::new(AgentIdentity::new(Platform::CloudRun)))
            .with_analyzer(Arc::new(StalledAnalyzer)),
    );
    let app = http::router(
        Arc::new(CloudRunAdapter::new(core.clone(), small_limits())),
        Duration::from_millis(50),
    );

    let (status, envelope) = call(&app, post("/analyze", r#"{"data":"x"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(envelope["data"]["message"], "Internal server error");

    let snapshot = core.metrics().snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.error_count, 1);
    assert_eq!(snapshot.count("analyze", 500), 1);
    assert!(snapshot.rejected.is_empty());
}

#[tokio::test]
async fn test_gke_echoes_mesh_trace_headers() {
    let app = gke_app(core(Platform::Gke));
    let request = Request::builder()
        .uri("/health")
        .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        .header("x-b3-traceid", "80f198ee56343ba8")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()["traceparent"],
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
    );
    assert_eq!(response.headers()["x-b3-traceid"], "80f198ee56343ba8");
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let app = cloud_run_app(core(Platform::CloudRun));
    let request = Request::builder()
        .uri("/")
        .header("x-correlation-id", "req-123")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-correlation-id"], "req-123");
}

#[tokio::test]
async fn test_gke_readiness_follows_discovery() {
    let bus = Arc::new(InMemoryBus::new());
    let identity = Arc::new(AgentIdentity::new(Platform::Gke));
    let coordinator = Arc::new(
        Coordinator::new(
            &identity,
            bus,
            CoordinatorConfig {
                discovery_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let core = Arc::new(AgentCore::new(identity).with_coordinator(coordinator.clone()));
    let adapter = GkeAdapter::new(core, small_limits());

    assert!(!adapter.readiness().await.is_ok());
    coordinator.start().await.unwrap();
    assert!(adapter.readiness().await.is_ok());

    coordinator.shutdown().await;
    assert!(!adapter.readiness().await.is_ok());
}

#[tokio::test]
async fn test_gke_readiness_with_unreachable_bus() {
    let bus = InMemoryBus::new();
    bus.set_reachable(false);
    let identity = Arc::new(AgentIdentity::new(Platform::Gke));
    let coordinator = Arc::new(
        Coordinator::new(&identity, Arc::new(bus), CoordinatorConfig::default()).unwrap(),
    );
    assert!(coordinator.start().await.is_err());

    let optional = GkeAdapter::new(
        Arc::new(AgentCore::new(identity.clone()).with_coordinator(coordinator.clone())),
        small_limits(),
    );
    assert!(optional.readiness().await.is_ok());

    let required = GkeAdapter::new(
        Arc::new(
            AgentCore::new(identity)
                .with_coordinator(coordinator)
                .with_options(CoreOptions {
                    coordination_required: true,
                    ..Default::default()
                }),
        ),
        small_limits(),
    );
    assert!(!required.readiness().await.is_ok());
    let health = required
        .core()
        .dispatch(beast_core::Request::new(
            beast_core::Capability::Health,
            Default::default(),
            Headers::new(),
        ))
        .await;
    assert_eq!(health.status_code(), 503);
    assert_eq!(health.data()["status"], "unhealthy");
}

#[tokio::test]
async fn test_function_invocation_round_trip() {
    let adapter = CloudFunctionsAdapter::new(core(Platform::CloudFunctions), small_limits());

    let reply = adapter
        .handle(FunctionRequest::analyze(json!({"data": "sample"})))
        .await;
    assert_eq!(reply.status_code, 200);

    let (body, status_code) = reply.into_parts();
    let response = Response::from_envelope(body).unwrap();
    assert_eq!(response.status_code(), status_code);
    assert_eq!(response.data()["input_data"], json!({"data": "sample"}));
    assert_eq!(response.headers()["x-platform"], "cloud_functions");
}

#[tokio::test]
async fn test_function_rejects_bad_bodies() {
    let adapter = CloudFunctionsAdapter::new(core(Platform::CloudFunctions), small_limits());

    let raw = FunctionRequest::new("POST", "")
        .with_body(FunctionBody::Raw(b"not json".to_vec()));
    assert_eq!(adapter.handle(raw).await.status_code, 400);

    let list = FunctionRequest::analyze(json!(["a", "b"]));
    let reply = adapter.handle(list).await;
    assert_eq!(reply.status_code, 400);
    assert_eq!(reply.body["data"]["error"], "invalid_request");

    let big = FunctionRequest::analyze(json!({"data": "a".repeat(400)}));
    assert_eq!(adapter.handle(big).await.status_code, 413);
}

#[tokio::test]
async fn test_function_probes_are_immediate() {
    let adapter = CloudFunctionsAdapter::new(core(Platform::CloudFunctions), small_limits());
    let probes = async {
        assert!(adapter.readiness().await.is_ok());
        assert!(adapter.liveness().await.is_ok());
    };
    tokio::time::timeout(Duration::from_millis(50), probes)
        .await
        .unwrap();
}
