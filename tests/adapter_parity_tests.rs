//! The same normalized request must produce the same response on every
//! platform; only transport and lifecycle differ.

use axum::body::Body;
use beast_agent::beast_core::{
    AgentCore, AgentId, AgentIdentity, PayloadLimits, Platform, Response,
};
use beast_agent::beast_platform::{
    CloudFunctionsAdapter, CloudRunAdapter, FunctionRequest, GkeAdapter, PlatformAdapter, http,
    respond,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

fn shared_core() -> Arc<AgentCore> {
    let identity = AgentIdentity::with_id(AgentId::parse("parity-agent").unwrap(), Platform::Gke);
    Arc::new(AgentCore::new(Arc::new(identity)))
}

fn http_request(method: &str, uri: &str, body: Option<&Value>) -> axum::extract::Request {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap()
}

/// `(status_code, data)` of a native HTTP reply
async fn decode_http(reply: axum::response::Response) -> (u16, Value) {
    let status = reply.status().as_u16();
    let bytes = axum::body::to_bytes(reply.into_body(), usize::MAX)
        .await
        .unwrap();
    let envelope: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(envelope["status_code"], status);
    (status, envelope["data"].clone())
}

#[tokio::test]
async fn test_info_and_health_identical_across_adapters() {
    let core = shared_core();
    let limits = PayloadLimits::default();
    let timeout = Duration::from_secs(5);
    let cloud_run = http::router(Arc::new(CloudRunAdapter::new(core.clone(), limits)), timeout);
    let gke = http::router(Arc::new(GkeAdapter::new(core.clone(), limits)), timeout);
    let functions = CloudFunctionsAdapter::new(core, limits);

    for path in ["/", "/health"] {
        let run_reply = cloud_run
            .clone()
            .oneshot(http_request("GET", path, None))
            .await
            .unwrap();
        let gke_reply = gke
            .clone()
            .oneshot(http_request("GET", path, None))
            .await
            .unwrap();
        let function_reply = functions.handle(FunctionRequest::new("GET", path)).await;

        let run = decode_http(run_reply).await;
        let gke = decode_http(gke_reply).await;
        let function = (function_reply.status_code, function_reply.body["data"].clone());

        assert_eq!(run.0, 200, "{path}");
        assert_eq!(run, gke, "{path}");
        assert_eq!(run, function, "{path}");
        assert_eq!(
            serde_json::to_vec(&run.1).unwrap(),
            serde_json::to_vec(&function.1).unwrap()
        );
    }
}

#[tokio::test]
async fn test_sample_payload_round_trips_on_http_adapters() {
    let sample = json!({"data": "sample"});
    let limits = PayloadLimits::default();
    let cloud_run = CloudRunAdapter::new(shared_core(), limits);
    let gke = GkeAdapter::new(shared_core(), limits);

    for response in [
        respond(&cloud_run, http_request("POST", "/analyze", Some(&sample))).await,
        respond(&gke, http_request("POST", "/analyze", Some(&sample))).await,
    ] {
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.data()["input_data"], sample);

        let (status, data) = decode_http(cloud_run.emit(response.clone())).await;
        assert_eq!(status, response.status_code());
        assert_eq!(&data, response.data());
    }
}

#[tokio::test]
async fn test_sample_payload_round_trips_on_functions() {
    let sample = json!({"data": "sample"});
    let adapter = CloudFunctionsAdapter::new(shared_core(), PayloadLimits::default());

    let response = respond(&adapter, FunctionRequest::analyze(sample.clone())).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.data()["input_data"], sample);

    let (body, status_code) = adapter.emit(response.clone()).into_parts();
    assert_eq!(status_code, response.status_code());
    assert_eq!(Response::from_envelope(body).unwrap(), response);
}
