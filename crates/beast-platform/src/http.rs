//! HTTP plumbing shared by the Cloud Run and GKE adapters
//!
//! Both HTTP platforms route every path through the adapter: `/ready` and
//! `/live` answer probes, anything else falls through to the capability
//! router in [`Capability::from_route`]. Bodies are read up to the payload
//! limit so oversized input is rejected with the same envelope on every
//! platform.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode, header::CONTENT_LENGTH},
    response::IntoResponse,
    routing::get,
};
use beast_core::{AgentError, Capability, Headers, PayloadLimits, Request, Response, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::adapter::{PlatformAdapter, ProbeStatus};

/// Native invocation of the HTTP platforms
pub type HttpRequest = axum::extract::Request;
/// Native reply of the HTTP platforms
pub type HttpReply = axum::response::Response;

/// Normalize an HTTP request against the payload limits
pub async fn receive(request: HttpRequest, limits: &PayloadLimits) -> Result<Request, ValidationError> {
    let (parts, body) = request.into_parts();
    let capability = Capability::from_route(parts.method.as_str(), parts.uri.path())?;

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared
        && size > limits.max_bytes
    {
        return Err(ValidationError::PayloadTooLarge {
            size,
            limit: limits.max_bytes,
        });
    }

    // Chunked bodies carry no length; stop reading one byte past the limit
    let bytes = axum::body::to_bytes(body, limits.max_bytes)
        .await
        .map_err(|_| ValidationError::PayloadTooLarge {
            size: limits.max_bytes.saturating_add(1),
            limit: limits.max_bytes,
        })?;
    let payload = limits.parse_body(&bytes)?;

    let headers: Headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();

    Ok(Request::new(capability, payload, headers))
}

/// Render a response as `{status_code, data, headers}` with matching HTTP
/// status and headers
pub fn emit(response: &Response) -> HttpReply {
    let status =
        StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut reply = (status, Json(response.envelope())).into_response();

    let headers = reply.headers_mut();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    reply
}

fn probe_reply(probe: ProbeStatus) -> HttpReply {
    let status = StatusCode::from_u16(probe.status_code()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (status, Json(probe.to_json())).into_response()
}

struct HttpState<A> {
    adapter: Arc<A>,
    request_timeout: Duration,
}

impl<A> Clone for HttpState<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            request_timeout: self.request_timeout,
        }
    }
}

/// Build the axum router serving an HTTP adapter
///
/// Requests running longer than `request_timeout` are cancelled; dropping
/// the in-flight future releases any claim it holds.
pub fn router<A>(adapter: Arc<A>, request_timeout: Duration) -> Router
where
    A: PlatformAdapter<Invocation = HttpRequest, Reply = HttpReply> + 'static,
{
    Router::new()
        .route("/ready", get(readiness::<A>))
        .route("/live", get(liveness::<A>))
        .fallback(invoke::<A>)
        .with_state(HttpState {
            adapter,
            request_timeout,
        })
        .layer(TraceLayer::new_for_http())
}

async fn readiness<A>(State(state): State<HttpState<A>>) -> HttpReply
where
    A: PlatformAdapter<Invocation = HttpRequest, Reply = HttpReply> + 'static,
{
    probe_reply(state.adapter.readiness().await)
}

async fn liveness<A>(State(state): State<HttpState<A>>) -> HttpReply
where
    A: PlatformAdapter<Invocation = HttpRequest, Reply = HttpReply> + 'static,
{
    probe_reply(state.adapter.liveness().await)
}

async fn invoke<A>(State(state): State<HttpState<A>>, request: HttpRequest) -> HttpReply
where
    A: PlatformAdapter<Invocation = HttpRequest, Reply = HttpReply> + 'static,
{
    let limit = state.request_timeout;
    let capability = Capability::from_route(request.method().as_str(), request.uri().path()).ok();
    match timeout(limit, state.adapter.handle(request)).await {
        Ok(reply) => reply,
        Err(_) => {
            warn!(
                platform = state.adapter.platform().as_str(),
                timeout = ?limit,
                "Request timed out and was cancelled"
            );
            let err = AgentError::Internal(format!("request exceeded {limit:?}"));
            let core = state.adapter.core();
            match &capability {
                Some(capability) => {
                    core.metrics()
                        .record_request(capability, err.status_code(), limit);
                }
                None => core.record_rejected(err.status_code()),
            }
            state.adapter.emit(Response::from_error(&err))
        }
    }
}
