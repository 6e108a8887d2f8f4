//! GKE: an orchestrated container behind a service mesh
//!
//! Readiness follows coordination: a pod that has not finished peer
//! discovery is kept out of rotation, as is one whose bus is down when the
//! bus is a required dependency. Trace headers injected by the mesh are
//! echoed on every reply so spans stay joined.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName};
use beast_core::{
    AgentCore, CoordinationState, Platform, PayloadLimits, Request, Response, ValidationError,
    ViewHealth,
};
use std::sync::Arc;

use crate::adapter::{PlatformAdapter, ProbeStatus, respond};
use crate::http::{self, HttpReply, HttpRequest};

pub struct GkeAdapter {
    core: Arc<AgentCore>,
    limits: PayloadLimits,
}

impl GkeAdapter {
    pub fn new(core: Arc<AgentCore>, limits: PayloadLimits) -> Self {
        Self { core, limits }
    }
}

fn is_trace_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name == "x-request-id" || name == "traceparent" || name.starts_with("x-b3-")
}

fn trace_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| is_trace_header(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl PlatformAdapter for GkeAdapter {
    type Invocation = HttpRequest;
    type Reply = HttpReply;

    fn platform(&self) -> Platform {
        Platform::Gke
    }

    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn receive(&self, invocation: HttpRequest) -> Result<Request, ValidationError> {
        http::receive(invocation, &self.limits).await
    }

    fn emit(&self, response: Response) -> HttpReply {
        http::emit(&response)
    }

    async fn readiness(&self) -> ProbeStatus {
        let Some(snapshot) = self.core.coordination_snapshot().await else {
            return ProbeStatus::Ok;
        };
        let required = self.core.options().coordination_required;

        match (snapshot.state, snapshot.view) {
            (_, ViewHealth::Unreachable | ViewHealth::Stale) if required => {
                ProbeStatus::unavailable(format!("coordination bus {}", snapshot.view.as_str()))
            }
            (_, ViewHealth::Unreachable | ViewHealth::Deferred) => ProbeStatus::Ok,
            (CoordinationState::Active, _) => ProbeStatus::Ok,
            (state, _) => ProbeStatus::unavailable(format!("coordination {}", state.as_str())),
        }
    }

    async fn liveness(&self) -> ProbeStatus {
        ProbeStatus::Ok
    }

    async fn handle(&self, invocation: HttpRequest) -> HttpReply {
        let echoed = trace_headers(invocation.headers());
        let mut reply = self.emit(respond(self, invocation).await);
        reply.headers_mut().extend(echoed);
        reply
    }
}
