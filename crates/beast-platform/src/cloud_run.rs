//! Cloud Run: a long-lived HTTP listener scaled by request load
//!
//! Probes never depend on in-flight work or on coordination; once the
//! listener is up the instance can take traffic.

use async_trait::async_trait;
use beast_core::{AgentCore, Platform, PayloadLimits, Request, Response, ValidationError};
use std::sync::Arc;

use crate::adapter::{PlatformAdapter, ProbeStatus};
use crate::http::{self, HttpReply, HttpRequest};

pub struct CloudRunAdapter {
    core: Arc<AgentCore>,
    limits: PayloadLimits,
}

impl CloudRunAdapter {
    pub fn new(core: Arc<AgentCore>, limits: PayloadLimits) -> Self {
        Self { core, limits }
    }
}

#[async_trait]
impl PlatformAdapter for CloudRunAdapter {
    type Invocation = HttpRequest;
    type Reply = HttpReply;

    fn platform(&self) -> Platform {
        Platform::CloudRun
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
        ProbeStatus::Ok
    }

    async fn liveness(&self) -> ProbeStatus {
        ProbeStatus::Ok
    }
}
