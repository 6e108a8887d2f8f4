//! Cloud Functions: one synchronous invocation per activation
//!
//! There is no listener and nothing to probe, so readiness and liveness
//! answer immediately. Coordination is started lazily by the coordinator on
//! the first claim, keeping cold starts short.

use async_trait::async_trait;
use beast_core::{
    AgentCore, Capability, Headers, Payload, PayloadLimits, Platform, Request, Response,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::adapter::{PlatformAdapter, ProbeStatus};

/// Body of a function invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FunctionBody {
    #[default]
    Empty,
    /// Already decoded by the runtime
    Json(Value),
    /// Raw bytes as received
    Raw(Vec<u8>),
}

/// Request object handed to the function entry point
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRequest {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: FunctionBody,
}

impl FunctionRequest {
    /// `POST` to the entry point itself, which runs `analyze`
    pub fn analyze(body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            path: String::new(),
            headers: Headers::new(),
            body: FunctionBody::Json(body),
        }
    }

    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
            body: FunctionBody::Empty,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: FunctionBody) -> Self {
        self.body = body;
        self
    }
}

/// `(body, status_code)` pair returned to the function runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionReply {
    pub body: Value,
    pub status_code: u16,
}

impl FunctionReply {
    pub fn into_parts(self) -> (Value, u16) {
        (self.body, self.status_code)
    }
}

pub struct CloudFunctionsAdapter {
    core: Arc<AgentCore>,
    limits: PayloadLimits,
}

impl CloudFunctionsAdapter {
    pub fn new(core: Arc<AgentCore>, limits: PayloadLimits) -> Self {
        Self { core, limits }
    }

    fn capability(method: &str, path: &str) -> Result<Capability, ValidationError> {
        if path.is_empty() && method.eq_ignore_ascii_case("POST") {
            return Ok(Capability::Analyze);
        }
        Capability::from_route(method, path)
    }
}

#[async_trait]
impl PlatformAdapter for CloudFunctionsAdapter {
    type Invocation = FunctionRequest;
    type Reply = FunctionReply;

    fn platform(&self) -> Platform {
        Platform::CloudFunctions
    }

    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn receive(&self, invocation: FunctionRequest) -> Result<Request, ValidationError> {
        let capability = Self::capability(&invocation.method, &invocation.path)?;
        let payload = match invocation.body {
            FunctionBody::Empty => Payload::new(),
            FunctionBody::Json(value) => self.limits.check_value(value)?,
            FunctionBody::Raw(bytes) => self.limits.parse_body(&bytes)?,
        };
        Ok(Request::new(capability, payload, invocation.headers))
    }

    fn emit(&self, response: Response) -> FunctionReply {
        FunctionReply {
            status_code: response.status_code(),
            body: response.envelope(),
        }
    }

    async fn readiness(&self) -> ProbeStatus {
        ProbeStatus::Ok
    }

    async fn liveness(&self) -> ProbeStatus {
        ProbeStatus::Ok
    }
}
