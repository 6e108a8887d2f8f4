//! The capability set every platform adapter implements
//!
//! An adapter knows how to turn its platform's native invocation into a
//! [`Request`], how to turn a [`Response`] back into the platform's reply and
//! how to answer the platform's lifecycle probes. Everything in between is
//! the shared [`AgentCore`].

use async_trait::async_trait;
use beast_core::{AgentCore, AgentError, Platform, Request, Response, ValidationError};
use serde_json::{Value, json};
use tracing::debug;

/// Result of a readiness or liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    Unavailable { reason: String },
}

impl ProbeStatus {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn status_code(&self) -> u16 {
        if self.is_ok() { 200 } else { 503 }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Ok => json!({ "status": "ok" }),
            Self::Unavailable { reason } => json!({ "status": "unavailable", "reason": reason }),
        }
    }
}

/// One hosting platform's invocation contract
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Native invocation handed over by the platform
    type Invocation: Send + 'static;
    /// Native reply handed back to the platform
    type Reply: Send + 'static;

    fn platform(&self) -> Platform;

    fn core(&self) -> &AgentCore;

    /// Validate a native invocation and normalize it
    async fn receive(&self, invocation: Self::Invocation) -> Result<Request, ValidationError>;

    /// Render a normalized response in the platform's native shape
    fn emit(&self, response: Response) -> Self::Reply;

    /// Whether the platform should route traffic to this instance
    async fn readiness(&self) -> ProbeStatus;

    /// Whether the process should be kept alive
    async fn liveness(&self) -> ProbeStatus;

    /// Serve one invocation end to end
    async fn handle(&self, invocation: Self::Invocation) -> Self::Reply {
        let response = respond(self, invocation).await;
        self.emit(response)
    }
}

/// Receive and dispatch, turning a rejected invocation into its error response
pub async fn respond<A>(adapter: &A, invocation: A::Invocation) -> Response
where
    A: PlatformAdapter + ?Sized,
{
    match adapter.receive(invocation).await {
        Ok(request) => adapter.core().dispatch(request).await,
        Err(err) => {
            debug!(
                platform = adapter.platform().as_str(),
                error = %err,
                "Invocation rejected"
            );
            let err = AgentError::from(err);
            adapter.core().record_rejected(err.status_code());
            Response::from_error(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_status_rendering() {
        assert_eq!(ProbeStatus::Ok.status_code(), 200);
        assert_eq!(ProbeStatus::Ok.to_json()["status"], "ok");

        let down = ProbeStatus::unavailable("coordination discovering");
        assert!(!down.is_ok());
        assert_eq!(down.status_code(), 503);
        assert_eq!(down.to_json()["reason"], "coordination discovering");
    }
}
