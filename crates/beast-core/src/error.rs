//! Error taxonomy for the agent core
//!
//! Every variant maps to an HTTP-style status code so any failure can be
//! turned into a well-formed [`Response`](crate::Response). Internal detail is
//! logged where the error is raised and never rendered to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the core
pub type AgentResult<T> = Result<T, AgentError>;

/// Request rejected before it reached a capability handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Capability is not one of the fixed set and custom capabilities are off
    #[error("unsupported capability '{0}'")]
    UnsupportedCapability(String),

    /// Known capability path invoked with the wrong method
    #[error("method {method} not allowed for '{capability}'")]
    MethodNotAllowed { method: String, capability: String },

    /// Body exceeds the configured byte limit
    #[error("payload too large: {size} bytes (limit: {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Body nests deeper than the configured limit
    #[error("payload too deep: depth {depth} (limit: {limit})")]
    PayloadTooDeep { depth: usize, limit: usize },

    /// Body is not valid JSON
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    /// Body is JSON but not a key-value object
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// Capability requires a non-empty payload
    #[error("payload must not be empty")]
    EmptyPayload,

    /// Handler understood the payload but refused it
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ValidationError {
    /// HTTP-style status for this rejection
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MethodNotAllowed { .. } => 405,
            Self::PayloadTooLarge { .. } => 413,
            _ => 400,
        }
    }
}

/// Failure reported by the injected analyzer
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    /// Input was understood but cannot be analyzed
    #[error("analysis rejected input: {0}")]
    InvalidInput(String),

    /// Custom capability has no handler
    #[error("capability '{0}' is not supported by this analyzer")]
    Unsupported(String),

    /// Anything else went wrong inside the analyzer
    #[error("analysis failed: {0}")]
    Failed(String),
}

/// Top-level error taxonomy
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// Malformed or oversized request
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Coordination bus unreachable; normally recovered locally
    #[error("coordination unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Another agent holds the claim for this work
    #[error("work claimed by another agent (claim {claim_id})")]
    ClaimConflict { claim_id: String },

    /// Unexpected fault inside a capability handler
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AnalysisError> for AgentError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::InvalidInput(reason) => {
                AgentError::Validation(ValidationError::Rejected(reason))
            }
            AnalysisError::Unsupported(name) => {
                AgentError::Validation(ValidationError::UnsupportedCapability(name))
            }
            AnalysisError::Failed(detail) => AgentError::Internal(detail),
        }
    }
}

impl AgentError {
    /// HTTP-style status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(err) => err.status_code(),
            Self::CoordinationUnavailable(_) => 503,
            Self::ClaimConflict { .. } => 409,
            Self::Internal(_) => 500,
        }
    }

    /// Machine-readable code rendered in error payloads
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(ValidationError::MethodNotAllowed { .. }) => ErrorCode::MethodNotAllowed,
            Self::Validation(ValidationError::PayloadTooLarge { .. }) => ErrorCode::PayloadTooLarge,
            Self::Validation(_) => ErrorCode::InvalidRequest,
            Self::CoordinationUnavailable(_) => ErrorCode::ServiceUnavailable,
            Self::ClaimConflict { .. } => ErrorCode::Duplicate,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show to a caller
    ///
    /// Validation messages describe the caller's own input and are passed
    /// through; everything else collapses to a fixed sentence.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::CoordinationUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::ClaimConflict { .. } => {
                "Work for this request is being handled by another agent".to_string()
            }
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

/// Type-safe error codes for error payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    MethodNotAllowed,
    PayloadTooLarge,
    Duplicate,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Duplicate => "duplicate",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
