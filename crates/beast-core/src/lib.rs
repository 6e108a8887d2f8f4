//! # Beast Core
//!
//! Platform-independent heart of the Beast agent: the request/response
//! model, the capability dispatcher and the seams it exposes to platform
//! adapters and to the coordination layer.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use beast_core::{AgentCore, AgentIdentity, Capability, Headers, Platform, Request};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let identity = Arc::new(AgentIdentity::new(Platform::CloudRun));
//! let core = AgentCore::new(identity);
//!
//! let request = Request::new(Capability::Health, Default::default(), Headers::new());
//! let response = core.dispatch(request).await;
//! assert_eq!(response.status_code(), 200);
//! # }
//! ```

pub mod agent;
pub mod analyzer;
pub mod config;
pub mod coordination;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod model;

pub use agent::{AgentCore, CoreOptions};
pub use analyzer::{AnalysisInput, Analyzer, DefaultAnalyzer};
pub use config::{AgentConfig, AgentConfigBuilder, BeastModeConfig, ConfigError};
pub use coordination::{
    ClaimGuard, ClaimId, ClaimOutcome, CoordinationSnapshot, CoordinationState, PeerSummary,
    ViewHealth, WorkCoordinator,
};
pub use error::{AgentError, AgentResult, AnalysisError, ErrorCode, ValidationError};
pub use identity::{AgentId, AgentIdentity, IdValidationError, Platform, UnknownPlatform};
pub use metrics::{AgentMetrics, ClaimCounts, ClaimEvent, MetricsSnapshot, memory_usage_mb};
pub use model::{
    CORRELATION_ID_HEADER, Capability, CorrelationId, Headers, Payload, PayloadLimits,
    REQUEST_ID_HEADER, Request, Response,
};
