//! Platform-independent dispatcher
//!
//! [`AgentCore`] routes a normalized [`Request`] to one of the fixed
//! capabilities and always answers with a well-formed [`Response`]. Handler
//! errors and panics are logged here and converted to sanitized responses,
//! so adapters never see a raw failure.

use futures::FutureExt;
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::analyzer::{AnalysisInput, Analyzer, DefaultAnalyzer};
use crate::coordination::{ClaimGuard, ClaimId, ClaimOutcome, CoordinationSnapshot, WorkCoordinator};
use crate::error::{AgentError, AgentResult, AnalysisError, ValidationError};
use crate::identity::AgentIdentity;
use crate::metrics::{AgentMetrics, ClaimEvent, memory_usage_mb};
use crate::model::{CORRELATION_ID_HEADER, Capability, Request, Response};

const SERVICE_NAME: &str = "Beast AI Dev Agent";

/// Dispatcher behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreOptions {
    /// Pass `custom` capabilities to the analyzer instead of rejecting them
    pub accept_custom: bool,
    /// An unreachable bus makes the agent unhealthy rather than degraded
    pub coordination_required: bool,
}

/// The dispatcher shared by every adapter
pub struct AgentCore {
    identity: Arc<AgentIdentity>,
    analyzer: Arc<dyn Analyzer>,
    coordinator: Option<Arc<dyn WorkCoordinator>>,
    metrics: Arc<AgentMetrics>,
    options: CoreOptions,
}

impl AgentCore {
    /// Core with the default analyzer and coordination disabled
    pub fn new(identity: Arc<AgentIdentity>) -> Self {
        Self {
            identity,
            analyzer: Arc::new(DefaultAnalyzer::new()),
            coordinator: None,
            metrics: Arc::new(AgentMetrics::new()),
            options: CoreOptions::default(),
        }
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn WorkCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: CoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity(&self) -> &Arc<AgentIdentity> {
        &self.identity
    }

    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }

    pub fn options(&self) -> CoreOptions {
        self.options
    }

    pub fn coordination_enabled(&self) -> bool {
        self.coordinator.is_some()
    }

    /// Current coordination state, or `None` when coordination is disabled
    pub async fn coordination_snapshot(&self) -> Option<CoordinationSnapshot> {
        match &self.coordinator {
            Some(coordinator) => Some(coordinator.snapshot().await),
            None => None,
        }
    }

    /// Count a request an adapter rejected before building a [`Request`]
    pub fn record_rejected(&self, status: u16) {
        self.metrics.record_rejected(status);
    }

    /// Execute one request; never fails
    pub async fn dispatch(&self, request: Request) -> Response {
        let started = Instant::now();
        let capability = request.capability().clone();
        let correlation_id = request.correlation_id().clone();

        let outcome = AssertUnwindSafe(self.handle(&request)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                match &err {
                    AgentError::Internal(detail) => error!(
                        correlation_id = %correlation_id,
                        capability = %capability,
                        error = %detail,
                        "Capability handler failed"
                    ),
                    other => debug!(
                        correlation_id = %correlation_id,
                        capability = %capability,
                        error = %other,
                        "Request not served"
                    ),
                }
                Response::from_error(&err)
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    correlation_id = %correlation_id,
                    capability = %capability,
                    panic = %detail,
                    "Capability handler panicked"
                );
                Response::from_error(&AgentError::Internal(detail))
            }
        };

        let elapsed = started.elapsed();
        self.metrics
            .record_request(&capability, response.status_code(), elapsed);
        info!(
            correlation_id = %correlation_id,
            capability = %capability,
            status_code = response.status_code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request dispatched"
        );

        response.with_header(CORRELATION_ID_HEADER, correlation_id.as_str())
    }

    async fn handle(&self, request: &Request) -> AgentResult<Response> {
        match request.capability() {
            Capability::Info => Ok(Response::ok(self.info())),
            Capability::Health => Ok(self.health().await),
            Capability::Metrics => self.metrics_report().await.map(Response::ok),
            Capability::Analyze => self.analyze(request).await,
            Capability::Custom(name) => {
                if !self.options.accept_custom {
                    return Err(ValidationError::UnsupportedCapability(name.clone()).into());
                }
                let data = self
                    .analyzer
                    .custom(name, self.analysis_input(request))
                    .await
                    .map_err(|e| self.analysis_failed(request, e))?;
                Ok(Response::ok(data))
            }
        }
    }

    fn info(&self) -> Value {
        let platform = self.identity.platform();
        json!({
            "service": SERVICE_NAME,
            "version": self.identity.version(),
            "agent_id": self.identity.agent_id(),
            "platform": platform.as_str(),
            "status": "running",
            "capabilities": self.identity.capability_names(),
            "platform_features": platform.features(),
            "platform_constraints": platform.constraints(),
        })
    }

    async fn health(&self) -> Response {
        let (status, status_code, coordination) = match &self.coordinator {
            None => ("healthy", 200, json!("disabled")),
            Some(coordinator) => {
                let snapshot = coordinator.snapshot().await;
                let detail = json!({
                    "state": snapshot.state.as_str(),
                    "view": snapshot.view.as_str(),
                    "peers": snapshot.peers.len(),
                });
                if snapshot.view.is_ok() {
                    ("healthy", 200, detail)
                } else if self.options.coordination_required {
                    ("unhealthy", 503, detail)
                } else {
                    ("degraded", 200, detail)
                }
            }
        };

        Response::with_status(
            status_code,
            json!({
                "status": status,
                "agent_id": self.identity.agent_id(),
                "platform": self.identity.platform().as_str(),
                "checks": {
                    "process": "ok",
                    "coordination": coordination,
                },
            }),
        )
    }

    async fn metrics_report(&self) -> AgentResult<Value> {
        let mut report = serde_json::to_value(self.metrics.snapshot())
            .map_err(|e| AgentError::Internal(format!("metrics serialization: {e}")))?;

        let coordination = match self.coordination_snapshot().await {
            Some(snapshot) => json!({
                "state": snapshot.state.as_str(),
                "view": snapshot.view.as_str(),
                "peers": snapshot.peers.len(),
                "claims_held": snapshot.claims_held,
            }),
            None => json!("disabled"),
        };

        if let Some(map) = report.as_object_mut() {
            map.insert("agent_id".into(), json!(self.identity.agent_id()));
            map.insert("platform".into(), json!(self.identity.platform().as_str()));
            map.insert("memory_usage_mb".into(), json!(memory_usage_mb()));
            map.insert("coordination".into(), coordination);
        }
        Ok(report)
    }

    async fn analyze(&self, request: &Request) -> AgentResult<Response> {
        if request.payload().is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }

        let guard = self.claim(request).await?;
        let started = Instant::now();
        let result = self.analyzer.analyze(self.analysis_input(request)).await;

        if let Some(guard) = guard {
            guard.release();
        }

        let data = result.map_err(|e| self.analysis_failed(request, e))?;
        Ok(Response::ok(data)
            .with_header("x-platform", self.identity.platform().as_str())
            .with_header(
                "x-response-time",
                format!("{:.4}", started.elapsed().as_secs_f64()),
            ))
    }

    /// Consult coordination before analyze; `None` means proceed unclaimed
    async fn claim(&self, request: &Request) -> AgentResult<Option<ClaimGuard>> {
        let Some(coordinator) = &self.coordinator else {
            return Ok(None);
        };

        let claim_id = ClaimId::derive(request.correlation_id(), request.capability());
        self.metrics.record_claim(ClaimEvent::Attempted);

        match coordinator.try_claim(&claim_id).await {
            ClaimOutcome::Acquired(guard) => {
                self.metrics.record_claim(ClaimEvent::Acquired);
                debug!(claim_id = %claim_id, "Claim acquired");
                // Counted on drop too, so panics and cancellation are seen
                let metrics = Arc::clone(&self.metrics);
                Ok(Some(guard.with_release_hook(move |_| {
                    metrics.record_claim(ClaimEvent::Released);
                })))
            }
            ClaimOutcome::Lost { claim_id } => {
                self.metrics.record_claim(ClaimEvent::Lost);
                info!(
                    claim_id = %claim_id,
                    correlation_id = %request.correlation_id(),
                    "Claim held by a peer, skipping work"
                );
                Err(AgentError::ClaimConflict {
                    claim_id: claim_id.to_string(),
                })
            }
            ClaimOutcome::Unavailable { reason } => {
                self.metrics.record_claim(ClaimEvent::Unavailable);
                warn!(
                    claim_id = %claim_id,
                    reason = %reason,
                    "Coordination unavailable, proceeding without a claim"
                );
                Ok(None)
            }
        }
    }

    fn analysis_input<'a>(&self, request: &'a Request) -> AnalysisInput<'a> {
        AnalysisInput {
            payload: request.payload(),
            correlation_id: request.correlation_id(),
            platform: self.identity.platform(),
        }
    }

    fn analysis_failed(&self, request: &Request, err: AnalysisError) -> AgentError {
        if let AnalysisError::Failed(_) = &err {
            error!(
                correlation_id = %request.correlation_id(),
                error = %err,
                "Analyzer failed"
            );
        }
        err.into()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationState, ViewHealth};
    use crate::identity::Platform;
    use crate::model::{Headers, Payload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    fn request(capability: Capability, body: Value) -> Request {
        Request::new(capability, payload(body), Headers::new())
    }

    fn core() -> AgentCore {
        AgentCore::new(Arc::new(AgentIdentity::new(Platform::CloudRun)))
    }

    struct FixedCoordinator {
        outcome: fn(&ClaimId, Arc<AtomicUsize>) -> ClaimOutcome,
        view: ViewHealth,
        released: Arc<AtomicUsize>,
    }

    impl FixedCoordinator {
        fn new(outcome: fn(&ClaimId, Arc<AtomicUsize>) -> ClaimOutcome, view: ViewHealth) -> Self {
            Self {
                outcome,
                view,
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl WorkCoordinator for FixedCoordinator {
        async fn try_claim(&self, claim_id: &ClaimId) -> ClaimOutcome {
            (self.outcome)(claim_id, self.released.clone())
        }

        async fn snapshot(&self) -> CoordinationSnapshot {
            CoordinationSnapshot {
                state: CoordinationState::Active,
                view: self.view,
                peers: Vec::new(),
                claims_held: 0,
                last_refresh: None,
            }
        }
    }

    fn acquired(claim_id: &ClaimId, released: Arc<AtomicUsize>) -> ClaimOutcome {
        ClaimOutcome::Acquired(ClaimGuard::new(claim_id.clone(), move |_| {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn lost(claim_id: &ClaimId, _: Arc<AtomicUsize>) -> ClaimOutcome {
        ClaimOutcome::Lost {
            claim_id: claim_id.clone(),
        }
    }

    fn unavailable(_: &ClaimId, _: Arc<AtomicUsize>) -> ClaimOutcome {
        ClaimOutcome::Unavailable {
            reason: "bus down".into(),
        }
    }

    struct PanickingAnalyzer;

    #[async_trait]
    impl Analyzer for PanickingAnalyzer {
        async fn analyze(&self, _input: AnalysisInput<'_>) -> Result<Value, AnalysisError> {
            panic!("analyzer exploded with secret=42");
        }
    }

    #[tokio::test]
    async fn test_info_lists_identity() {
        let core = core();
        let response = core.dispatch(request(Capability::Info, json!({}))).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.data()["service"], SERVICE_NAME);
        assert_eq!(response.data()["platform"], "cloud_run");
        assert_eq!(
            response.data()["capabilities"],
            json!(["info", "health", "analyze", "metrics"])
        );
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    }

    #[tokio::test]
    async fn test_health_without_coordination() {
        let response = core().dispatch(request(Capability::Health, json!({}))).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.data()["status"], "healthy");
        assert_eq!(response.data()["checks"]["coordination"], "disabled");
    }

    #[tokio::test]
    async fn test_health_degraded_and_unhealthy() {
        let core = core().with_coordinator(Arc::new(FixedCoordinator::new(
            acquired,
            ViewHealth::Unreachable,
        )));
        let response = core.dispatch(request(Capability::Health, json!({}))).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.data()["status"], "degraded");

        let core = core.with_options(CoreOptions {
            coordination_required: true,
            ..Default::default()
        });
        let response = core.dispatch(request(Capability::Health, json!({}))).await;
        assert_eq!(response.status_code(), 503);
        assert_eq!(response.data()["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_analyze_sets_headers() {
        let response = core()
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.data()["input_data"]["data"], "x");
        assert_eq!(response.headers()["x-platform"], "cloud_run");
        assert!(response.headers().contains_key("x-response-time"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_payload() {
        let response = core().dispatch(request(Capability::Analyze, json!({}))).await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.data()["status"], "error");
    }

    #[tokio::test]
    async fn test_custom_rejected_unless_enabled() {
        let response = core()
            .dispatch(request(Capability::Custom("summarize".into()), json!({"a": 1})))
            .await;
        assert_eq!(response.status_code(), 400);

        // Accepted, but the default analyzer has no handler for it
        let core = core().with_options(CoreOptions {
            accept_custom: true,
            ..Default::default()
        });
        let response = core
            .dispatch(request(Capability::Custom("summarize".into()), json!({"a": 1})))
            .await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(core.metrics().snapshot().count("custom", 400), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_sanitized_500() {
        let core = core().with_analyzer(Arc::new(PanickingAnalyzer));
        let response = core
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.data()["message"], "Internal server error");
        assert!(!response.data().to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_claim_acquired_is_released() {
        let coordinator = Arc::new(FixedCoordinator::new(acquired, ViewHealth::Fresh));
        let released = coordinator.released.clone();
        let core = core().with_coordinator(coordinator);

        let response = core
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let claims = core.metrics().snapshot().claims;
        assert_eq!(claims.attempted, 1);
        assert_eq!(claims.acquired, 1);
        assert_eq!(claims.released, 1);
    }

    #[tokio::test]
    async fn test_claim_released_when_analyzer_panics() {
        let coordinator = Arc::new(FixedCoordinator::new(acquired, ViewHealth::Fresh));
        let released = coordinator.released.clone();
        let core = core()
            .with_coordinator(coordinator)
            .with_analyzer(Arc::new(PanickingAnalyzer));

        let response = core
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(core.metrics().snapshot().claims.released, 1);
    }

    #[tokio::test]
    async fn test_claim_lost_skips_work() {
        let core = core().with_coordinator(Arc::new(FixedCoordinator::new(lost, ViewHealth::Fresh)));
        let response = core
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 409);
        assert_eq!(response.data()["status"], "duplicate");
        assert!(response.data()["claim_id"].is_string());
        assert_eq!(core.metrics().snapshot().claims.lost, 1);
    }

    #[tokio::test]
    async fn test_unavailable_coordination_proceeds() {
        let core = core().with_coordinator(Arc::new(FixedCoordinator::new(
            unavailable,
            ViewHealth::Unreachable,
        )));
        let response = core
            .dispatch(request(Capability::Analyze, json!({"data": "x"})))
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(core.metrics().snapshot().claims.unavailable, 1);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_is_read_only() {
        let core = core();
        core.dispatch(request(Capability::Info, json!({}))).await;

        let first = core.dispatch(request(Capability::Metrics, json!({}))).await;
        assert_eq!(first.status_code(), 200);
        assert_eq!(first.data()["requests"]["info"]["200"], 1);
        assert_eq!(first.data()["coordination"], "disabled");
        assert!(first.data()["memory_usage_mb"].is_number());
    }
}
