//! # Beast Agent
//!
//! Wires configuration into a running agent: identity, optional Beast Mode
//! coordinator, the shared [`AgentCore`], and the adapter for the platform
//! the process runs on.
//!
//! ```rust,no_run
//! use beast_agent::Agent;
//! use beast_core::{AgentConfig, Platform};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::from_env()?;
//!     let agent = Agent::builder(config).fallback_platform(Platform::CloudRun).build()?;
//!     agent.serve().await?;
//!     Ok(())
//! }
//! ```

pub use beast_core;
pub use beast_mesh;
pub use beast_platform;

use axum::Router;
use beast_core::{
    AgentConfig, AgentCore, AgentIdentity, Analyzer, ConfigError, CoreOptions, Platform,
};
use beast_mesh::{CoordinationBus, Coordinator, CoordinatorConfig, MeshError, RedisBus};
use beast_platform::{
    CloudFunctionsAdapter, CloudRunAdapter, FunctionReply, FunctionRequest, GkeAdapter,
    PlatformAdapter, ServeError, http, server,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Failure to assemble or run the agent
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("coordination setup failed: {0}")]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("{0} has no HTTP listener, use single invocations instead")]
    NoListener(Platform),
}

/// Assembles an [`Agent`] from configuration
pub struct AgentBuilder {
    config: AgentConfig,
    fallback: Platform,
    identity: Option<AgentIdentity>,
    bus: Option<Arc<dyn CoordinationBus>>,
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl AgentBuilder {
    /// Platform used when neither configuration nor the environment names one
    #[must_use]
    pub fn fallback_platform(mut self, platform: Platform) -> Self {
        self.fallback = platform;
        self
    }

    /// Use a fixed identity instead of generating one
    #[must_use]
    pub fn identity(mut self, identity: AgentIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Coordinate over `bus` instead of the configured Redis endpoint
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn CoordinationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Build the agent; touches no network
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError` if Beast Mode is enabled without a usable
    /// bus endpoint or with invalid coordination settings.
    pub fn build(self) -> Result<Agent, BootstrapError> {
        let platform = match &self.identity {
            Some(identity) => identity.platform(),
            None => self.config.resolve_platform(self.fallback),
        };
        let mut identity = self
            .identity
            .unwrap_or_else(|| AgentIdentity::new(platform));
        if self.config.accept_custom {
            identity = identity.with_custom_capabilities();
        }
        let identity = Arc::new(identity);

        let beast_mode = &self.config.beast_mode;
        let coordinator = if beast_mode.enabled {
            let bus = match self.bus {
                Some(bus) => bus,
                None => {
                    let url = beast_mode.redis_url().ok_or_else(|| {
                        ConfigError::ValidationError(
                            "REDIS_HOST is required when Beast Mode is enabled".to_string(),
                        )
                    })?;
                    Arc::new(RedisBus::new(url)?) as Arc<dyn CoordinationBus>
                }
            };
            let config = CoordinatorConfig::from(beast_mode)
                .with_lazy_start(platform == Platform::CloudFunctions);
            Some(Arc::new(Coordinator::new(&identity, bus, config)?))
        } else {
            None
        };

        let mut core = AgentCore::new(Arc::clone(&identity)).with_options(CoreOptions {
            accept_custom: self.config.accept_custom,
            coordination_required: beast_mode.enabled && beast_mode.required,
        });
        if let Some(analyzer) = self.analyzer {
            core = core.with_analyzer(analyzer);
        }
        if let Some(coordinator) = &coordinator {
            core = core.with_coordinator(coordinator.clone());
        }

        info!(
            agent_id = %identity.agent_id(),
            platform = platform.as_str(),
            beast_mode = beast_mode.enabled,
            "Agent assembled"
        );

        Ok(Agent {
            config: self.config,
            platform,
            core: Arc::new(core),
            coordinator,
        })
    }
}

/// A fully wired agent for one platform
pub struct Agent {
    config: AgentConfig,
    platform: Platform,
    core: Arc<AgentCore>,
    coordinator: Option<Arc<Coordinator>>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            fallback: Platform::CloudRun,
            identity: None,
            bus: None,
            analyzer: None,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn core(&self) -> &Arc<AgentCore> {
        &self.core
    }

    pub fn coordinator(&self) -> Option<&Arc<Coordinator>> {
        self.coordinator.as_ref()
    }

    /// HTTP router for Cloud Run and GKE; `None` on Cloud Functions
    pub fn router(&self) -> Option<Router> {
        let core = Arc::clone(&self.core);
        let limits = self.config.limits;
        let timeout = self.config.request_timeout;
        match self.platform {
            Platform::CloudRun => Some(http::router(
                Arc::new(CloudRunAdapter::new(core, limits)),
                timeout,
            )),
            Platform::Gke => Some(http::router(Arc::new(GkeAdapter::new(core, limits)), timeout)),
            Platform::CloudFunctions => None,
        }
    }

    /// Adapter for single-shot function invocations
    pub fn function_adapter(&self) -> CloudFunctionsAdapter {
        CloudFunctionsAdapter::new(Arc::clone(&self.core), self.config.limits)
    }

    /// Handle one function invocation
    pub async fn invoke(&self, request: FunctionRequest) -> FunctionReply {
        self.function_adapter().handle(request).await
    }

    /// Start coordination in the background, serve HTTP until a shutdown
    /// signal, then drain coordination
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError` on Cloud Functions or if the listener fails.
    pub async fn serve(self) -> Result<(), BootstrapError> {
        let router = self
            .router()
            .ok_or(BootstrapError::NoListener(self.platform))?;

        let discovery = self
            .coordinator
            .as_ref()
            .map(|coordinator| coordinator.spawn_start());

        let served = server::serve(router, self.config.port).await;

        if let Some(discovery) = discovery {
            discovery.abort();
        }
        self.shutdown().await;
        served.map_err(BootstrapError::from)
    }

    /// Drain coordination, releasing held claims
    pub async fn shutdown(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beast_core::{AgentConfigBuilder, BeastModeConfig};

    #[test]
    fn test_disabled_beast_mode_has_no_coordinator() {
        let config = AgentConfigBuilder::new().build().unwrap();
        let agent = Agent::builder(config)
            .fallback_platform(Platform::Gke)
            .build()
            .unwrap();

        assert!(agent.coordinator().is_none());
        assert!(!agent.core().coordination_enabled());
        assert!(agent.router().is_some());
    }

    #[test]
    fn test_configured_platform_wins_over_fallback() {
        let config = AgentConfigBuilder::new()
            .platform(Platform::CloudFunctions)
            .build()
            .unwrap();
        let agent = Agent::builder(config)
            .fallback_platform(Platform::Gke)
            .build()
            .unwrap();

        assert_eq!(agent.platform(), Platform::CloudFunctions);
        assert!(agent.router().is_none());
    }

    #[tokio::test]
    async fn test_redis_bus_is_built_lazily() {
        let config = AgentConfigBuilder::new()
            .platform(Platform::CloudRun)
            .beast_mode(BeastModeConfig {
                enabled: true,
                redis_host: Some("redis.invalid".to_string()),
                ..Default::default()
            })
            .build()
            .unwrap();

        // No connection is attempted while building
        let agent = Agent::builder(config).build().unwrap();
        assert!(agent.coordinator().is_some());
    }
}
