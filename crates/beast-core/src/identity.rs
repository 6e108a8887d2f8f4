//! Process-wide agent identity
//!
//! An [`AgentIdentity`] is built once at startup and shared by reference
//! (`Arc`) with the dispatcher and the coordination layer. Nothing mutates it
//! afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::model::Capability;

/// Error type for ID validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdValidationError {
    #[error("ID cannot be empty")]
    Empty,
    #[error("ID cannot have leading or trailing whitespace")]
    LeadingTrailingWhitespace,
    #[error("ID can only contain alphanumeric characters, hyphens, underscores, and dots")]
    InvalidCharacters,
}

/// Unique identifier of one agent process
///
/// Valid IDs are non-empty and use only alphanumerics, `-`, `_` and `.`, so
/// they can be embedded in bus channel names and compared lexicographically
/// for claim tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Parse and validate an agent ID
    ///
    /// ```
    /// use beast_core::AgentId;
    ///
    /// assert!(AgentId::parse("cloud_run-1f2e3d").is_ok());
    /// assert!(AgentId::parse("").is_err());
    /// assert!(AgentId::parse("agent/path").is_err());
    /// ```
    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let s = id.as_ref();

        if s.is_empty() {
            return Err(IdValidationError::Empty);
        }
        if s != s.trim() {
            return Err(IdValidationError::LeadingTrailingWhitespace);
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(Self(s.to_string()))
    }

    /// Generate a fresh ID for this process on `platform`
    pub fn generate(platform: Platform) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", platform.as_str(), &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AgentId {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    CloudRun,
    Gke,
    CloudFunctions,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudRun => "cloud_run",
            Self::Gke => "gke",
            Self::CloudFunctions => "cloud_functions",
        }
    }

    /// Detect the platform from variables the hosting runtime injects
    ///
    /// Cloud Functions (gen2) also sets `K_SERVICE`, so `FUNCTION_TARGET` is
    /// checked first.
    pub fn detect_from<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("FUNCTION_TARGET").is_some() {
            Some(Self::CloudFunctions)
        } else if lookup("KUBERNETES_SERVICE_HOST").is_some() {
            Some(Self::Gke)
        } else if lookup("K_SERVICE").is_some() {
            Some(Self::CloudRun)
        } else {
            None
        }
    }

    /// Detect the platform from the process environment
    pub fn detect() -> Option<Self> {
        Self::detect_from(|key| std::env::var(key).ok())
    }

    /// Features the platform offers to workloads
    pub fn features(&self) -> &'static [&'static str] {
        match self {
            Self::CloudRun => &[
                "auto_scaling",
                "pay_per_use",
                "serverless",
                "http_triggers",
                "event_triggers",
            ],
            Self::Gke => &[
                "persistent_volumes",
                "stateful_sets",
                "node_affinity",
                "custom_networking",
                "advanced_scaling",
            ],
            Self::CloudFunctions => &["basic_http"],
        }
    }

    /// Constraints this agent observes on the platform
    pub fn constraints(&self) -> &'static [&'static str] {
        match self {
            Self::CloudRun => &[
                "15_minute_timeout",
                "http_only",
                "stateless_only",
                "ephemeral_storage",
            ],
            Self::Gke => &[
                "stateless_only",
                "no_persistent_volumes",
                "no_stateful_sets",
                "no_node_affinity",
            ],
            Self::CloudFunctions => &["basic_constraints"],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised platform name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}', expected cloud_run, gke or cloud_functions")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud_run" | "cloudrun" | "cloud-run" => Ok(Self::CloudRun),
            "gke" | "kubernetes" => Ok(Self::Gke),
            "cloud_functions" | "cloudfunctions" | "cloud-functions" | "functions" => {
                Ok(Self::CloudFunctions)
            }
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Immutable identity of this agent process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentIdentity {
    agent_id: AgentId,
    platform: Platform,
    capabilities: BTreeSet<Capability>,
    /// Named `custom` capabilities are served besides the built-ins
    accepts_custom: bool,
    version: &'static str,
}

impl AgentIdentity {
    /// Identity with a generated ID and the four built-in capabilities
    pub fn new(platform: Platform) -> Self {
        Self::with_id(AgentId::generate(platform), platform)
    }

    /// Identity with a caller-chosen ID
    pub fn with_id(agent_id: AgentId, platform: Platform) -> Self {
        Self {
            agent_id,
            platform,
            capabilities: Capability::builtin().into_iter().collect(),
            accepts_custom: false,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Advertise custom capabilities in addition to the built-ins
    #[must_use]
    pub fn with_custom_capabilities(mut self) -> Self {
        self.accepts_custom = true;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Built-in capabilities; custom ones are open-ended, see [`Self::accepts_custom`]
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn accepts_custom(&self) -> bool {
        self.accepts_custom
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Capability names in stable order
    pub fn capability_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.iter().map(Capability::kind).collect();
        if self.accepts_custom {
            names.push("custom");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_agent_id_validation() {
        assert!(AgentId::parse("gke-abc.1_2").is_ok());
        assert_eq!(AgentId::parse(""), Err(IdValidationError::Empty));
        assert_eq!(
            AgentId::parse(" a"),
            Err(IdValidationError::LeadingTrailingWhitespace)
        );
        assert_eq!(
            AgentId::parse("a:b"),
            Err(IdValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = AgentId::generate(Platform::Gke);
        let b = AgentId::generate(Platform::Gke);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("gke-"));
        assert!(AgentId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_agent_id_serde_rejects_invalid() {
        let ok: AgentId = serde_json::from_str("\"agent-1\"").unwrap();
        assert_eq!(ok.as_str(), "agent-1");
        assert!(serde_json::from_str::<AgentId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_platform_parse_aliases() {
        assert_eq!("cloudrun".parse::<Platform>().unwrap(), Platform::CloudRun);
        assert_eq!("GKE".parse::<Platform>().unwrap(), Platform::Gke);
        assert_eq!(
            "functions".parse::<Platform>().unwrap(),
            Platform::CloudFunctions
        );
        assert!("lambda".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_detection_order() {
        let env: HashMap<&str, &str> = [("K_SERVICE", "svc"), ("FUNCTION_TARGET", "entry")]
            .into_iter()
            .collect();
        let detected = Platform::detect_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(detected, Some(Platform::CloudFunctions));

        let env: HashMap<&str, &str> = [("KUBERNETES_SERVICE_HOST", "10.0.0.1")]
            .into_iter()
            .collect();
        let detected = Platform::detect_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(detected, Some(Platform::Gke));

        assert_eq!(Platform::detect_from(|_| None), None);
    }

    #[test]
    fn test_identity_capabilities() {
        let identity = AgentIdentity::new(Platform::CloudRun);
        assert_eq!(
            identity.capability_names(),
            vec!["info", "health", "analyze", "metrics"]
        );

        let identity = identity.with_custom_capabilities();
        assert!(identity.accepts_custom());
        assert_eq!(
            identity.capability_names(),
            vec!["info", "health", "analyze", "metrics", "custom"]
        );
        // Only built-ins are stored, so no empty custom name can match
        assert_eq!(identity.capabilities().len(), 4);
        assert!(!identity.capabilities().iter().any(Capability::is_custom));
    }
}
