//! Wire messages exchanged on the coordination bus
//!
//! Every record carries a `type` discriminator (`presence`, `claim` or
//! `release`) next to its own fields:
//!
//! ```json
//! {"type":"presence","agent_id":"gke-1a2b","timestamp":"2026-01-01T00:00:00Z","status":"online"}
//! {"type":"claim","claim_id":"9f..","agent_id":"gke-1a2b","claimed_at":"..","expires_at":".."}
//! {"type":"release","claim_id":"9f..","agent_id":"gke-1a2b"}
//! ```

use beast_core::{AgentId, ClaimId, IdValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MeshError, MeshResult};

/// Presence status broadcast by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Busy,
    Draining,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Draining => "draining",
            Self::Offline => "offline",
        }
    }
}

/// Heartbeat / presence record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceAnnouncement {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub status: PresenceStatus,
}

impl PresenceAnnouncement {
    pub fn now(agent_id: AgentId, status: PresenceStatus) -> Self {
        Self {
            agent_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Announcement that an agent is taking a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkClaim {
    pub claim_id: ClaimId,
    pub agent_id: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkClaim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Explicit release of a held claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRelease {
    pub claim_id: ClaimId,
    pub agent_id: AgentId,
}

/// Any message on the coordination topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    Presence(PresenceAnnouncement),
    Claim(WorkClaim),
    Release(ClaimRelease),
}

impl BusMessage {
    /// Agent that published this message
    pub fn sender(&self) -> &AgentId {
        match self {
            Self::Presence(p) => &p.agent_id,
            Self::Claim(c) => &c.agent_id,
            Self::Release(r) => &r.agent_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Presence(_) => "presence",
            Self::Claim(_) => "claim",
            Self::Release(_) => "release",
        }
    }

    pub fn to_json(&self) -> MeshResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MeshResult<Self> {
        serde_json::from_str(json).map_err(|e| MeshError::DeserializationFailed(e.to_string()))
    }
}

/// Pub/sub topic shared by one deployment
///
/// Valid topics are non-empty and use only alphanumerics, `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic
    ///
    /// ```
    /// use beast_mesh::Topic;
    ///
    /// assert!(Topic::parse("beast-mode").is_ok());
    /// assert!(Topic::parse("").is_err());
    /// assert!(Topic::parse("beast/mode").is_err());
    /// ```
    pub fn parse(topic: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let s = topic.as_ref();

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

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Topic {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
