//! Seam between the dispatcher and the coordination layer
//!
//! The core only needs to ask two questions of coordination: "may I do this
//! work?" and "how healthy is your view of the peers?". [`WorkCoordinator`]
//! captures both so the dispatcher never depends on a concrete bus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::identity::AgentId;
use crate::model::{Capability, CorrelationId};

/// Deterministic identifier for one unit of claimable work
///
/// Derived from the correlation id and capability, so retries of the same
/// logical request produce the same claim id on every agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(String);

impl ClaimId {
    pub fn derive(correlation_id: &CorrelationId, capability: &Capability) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(capability.name().as_bytes());
        hasher.update(b":");
        hasher.update(correlation_id.as_str().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    /// Wrap an id received from the bus
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordination state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationState {
    Inactive,
    Discovering,
    Active,
    Draining,
}

impl CoordinationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Discovering => "discovering",
            Self::Active => "active",
            Self::Draining => "draining",
        }
    }
}

/// How usable the coordination layer's view currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewHealth {
    /// Not started yet because startup is deferred to first use
    Deferred,
    /// Startup in progress
    Discovering,
    /// Active with a recent refresh
    Fresh,
    /// Active but the last refresh is older than the staleness threshold
    Stale,
    /// Bus could not be reached
    Unreachable,
    /// Shutting down or shut down
    Stopped,
}

impl ViewHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Discovering => "discovering",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Unreachable => "unreachable",
            Self::Stopped => "stopped",
        }
    }

    /// Whether health should report the bus as working
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Deferred | Self::Discovering | Self::Fresh)
    }
}

/// Summary of one known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub agent_id: AgentId,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

/// Point-in-time read of coordination state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationSnapshot {
    pub state: CoordinationState,
    pub view: ViewHealth,
    pub peers: Vec<PeerSummary>,
    pub claims_held: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Handle on a confirmed claim; dropping it releases the claim
///
/// Release runs on drop so a cancelled invocation (its future dropped by
/// the platform) still gives the work back instead of holding it until
/// expiry.
pub struct ClaimGuard {
    claim_id: ClaimId,
    on_release: Option<Box<dyn FnOnce(&ClaimId) + Send>>,
}

impl ClaimGuard {
    pub fn new(claim_id: ClaimId, on_release: impl FnOnce(&ClaimId) + Send + 'static) -> Self {
        Self {
            claim_id,
            on_release: Some(Box::new(on_release)),
        }
    }

    pub fn claim_id(&self) -> &ClaimId {
        &self.claim_id
    }

    /// Run `hook` after the release, on whichever path releases the claim
    #[must_use]
    pub fn with_release_hook(mut self, hook: impl FnOnce(&ClaimId) + Send + 'static) -> Self {
        let release = self.on_release.take();
        self.on_release = Some(Box::new(move |id: &ClaimId| {
            if let Some(release) = release {
                release(id);
            }
            hook(id);
        }));
        self
    }

    /// Release now rather than at drop
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.on_release.take() {
            release(&self.claim_id);
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("claim_id", &self.claim_id)
            .field("released", &self.on_release.is_none())
            .finish()
    }
}

/// Result of a claim attempt
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This agent holds the claim; proceed with the work
    Acquired(ClaimGuard),
    /// A peer holds the claim; skip the work
    Lost { claim_id: ClaimId },
    /// Coordination cannot answer; proceed as a single agent
    Unavailable { reason: String },
}

/// Coordination as seen by the dispatcher
#[async_trait]
pub trait WorkCoordinator: Send + Sync {
    /// Try to claim the work identified by `claim_id`
    ///
    /// Must return within a bounded time and never fail the caller: any
    /// coordination fault is reported as [`ClaimOutcome::Unavailable`].
    async fn try_claim(&self, claim_id: &ClaimId) -> ClaimOutcome;

    /// Synchronized read of state, peers and claims
    async fn snapshot(&self) -> CoordinationSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_claim_id_is_deterministic() {
        let corr = CorrelationId::parse("req-42").unwrap();
        let a = ClaimId::derive(&corr, &Capability::Analyze);
        let b = ClaimId::derive(&corr, &Capability::Analyze);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);

        let other_cap = ClaimId::derive(&corr, &Capability::Custom("summarize".into()));
        assert_ne!(a, other_cap);

        let other_corr = ClaimId::derive(&CorrelationId::parse("req-43").unwrap(), &Capability::Analyze);
        assert_ne!(a, other_corr);
    }

    #[test]
    fn test_guard_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let guard = ClaimGuard::new(ClaimId::from_wire("c1"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        {
            let _guard = ClaimGuard::new(ClaimId::from_wire("c1"), move |id| {
                assert_eq!(id.as_str(), "c1");
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_hook_runs_after_drop_release() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let released = order.clone();
        let hooked = order.clone();
        let guard = ClaimGuard::new(ClaimId::from_wire("c1"), move |_| {
            released.lock().unwrap().push("release");
        })
        .with_release_hook(move |_| hooked.lock().unwrap().push("hook"));

        drop(guard);
        assert_eq!(*order.lock().unwrap(), vec!["release", "hook"]);
    }

    #[test]
    fn test_view_health_ok() {
        assert!(ViewHealth::Fresh.is_ok());
        assert!(ViewHealth::Deferred.is_ok());
        assert!(!ViewHealth::Unreachable.is_ok());
        assert!(!ViewHealth::Stale.is_ok());
    }
}
