//! Local claim bookkeeping and the tie-break rule
//!
//! Each agent keeps the claim it currently believes wins for every claim id
//! it has heard about. Agents converge because they all apply the same
//! total order to conflicting claims: earlier `claimed_at` wins, and equal
//! timestamps fall back to the lower `agent_id`.

use beast_core::{AgentId, ClaimId};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::message::WorkClaim;

/// `Ordering::Less` means `a` has priority over `b`
pub fn priority(a: &WorkClaim, b: &WorkClaim) -> Ordering {
    a.claimed_at
        .cmp(&b.claimed_at)
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

/// Whether `a` wins a conflict against `b`
pub fn outranks(a: &WorkClaim, b: &WorkClaim) -> bool {
    priority(a, b) == Ordering::Less
}

#[derive(Debug, Clone)]
struct Entry {
    claim: WorkClaim,
    confirmed: bool,
}

/// Result of recording a peer's claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Recorded or refreshed; no effect on our own claims
    Recorded,
    /// Lower priority than the claim we hold; re-announce ours
    Defend(WorkClaim),
    /// A peer's claim beat ours
    Preempted { confirmed: bool },
    /// Expired or loses to a peer claim already recorded
    Ignored,
}

/// claim_id -> currently winning claim
#[derive(Debug, Default)]
pub struct ClaimTable {
    entries: HashMap<ClaimId, Entry>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired winning claim for `claim_id`
    pub fn holder(&self, claim_id: &ClaimId, now: DateTime<Utc>) -> Option<&WorkClaim> {
        self.entries
            .get(claim_id)
            .map(|e| &e.claim)
            .filter(|c| !c.is_expired(now))
    }

    /// Record our own provisional claim
    ///
    /// Fails with the current holder if any unexpired claim is known,
    /// including one of our own still in flight.
    pub fn begin(&mut self, claim: WorkClaim, now: DateTime<Utc>) -> Result<(), WorkClaim> {
        if let Some(holder) = self.holder(&claim.claim_id, now) {
            return Err(holder.clone());
        }
        self.entries.insert(
            claim.claim_id.clone(),
            Entry {
                claim,
                confirmed: false,
            },
        );
        Ok(())
    }

    /// Confirm our provisional claim if it still stands
    pub fn confirm(&mut self, claim_id: &ClaimId, self_id: &AgentId, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(claim_id) {
            Some(entry) if entry.claim.agent_id == *self_id && !entry.claim.is_expired(now) => {
                entry.confirmed = true;
                true
            }
            _ => false,
        }
    }

    /// Record a claim announced by a peer
    pub fn observe(&mut self, claim: WorkClaim, self_id: &AgentId, now: DateTime<Utc>) -> Observation {
        if claim.is_expired(now) {
            return Observation::Ignored;
        }

        let Some(entry) = self
            .entries
            .get_mut(&claim.claim_id)
            .filter(|e| !e.claim.is_expired(now))
        else {
            self.entries.insert(
                claim.claim_id.clone(),
                Entry {
                    claim,
                    confirmed: false,
                },
            );
            return Observation::Recorded;
        };

        if entry.claim.agent_id == claim.agent_id {
            entry.claim = claim;
            return Observation::Recorded;
        }

        let ours = entry.claim.agent_id == *self_id;
        if outranks(&claim, &entry.claim) {
            let confirmed = entry.confirmed;
            *entry = Entry {
                claim,
                confirmed: false,
            };
            if ours {
                Observation::Preempted { confirmed }
            } else {
                Observation::Recorded
            }
        } else if ours {
            Observation::Defend(entry.claim.clone())
        } else {
            Observation::Ignored
        }
    }

    /// Remove a claim if `agent_id` is its holder
    pub fn release(&mut self, claim_id: &ClaimId, agent_id: &AgentId) -> bool {
        match self.entries.get(claim_id) {
            Some(entry) if entry.claim.agent_id == *agent_id => {
                self.entries.remove(claim_id);
                true
            }
            _ => false,
        }
    }

    /// Drop expired claims, returning how many were removed
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.claim.is_expired(now));
        before - self.entries.len()
    }

    /// Confirmed claims held by `agent_id`
    pub fn held_by(&self, agent_id: &AgentId) -> Vec<ClaimId> {
        self.entries
            .values()
            .filter(|e| e.confirmed && e.claim.agent_id == *agent_id)
            .map(|e| e.claim.claim_id.clone())
            .collect()
    }

    /// Claims of `agent_id`, confirmed or still provisional
    pub fn owned_by(&self, agent_id: &AgentId) -> Vec<ClaimId> {
        self.entries
            .values()
            .filter(|e| e.claim.agent_id == *agent_id)
            .map(|e| e.claim.claim_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
