//! Local view of peer agents built from presence announcements

use beast_core::{AgentId, PeerSummary};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::message::{PresenceAnnouncement, PresenceStatus};

/// What applying an announcement did to the view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerUpdate {
    /// First announcement from this peer
    Joined,
    /// Newer announcement from a known peer
    Refreshed,
    /// Peer announced it is going offline and was removed
    Departed,
    /// Announcement was not newer than the current entry
    Ignored,
}

/// agent_id -> last known presence, pruned by staleness
#[derive(Debug, Clone)]
pub struct PeerView {
    peers: BTreeMap<AgentId, PresenceAnnouncement>,
    staleness: chrono::Duration,
}

impl PeerView {
    pub fn new(staleness: Duration) -> Self {
        Self {
            peers: BTreeMap::new(),
            staleness: chrono::Duration::from_std(staleness)
                .unwrap_or_else(|_| chrono::Duration::seconds(15)),
        }
    }

    /// Apply one announcement
    ///
    /// Idempotent: re-applying the same or an older announcement leaves the
    /// view unchanged, so out-of-order delivery never regresses an entry.
    pub fn apply(&mut self, announcement: &PresenceAnnouncement) -> PeerUpdate {
        let joined = match self.peers.get(&announcement.agent_id) {
            Some(current) if current.timestamp >= announcement.timestamp => {
                return PeerUpdate::Ignored;
            }
            Some(_) => false,
            None => true,
        };

        if announcement.status == PresenceStatus::Offline {
            return match self.peers.remove(&announcement.agent_id) {
                Some(_) => PeerUpdate::Departed,
                None => PeerUpdate::Ignored,
            };
        }

        self.peers
            .insert(announcement.agent_id.clone(), announcement.clone());
        if joined {
            PeerUpdate::Joined
        } else {
            PeerUpdate::Refreshed
        }
    }

    /// Drop every peer whose last announcement is older than the threshold
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<AgentId> {
        let cutoff = now - self.staleness;
        let stale: Vec<AgentId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.timestamp < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&PresenceAnnouncement> {
        self.peers.get(agent_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceAnnouncement> {
        self.peers.values()
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        self.peers
            .values()
            .map(|p| PeerSummary {
                agent_id: p.agent_id.clone(),
                status: p.status.as_str().to_string(),
                last_seen: p.timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(id: &str, secs_ago: i64, status: PresenceStatus) -> PresenceAnnouncement {
        PresenceAnnouncement {
            agent_id: AgentId::parse(id).unwrap(),
            timestamp: Utc::now() - chrono::Duration::seconds(secs_ago),
            status,
        }
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut view = PeerView::new(Duration::from_secs(15));
        let a = announcement("peer-1", 0, PresenceStatus::Online);

        assert_eq!(view.apply(&a), PeerUpdate::Joined);
        assert_eq!(view.apply(&a), PeerUpdate::Ignored);
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(&a.agent_id).unwrap().timestamp, a.timestamp);
    }

    #[test]
    fn test_older_announcement_does_not_regress() {
        let mut view = PeerView::new(Duration::from_secs(15));
        let newer = announcement("peer-1", 1, PresenceStatus::Busy);
        let older = announcement("peer-1", 5, PresenceStatus::Online);

        view.apply(&newer);
        assert_eq!(view.apply(&older), PeerUpdate::Ignored);
        let entry = view.get(&newer.agent_id).unwrap();
        assert_eq!(entry.status, PresenceStatus::Busy);
        assert_eq!(entry.timestamp, newer.timestamp);
    }

    #[test]
    fn test_prune_removes_stale_entries() {
        let mut view = PeerView::new(Duration::from_secs(15));
        view.apply(&announcement("fresh", 1, PresenceStatus::Online));
        view.apply(&announcement("stale", 60, PresenceStatus::Online));
        assert_eq!(view.len(), 2);

        let pruned = view.prune(Utc::now());
        assert_eq!(pruned, vec![AgentId::parse("stale").unwrap()]);
        assert_eq!(view.len(), 1);
        assert!(view.get(&AgentId::parse("fresh").unwrap()).is_some());
    }

    #[test]
    fn test_offline_removes_peer() {
        let mut view = PeerView::new(Duration::from_secs(15));
        view.apply(&announcement("peer-1", 2, PresenceStatus::Draining));
        assert_eq!(
            view.apply(&announcement("peer-1", 0, PresenceStatus::Offline)),
            PeerUpdate::Departed
        );
        assert!(view.is_empty());
    }

    #[test]
    fn test_summaries() {
        let mut view = PeerView::new(Duration::from_secs(15));
        view.apply(&announcement("peer-1", 0, PresenceStatus::Busy));
        let summaries = view.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, "busy");
    }
}
