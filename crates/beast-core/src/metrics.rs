//! Request and claim counters
//!
//! Counters are plain atomics indexed by capability kind and a fixed set of
//! status codes, so recording never takes a lock and a snapshot is a series
//! of relaxed loads.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::Capability;

const CAPABILITY_KINDS: [&str; 5] = ["info", "health", "analyze", "metrics", "custom"];
const TRACKED_STATUS: [u16; 9] = [200, 400, 405, 409, 413, 500, 503, 504, 0];
const OTHER_STATUS: usize = TRACKED_STATUS.len() - 1;

/// Claim protocol outcomes worth counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEvent {
    Attempted,
    Acquired,
    Lost,
    Unavailable,
    Released,
}

/// Lock-free counters shared by every invocation
#[derive(Debug, Default)]
pub struct AgentMetrics {
    requests: [[AtomicU64; TRACKED_STATUS.len()]; CAPABILITY_KINDS.len()],
    rejected: [AtomicU64; TRACKED_STATUS.len()],
    response_micros_total: AtomicU64,
    response_samples: AtomicU64,
    claims_attempted: AtomicU64,
    claims_acquired: AtomicU64,
    claims_lost: AtomicU64,
    claims_unavailable: AtomicU64,
    claims_released: AtomicU64,
}

fn capability_index(capability: &Capability) -> usize {
    match capability {
        Capability::Info => 0,
        Capability::Health => 1,
        Capability::Analyze => 2,
        Capability::Metrics => 3,
        Capability::Custom(_) => 4,
    }
}

fn status_index(status: u16) -> usize {
    TRACKED_STATUS[..OTHER_STATUS]
        .iter()
        .position(|s| *s == status)
        .unwrap_or(OTHER_STATUS)
}

fn status_label(index: usize) -> String {
    if index == OTHER_STATUS {
        "other".to_string()
    } else {
        TRACKED_STATUS[index].to_string()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatched request
    pub fn record_request(&self, capability: &Capability, status: u16, elapsed: Duration) {
        self.requests[capability_index(capability)][status_index(status)]
            .fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_micros_total.fetch_add(micros, Ordering::Relaxed);
        self.response_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected before a capability was resolved
    pub fn record_rejected(&self, status: u16) {
        self.rejected[status_index(status)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self, event: ClaimEvent) {
        let counter = match event {
            ClaimEvent::Attempted => &self.claims_attempted,
            ClaimEvent::Acquired => &self.claims_acquired,
            ClaimEvent::Lost => &self.claims_lost,
            ClaimEvent::Unavailable => &self.claims_unavailable,
            ClaimEvent::Released => &self.claims_released,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut by_capability = BTreeMap::new();
        let mut total_requests = 0u64;
        let mut error_count = 0u64;

        for (cap_idx, kind) in CAPABILITY_KINDS.iter().enumerate() {
            let mut by_status = BTreeMap::new();
            for (status_idx, counter) in self.requests[cap_idx].iter().enumerate() {
                let count = counter.load(Ordering::Relaxed);
                if count == 0 {
                    continue;
                }
                total_requests += count;
                if TRACKED_STATUS[status_idx] >= 500 {
                    error_count += count;
                }
                by_status.insert(status_label(status_idx), count);
            }
            if !by_status.is_empty() {
                by_capability.insert(kind.to_string(), by_status);
            }
        }

        let mut rejected = BTreeMap::new();
        for (status_idx, counter) in self.rejected.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                total_requests += count;
                if TRACKED_STATUS[status_idx] >= 500 {
                    error_count += count;
                }
                rejected.insert(status_label(status_idx), count);
            }
        }

        let samples = self.response_samples.load(Ordering::Relaxed);
        let avg_response_time = if samples == 0 {
            0.0
        } else {
            self.response_micros_total.load(Ordering::Relaxed) as f64 / samples as f64 / 1e6
        };

        MetricsSnapshot {
            total_requests,
            error_count,
            requests: by_capability,
            rejected,
            avg_response_time,
            claims: ClaimCounts {
                attempted: self.claims_attempted.load(Ordering::Relaxed),
                acquired: self.claims_acquired.load(Ordering::Relaxed),
                lost: self.claims_lost.load(Ordering::Relaxed),
                unavailable: self.claims_unavailable.load(Ordering::Relaxed),
                released: self.claims_released.load(Ordering::Relaxed),
            },
        }
    }
}

/// Claim counters in a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimCounts {
    pub attempted: u64,
    pub acquired: u64,
    pub lost: u64,
    pub unavailable: u64,
    pub released: u64,
}

/// Point-in-time copy of [`AgentMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    /// Requests answered with a 5xx status
    pub error_count: u64,
    /// capability kind -> status code -> count
    pub requests: BTreeMap<String, BTreeMap<String, u64>>,
    /// Requests rejected before dispatch, by status code
    pub rejected: BTreeMap<String, u64>,
    /// Mean dispatch time in seconds
    pub avg_response_time: f64,
    pub claims: ClaimCounts,
}

impl MetricsSnapshot {
    pub fn count(&self, capability: &str, status: u16) -> u64 {
        self.requests
            .get(capability)
            .and_then(|by_status| by_status.get(&status.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Resident memory of this process in MB (Linux only, 0 elsewhere)
pub fn memory_usage_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| {
                        line.split_whitespace()
                            .nth(1)
                            .and_then(|s| s.parse::<f64>().ok())
                            .map(|kb| kb / 1024.0)
                    })
            })
            .unwrap_or(0.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_capability_and_status() {
        let metrics = AgentMetrics::new();
        metrics.record_request(&Capability::Analyze, 200, Duration::from_millis(10));
        metrics.record_request(&Capability::Analyze, 200, Duration::from_millis(30));
        metrics.record_request(&Capability::Analyze, 500, Duration::from_millis(1));
        metrics.record_request(&Capability::Health, 200, Duration::ZERO);
        metrics.record_request(&Capability::Custom("x".into()), 418, Duration::ZERO);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 5);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.count("analyze", 200), 2);
        assert_eq!(snap.count("analyze", 500), 1);
        assert_eq!(snap.count("health", 200), 1);
        assert_eq!(snap.requests["custom"]["other"], 1);
        assert!(!snap.requests.contains_key("info"));
    }

    #[test]
    fn test_rejected_server_errors_count_as_errors() {
        let metrics = AgentMetrics::new();
        metrics.record_rejected(413);
        metrics.record_rejected(500);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.rejected["500"], 1);
    }

    #[test]
    fn test_average_response_time() {
        let metrics = AgentMetrics::new();
        assert_eq!(metrics.snapshot().avg_response_time, 0.0);

        metrics.record_request(&Capability::Info, 200, Duration::from_millis(100));
        metrics.record_request(&Capability::Info, 200, Duration::from_millis(300));
        let avg = metrics.snapshot().avg_response_time;
        assert!((avg - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let metrics = AgentMetrics::new();
        metrics.record_claim(ClaimEvent::Attempted);
        metrics.record_claim(ClaimEvent::Lost);
        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.claims.attempted, 1);
        assert_eq!(first.claims.lost, 1);
    }

    #[test]
    fn test_rejected_counted_in_total() {
        let metrics = AgentMetrics::new();
        metrics.record_rejected(413);
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.rejected["413"], 1);
    }
}
