//! Presence server metrics
//!
//! Plain atomic counters, served as JSON at `/api/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Successful registrations, including re-registrations
    pub registrations: AtomicU64,
    /// Registrations refused for a missing or blank peer id
    pub rejected_registrations: AtomicU64,
    /// Unregister calls that removed an entry
    pub unregistrations: AtomicU64,
    /// Unregister calls for ids that were not registered
    pub unregistrations_missed: AtomicU64,
    pub list_queries: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registration_rejected(&self) {
        self.rejected_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unregistered(&self, removed: bool) {
        if removed {
            self.unregistrations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unregistrations_missed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn listed(&self) {
        self.list_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Snapshot of every counter. `peers_online` comes from the directory.
    pub fn snapshot(&self, peers_online: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            peers_online,
            registrations: RegistrationMetrics {
                accepted: self.registrations.load(Ordering::Relaxed),
                rejected: self.rejected_registrations.load(Ordering::Relaxed),
            },
            unregistrations: UnregistrationMetrics {
                removed: self.unregistrations.load(Ordering::Relaxed),
                missed: self.unregistrations_missed.load(Ordering::Relaxed),
            },
            list_queries: self.list_queries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub peers_online: u64,
    pub registrations: RegistrationMetrics,
    pub unregistrations: UnregistrationMetrics,
    pub list_queries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMetrics {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregistrationMetrics {
    pub removed: u64,
    pub missed: u64,
}
