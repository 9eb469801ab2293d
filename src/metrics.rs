use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collection for the quiz room orchestrator.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub stale_disconnects: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub send_failures: AtomicU64,

    // Admission metrics
    pub admissions: AtomicU64,
    pub admission_rejections: AtomicU64,
    pub duplicate_handoffs: AtomicU64,
    pub spectator_admissions: AtomicU64,

    // Room lifecycle
    pub rooms_created: AtomicU64,
    pub rooms_loaded: AtomicU64,
    pub rooms_evicted: AtomicU64,
    pub games_started: AtomicU64,
    pub games_finished: AtomicU64,

    // Phase machinery
    pub timers_scheduled: AtomicU64,
    pub timers_cancelled: AtomicU64,
    pub timers_fired_stale: AtomicU64,

    // Host absence handling
    pub host_reconnect_pauses: AtomicU64,
    pub host_reconnect_resumes: AtomicU64,
    pub host_reassignments: AtomicU64,
    pub manual_pauses: AtomicU64,

    // Chat & moderation
    pub chat_messages: AtomicU64,
    pub moderation_deletions: AtomicU64,
    pub moderation_disqualifications: AtomicU64,

    // Persistence
    pub hot_snapshot_writes: AtomicU64,
    pub durable_snapshot_writes: AtomicU64,
    pub snapshot_write_failures: AtomicU64,
    pub game_results_recorded: AtomicU64,

    // Identity
    pub identity_resolutions: AtomicU64,
    pub identity_failures: AtomicU64,

    // Frame handling
    pub frames_received: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub pings_received: AtomicU64,
}

/// Serializable point-in-time view of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_connections: u64,
    pub active_connections: u64,
    pub disconnections: u64,
    pub stale_disconnects: u64,
    pub frames_dropped: u64,
    pub send_failures: u64,
    pub admissions: u64,
    pub admission_rejections: u64,
    pub duplicate_handoffs: u64,
    pub spectator_admissions: u64,
    pub rooms_created: u64,
    pub rooms_loaded: u64,
    pub rooms_evicted: u64,
    pub games_started: u64,
    pub games_finished: u64,
    pub timers_scheduled: u64,
    pub timers_cancelled: u64,
    pub timers_fired_stale: u64,
    pub host_reconnect_pauses: u64,
    pub host_reconnect_resumes: u64,
    pub host_reassignments: u64,
    pub manual_pauses: u64,
    pub chat_messages: u64,
    pub moderation_deletions: u64,
    pub moderation_disqualifications: u64,
    pub hot_snapshot_writes: u64,
    pub durable_snapshot_writes: u64,
    pub snapshot_write_failures: u64,
    pub game_results_recorded: u64,
    pub identity_resolutions: u64,
    pub identity_failures: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub pings_received: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self, counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            total_connections: load(&self.total_connections),
            active_connections: load(&self.active_connections),
            disconnections: load(&self.disconnections),
            stale_disconnects: load(&self.stale_disconnects),
            frames_dropped: load(&self.frames_dropped),
            send_failures: load(&self.send_failures),
            admissions: load(&self.admissions),
            admission_rejections: load(&self.admission_rejections),
            duplicate_handoffs: load(&self.duplicate_handoffs),
            spectator_admissions: load(&self.spectator_admissions),
            rooms_created: load(&self.rooms_created),
            rooms_loaded: load(&self.rooms_loaded),
            rooms_evicted: load(&self.rooms_evicted),
            games_started: load(&self.games_started),
            games_finished: load(&self.games_finished),
            timers_scheduled: load(&self.timers_scheduled),
            timers_cancelled: load(&self.timers_cancelled),
            timers_fired_stale: load(&self.timers_fired_stale),
            host_reconnect_pauses: load(&self.host_reconnect_pauses),
            host_reconnect_resumes: load(&self.host_reconnect_resumes),
            host_reassignments: load(&self.host_reassignments),
            manual_pauses: load(&self.manual_pauses),
            chat_messages: load(&self.chat_messages),
            moderation_deletions: load(&self.moderation_deletions),
            moderation_disqualifications: load(&self.moderation_disqualifications),
            hot_snapshot_writes: load(&self.hot_snapshot_writes),
            durable_snapshot_writes: load(&self.durable_snapshot_writes),
            snapshot_write_failures: load(&self.snapshot_write_failures),
            game_results_recorded: load(&self.game_results_recorded),
            identity_resolutions: load(&self.identity_resolutions),
            identity_failures: load(&self.identity_failures),
            frames_received: load(&self.frames_received),
            frames_rejected: load(&self.frames_rejected),
            pings_received: load(&self.pings_received),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = ServerMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 0);
        assert_eq!(snapshot.admission_rejections, 0);
        assert_eq!(snapshot.durable_snapshot_writes, 0);
    }

    #[test]
    fn increment_is_visible_in_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.increment(&metrics.admissions);
        metrics.increment(&metrics.admissions);
        metrics.increment(&metrics.duplicate_handoffs);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admissions, 2);
        assert_eq!(snapshot.duplicate_handoffs, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = ServerMetrics::new();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert!(json.get("activeConnections").is_none());
        assert!(json.get("active_connections").is_some());
    }
}
