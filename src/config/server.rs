//! Game behavior and persistence cadence configuration.

use super::defaults::{
    default_auto_captain_delay_ms, default_captain_vote_time_ms, default_durable_interval_ms,
    default_host_reconnect_wait_ms, default_hot_interval_ms, default_hot_snapshot_ttl_secs,
    default_join_timeout_secs, default_max_players, default_outbox_capacity,
    default_question_time_ms, default_reveal_time_ms, default_skip_reveal_time_ms,
    default_team_naming_time_ms, default_team_reveal_time_ms,
};
use serde::{Deserialize, Serialize};

/// Room and phase timing configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GameConfig {
    /// Maximum connections per room (host included)
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Join handshake inactivity limit (seconds)
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
    /// Question answering window
    #[serde(default = "default_question_time_ms")]
    pub question_time_ms: u64,
    /// Reveal display window
    #[serde(default = "default_reveal_time_ms")]
    pub reveal_time_ms: u64,
    /// Shortened reveal after a host skip
    #[serde(default = "default_skip_reveal_time_ms")]
    pub skip_reveal_time_ms: u64,
    /// Team composition reveal window
    #[serde(default = "default_team_reveal_time_ms")]
    pub team_reveal_time_ms: u64,
    /// Captain ballot window
    #[serde(default = "default_captain_vote_time_ms")]
    pub captain_vote_time_ms: u64,
    /// Delay before auto-appointing a single-member team's captain
    #[serde(default = "default_auto_captain_delay_ms")]
    pub auto_captain_delay_ms: u64,
    /// Team naming window
    #[serde(default = "default_team_naming_time_ms")]
    pub team_naming_time_ms: u64,
    /// How long a dropped host can reclaim their seat
    #[serde(default = "default_host_reconnect_wait_ms")]
    pub host_reconnect_wait_ms: u64,
    /// Per-connection outbound frame queue depth
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: default_max_players(),
            join_timeout_secs: default_join_timeout_secs(),
            question_time_ms: default_question_time_ms(),
            reveal_time_ms: default_reveal_time_ms(),
            skip_reveal_time_ms: default_skip_reveal_time_ms(),
            team_reveal_time_ms: default_team_reveal_time_ms(),
            captain_vote_time_ms: default_captain_vote_time_ms(),
            auto_captain_delay_ms: default_auto_captain_delay_ms(),
            team_naming_time_ms: default_team_naming_time_ms(),
            host_reconnect_wait_ms: default_host_reconnect_wait_ms(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// Snapshot tiering cadence.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersistenceConfig {
    /// Minimum interval between durable snapshot writes per room (ms)
    #[serde(default = "default_durable_interval_ms")]
    pub durable_interval_ms: u64,
    /// Minimum interval between hot-cache writes per room (ms)
    #[serde(default = "default_hot_interval_ms")]
    pub hot_interval_ms: u64,
    /// Hot-cache entry TTL (seconds)
    #[serde(default = "default_hot_snapshot_ttl_secs")]
    pub hot_snapshot_ttl_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            durable_interval_ms: default_durable_interval_ms(),
            hot_interval_ms: default_hot_interval_ms(),
            hot_snapshot_ttl_secs: default_hot_snapshot_ttl_secs(),
        }
    }
}
