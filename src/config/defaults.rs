//! Default value functions for configuration fields.
//!
//! Used by serde's `#[serde(default = ...)]` attributes throughout the
//! configuration tree.

use super::logging::LogFormat;

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    3537
}

// =============================================================================
// Game Defaults
// =============================================================================

pub const fn default_max_players() -> usize {
    20
}

pub const fn default_join_timeout_secs() -> u64 {
    8
}

pub const fn default_question_time_ms() -> u64 {
    30_000
}

pub const fn default_reveal_time_ms() -> u64 {
    4_000
}

pub const fn default_skip_reveal_time_ms() -> u64 {
    1_800
}

pub const fn default_team_reveal_time_ms() -> u64 {
    6_000
}

pub const fn default_captain_vote_time_ms() -> u64 {
    30_000
}

pub const fn default_auto_captain_delay_ms() -> u64 {
    3_000
}

pub const fn default_team_naming_time_ms() -> u64 {
    30_000
}

pub const fn default_host_reconnect_wait_ms() -> u64 {
    30_000
}

pub const fn default_outbox_capacity() -> usize {
    64
}

// =============================================================================
// Persistence Defaults
// =============================================================================

/// Minimum interval between durable snapshot writes for one room.
pub const fn default_durable_interval_ms() -> u64 {
    3_500
}

/// Minimum interval between hot-cache snapshot writes for one room.
pub const fn default_hot_interval_ms() -> u64 {
    750
}

/// Hot-cache snapshot TTL (12 hours).
pub const fn default_hot_snapshot_ttl_secs() -> u64 {
    12 * 60 * 60
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Text
}
