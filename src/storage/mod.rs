//! Persistence abstraction for room snapshots and game results.
//!
//! The orchestrator never talks to a concrete database. It consumes two
//! narrow capabilities: an authoritative [`DurableStore`] and a best-effort
//! short-TTL [`HotCache`]. Both must be safe for concurrent callers; the
//! in-memory implementations here back tests and single-node deployments.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::{InMemoryDurableStore, InMemoryHotCache};

/// One persisted room snapshot.
///
/// `state_json` carries the full serialized room state including secrets
/// (host token hash, password hash); callers exposing a snapshot externally
/// must redact it first via [`redacted_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshotRecord {
    pub room_id: String,
    pub topic: String,
    pub question_count: usize,
    pub state_json: Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A completed game appended to the results log.
#[derive(Debug, Clone, PartialEq)]
pub struct GameResultRecord {
    pub room_id: String,
    pub team_a_name: String,
    pub team_b_name: String,
    pub score_a: i64,
    pub score_b: i64,
    pub winner_team: Option<String>,
    pub payload_json: Value,
}

/// Authoritative store. Snapshots are upserted by room id; results are
/// append-only.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load_room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshotRecord>>;

    async fn save_room_snapshot(
        &self,
        room_id: &str,
        topic: &str,
        question_count: usize,
        state_json: Value,
    ) -> Result<()>;

    async fn append_game_result(&self, result: GameResultRecord) -> Result<()>;
}

/// Short-TTL cache in front of the durable store. Every operation is
/// best-effort: errors are logged by callers and swallowed.
#[async_trait]
pub trait HotCache: Send + Sync {
    async fn get_room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshotRecord>>;

    async fn set_room_snapshot(&self, record: RoomSnapshotRecord, ttl_secs: u64) -> Result<()>;
}

/// Strip secrets from a snapshot state for external consumers, exposing only
/// a `hasPassword` flag.
pub fn redacted_state(state_json: &Value) -> Value {
    let mut state = state_json.clone();
    if let Some(map) = state.as_object_mut() {
        map.remove("hostTokenHash");
        let has_password = map
            .remove("roomPasswordHash")
            .and_then(|hash| hash.as_str().map(|s| !s.trim().is_empty()))
            .unwrap_or(false);
        map.insert("hasPassword".to_string(), Value::Bool(has_password));
    }
    state
}
