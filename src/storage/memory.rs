//! In-memory store implementations for tests and single-node deployments.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;

use super::{DurableStore, GameResultRecord, HotCache, RoomSnapshotRecord};

/// Authoritative in-memory store.
#[derive(Default)]
pub struct InMemoryDurableStore {
    snapshots: RwLock<HashMap<String, RoomSnapshotRecord>>,
    results: RwLock<Vec<GameResultRecord>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended game results, oldest first.
    pub async fn game_results(&self) -> Vec<GameResultRecord> {
        self.results.read().await.clone()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn load_room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshotRecord>> {
        Ok(self.snapshots.read().await.get(room_id).cloned())
    }

    async fn save_room_snapshot(
        &self,
        room_id: &str,
        topic: &str,
        question_count: usize,
        state_json: Value,
    ) -> Result<()> {
        let record = RoomSnapshotRecord {
            room_id: room_id.to_string(),
            topic: topic.to_string(),
            question_count,
            state_json,
            updated_at: chrono::Utc::now(),
        };
        self.snapshots
            .write()
            .await
            .insert(room_id.to_string(), record);
        Ok(())
    }

    async fn append_game_result(&self, result: GameResultRecord) -> Result<()> {
        self.results.write().await.push(result);
        Ok(())
    }
}

struct CachedSnapshot {
    record: RoomSnapshotRecord,
    expires_at: Instant,
}

/// Best-effort in-memory cache with per-entry TTL.
#[derive(Default)]
pub struct InMemoryHotCache {
    entries: RwLock<HashMap<String, CachedSnapshot>>,
}

impl InMemoryHotCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn get_room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshotRecord>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(room_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.record.clone()))
    }

    async fn set_room_snapshot(&self, record: RoomSnapshotRecord, ttl_secs: u64) -> Result<()> {
        let expires_at = Instant::now() + std::time::Duration::from_secs(ttl_secs.max(60));
        self.entries.write().await.insert(
            record.room_id.clone(),
            CachedSnapshot { record, expires_at },
        );
        Ok(())
    }
}
