//! Two-tier snapshot persistence: best-effort hot cache on a short cadence,
//! authoritative durable store on a longer cadence.
//!
//! All writes are driven through [`SnapshotTier::persist_room`] after every
//! room mutation; the tier decides which store (if any) actually gets
//! written. Failures are counted and swallowed: the in-memory room is the
//! source of truth and the next successful persist converges storage.

use std::sync::Arc;
use std::time::Instant;

use crate::config::PersistenceConfig;
use crate::metrics::ServerMetrics;
use crate::room::snapshot::{serialize_snapshot, RoomSnapshot};
use crate::room::state::RoomState;
use crate::storage::{DurableStore, HotCache, RoomSnapshotRecord};

pub struct SnapshotTier {
    durable: Arc<dyn DurableStore>,
    hot: Option<Arc<dyn HotCache>>,
    config: PersistenceConfig,
    metrics: Arc<ServerMetrics>,
}

impl SnapshotTier {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        hot: Option<Arc<dyn HotCache>>,
        config: PersistenceConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            durable,
            hot,
            config,
            metrics,
        }
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Persist a room according to the tiering policy.
    ///
    /// A durable write refreshes both tier timestamps (and the hot entry, so
    /// the cache never lags the durable store). Otherwise the hot cache is
    /// written when its shorter interval has elapsed.
    pub async fn persist_room(&self, room: &mut RoomState, force_hot: bool, force_durable: bool) {
        let durable_elapsed = elapsed_ms(room.last_durable_persist);
        let hot_elapsed = elapsed_ms(room.last_hot_persist);

        if force_durable || durable_elapsed >= self.config.durable_interval_ms {
            self.write_durable(room).await;
            self.write_hot(room).await;
            room.last_durable_persist = Some(Instant::now());
            room.last_hot_persist = Some(Instant::now());
            return;
        }

        if self.hot.is_some() && (force_hot || hot_elapsed >= self.config.hot_interval_ms) {
            self.write_hot(room).await;
            room.last_hot_persist = Some(Instant::now());
        }
    }

    /// Load and parse a snapshot for first admission: hot first (only if its
    /// payload parses), then durable.
    pub async fn load_room_state(
        &self,
        room_id: &str,
    ) -> Option<(RoomSnapshotRecord, RoomSnapshot)> {
        if let Some(hot) = &self.hot {
            match hot.get_room_snapshot(room_id).await {
                Ok(Some(record)) => {
                    match serde_json::from_value::<RoomSnapshot>(record.state_json.clone()) {
                        Ok(snapshot) => return Some((record, snapshot)),
                        Err(error) => {
                            tracing::warn!(room_id, %error, "Unparseable hot snapshot, falling back to durable store");
                        }
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(room_id, %error, "Hot cache read failed, falling back to durable store");
                }
            }
        }

        match self.durable.load_room_snapshot(room_id).await {
            Ok(Some(record)) => {
                match serde_json::from_value::<RoomSnapshot>(record.state_json.clone()) {
                    Ok(snapshot) => Some((record, snapshot)),
                    Err(error) => {
                        tracing::error!(room_id, %error, "Unparseable durable snapshot");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(error) => {
                tracing::error!(room_id, %error, "Durable snapshot load failed");
                None
            }
        }
    }

    async fn write_durable(&self, room: &RoomState) {
        let snapshot = serialize_snapshot(room);
        let state_json = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(room_id = %room.room_id, %error, "Snapshot serialization failed");
                self.metrics
                    .increment(&self.metrics.snapshot_write_failures);
                return;
            }
        };
        match self
            .durable
            .save_room_snapshot(&room.room_id, &room.topic, room.question_count, state_json)
            .await
        {
            Ok(()) => {
                self.metrics
                    .increment(&self.metrics.durable_snapshot_writes);
            }
            Err(error) => {
                tracing::error!(room_id = %room.room_id, %error, "Durable snapshot write failed");
                self.metrics
                    .increment(&self.metrics.snapshot_write_failures);
            }
        }
    }

    async fn write_hot(&self, room: &RoomState) {
        let Some(hot) = &self.hot else {
            return;
        };
        let snapshot = serialize_snapshot(room);
        let state_json = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(_) => return,
        };
        let record = RoomSnapshotRecord {
            room_id: room.room_id.clone(),
            topic: room.topic.clone(),
            question_count: room.question_count,
            state_json,
            updated_at: chrono::Utc::now(),
        };
        match hot
            .set_room_snapshot(record, self.config.hot_snapshot_ttl_secs)
            .await
        {
            Ok(()) => {
                self.metrics.increment(&self.metrics.hot_snapshot_writes);
            }
            Err(error) => {
                tracing::warn!(room_id = %room.room_id, %error, "Hot snapshot write failed");
                self.metrics
                    .increment(&self.metrics.snapshot_write_failures);
            }
        }
    }
}

fn elapsed_ms(since: Option<Instant>) -> u64 {
    match since {
        Some(instant) => instant.elapsed().as_millis() as u64,
        None => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::GameMode;
    use crate::room::test_support::blank_room;
    use crate::storage::{InMemoryDurableStore, InMemoryHotCache};

    fn tier(
        durable: Arc<InMemoryDurableStore>,
        hot: Option<Arc<InMemoryHotCache>>,
    ) -> SnapshotTier {
        let metrics = Arc::new(ServerMetrics::new());
        SnapshotTier::new(
            durable,
            hot.map(|h| h as Arc<dyn HotCache>),
            PersistenceConfig::default(),
            metrics,
        )
    }

    #[tokio::test]
    async fn first_persist_writes_durable() {
        let durable = Arc::new(InMemoryDurableStore::new());
        let tier = tier(Arc::clone(&durable), None);
        let mut room = blank_room(GameMode::Classic);

        tier.persist_room(&mut room, false, false).await;
        assert_eq!(durable.snapshot_count().await, 1);
        assert!(room.last_durable_persist.is_some());
    }

    #[tokio::test]
    async fn durable_writes_are_throttled_between_intervals() {
        let durable = Arc::new(InMemoryDurableStore::new());
        let hot = Arc::new(InMemoryHotCache::new());
        let tier = tier(Arc::clone(&durable), Some(Arc::clone(&hot)));
        let mut room = blank_room(GameMode::Classic);

        tier.persist_room(&mut room, false, false).await;
        room.state_version += 1;
        tier.persist_room(&mut room, false, false).await;

        // Second call is inside both intervals: no second durable write.
        let record = durable
            .load_room_snapshot(&room.room_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state_json["stateVersion"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn force_durable_bypasses_throttle() {
        let durable = Arc::new(InMemoryDurableStore::new());
        let tier = tier(Arc::clone(&durable), None);
        let mut room = blank_room(GameMode::Classic);

        tier.persist_room(&mut room, false, false).await;
        room.state_version = 9;
        tier.persist_room(&mut room, false, true).await;

        let record = durable
            .load_room_snapshot(&room.room_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state_json["stateVersion"], serde_json::json!(9));
    }

    #[tokio::test]
    async fn force_hot_writes_cache_only() {
        let durable = Arc::new(InMemoryDurableStore::new());
        let hot = Arc::new(InMemoryHotCache::new());
        let tier = tier(Arc::clone(&durable), Some(Arc::clone(&hot)));
        let mut room = blank_room(GameMode::Classic);

        tier.persist_room(&mut room, false, false).await; // durable + hot
        room.state_version = 5;
        tier.persist_room(&mut room, true, false).await; // hot only

        let cached = hot.get_room_snapshot(&room.room_id).await.unwrap().unwrap();
        assert_eq!(cached.state_json["stateVersion"], serde_json::json!(5));
        let stored = durable
            .load_room_snapshot(&room.room_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state_json["stateVersion"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn load_prefers_hot_over_durable() {
        let durable = Arc::new(InMemoryDurableStore::new());
        let hot = Arc::new(InMemoryHotCache::new());
        let tier = tier(Arc::clone(&durable), Some(Arc::clone(&hot)));
        let mut room = blank_room(GameMode::Classic);

        tier.persist_room(&mut room, false, false).await;
        room.state_version = 3;
        tier.persist_room(&mut room, true, false).await;

        let (record, snapshot) = tier.load_room_state(&room.room_id).await.unwrap();
        assert_eq!(record.state_json["stateVersion"], serde_json::json!(3));
        assert_eq!(snapshot.state_version, 3);
    }
}
