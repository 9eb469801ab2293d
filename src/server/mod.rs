//! Room orchestration: registry, admission, message handling, timers.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::catalog::{build_catalog_questions, sanitize_generated_batch};
use crate::config::Config;
use crate::metrics::ServerMetrics;
use crate::persistence::SnapshotTier;
use crate::protocol::room_codes::{generate_room_code, generate_secret};
use crate::protocol::types::{DifficultyMode, GameMode, PeerId, Phase, QuestionSource, RoomId};
use crate::protocol::validation::{clamp_question_count, sanitize_topic};
use crate::room::snapshot::{apply_snapshot, reset_room_for_empty_connections};
use crate::room::state::RoomState;
use crate::room::stats::build_game_result_payload;
use crate::room::timers::{TimerAction, TimerKey, MIN_TIMER_DELAY_MS};
use crate::room::{pause, phases, questions, RoomHandle};
use crate::identity::IdentityResolver;
use crate::storage::{DurableStore, HotCache};

mod broadcast;
mod cleanup;
mod gateway;
mod handlers;

pub use gateway::{AdmittedSeat, JoinRequest};

/// Cross-cutting notifications the core publishes for outer layers
/// (invitations, lobby listings). Implementations must not call back into
/// room state.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    GameStarted { room_id: RoomId, mode: GameMode },
    GameFinished { room_id: RoomId },
    HostReassigned { room_id: RoomId, new_host: PeerId },
    RoomEvicted { room_id: RoomId },
}

#[async_trait::async_trait]
pub trait ExternalEventPublisher: Send + Sync {
    async fn publish(&self, event: RoomEvent);
}

/// Default publisher: drops every event.
pub struct NoopEventPublisher;

#[async_trait::async_trait]
impl ExternalEventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: RoomEvent) {}
}

/// Hex sha256 used for host tokens and room passwords.
pub fn hash_secret(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Error)]
pub enum CreateRoomError {
    #[error("generated question batch failed validation")]
    InvalidGeneratedBatch,
    #[error("could not allocate an unused room code")]
    RoomCodeExhausted,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Parameters for seeding a new room into the durable store.
#[derive(Debug, Clone)]
pub struct CreateRoomOptions {
    pub topic: String,
    pub question_count: i64,
    pub difficulty: DifficultyMode,
    pub game_mode: GameMode,
    pub password: Option<String>,
    /// Pre-validated externally generated questions (raw JSON entries).
    pub generated_questions: Option<Vec<Value>>,
}

/// The realtime room orchestrator.
///
/// Owns the in-memory room registry and the per-room mutexes. Everything
/// that observes or mutates a room goes through its mutex; the registry
/// mutex is held only for lookup/insert/evict.
pub struct QuizServer {
    config: Config,
    registry: Mutex<HashMap<RoomId, Arc<RoomHandle>>>,
    tier: SnapshotTier,
    identity: Arc<dyn IdentityResolver>,
    publisher: Arc<dyn ExternalEventPublisher>,
    pub(crate) metrics: Arc<ServerMetrics>,
}

impl QuizServer {
    pub fn new(
        config: Config,
        durable: Arc<dyn DurableStore>,
        hot: Option<Arc<dyn HotCache>>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Arc<Self> {
        Self::with_publisher(config, durable, hot, identity, Arc::new(NoopEventPublisher))
    }

    pub fn with_publisher(
        config: Config,
        durable: Arc<dyn DurableStore>,
        hot: Option<Arc<dyn HotCache>>,
        identity: Arc<dyn IdentityResolver>,
        publisher: Arc<dyn ExternalEventPublisher>,
    ) -> Arc<Self> {
        let metrics = Arc::new(ServerMetrics::new());
        let tier = SnapshotTier::new(
            durable,
            hot,
            config.persistence.clone(),
            Arc::clone(&metrics),
        );
        Arc::new(Self {
            config,
            registry: Mutex::new(HashMap::new()),
            tier,
            identity,
            publisher,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub(crate) fn identity_resolver(&self) -> &Arc<dyn IdentityResolver> {
        &self.identity
    }

    pub(crate) fn publisher(&self) -> &Arc<dyn ExternalEventPublisher> {
        &self.publisher
    }

    pub async fn active_rooms_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Seed a lobby-phase room into the durable store.
    ///
    /// Returns the room code and the raw host token; only their hashes are
    /// persisted.
    pub async fn create_room(
        &self,
        options: CreateRoomOptions,
    ) -> Result<(RoomId, String), CreateRoomError> {
        let topic = sanitize_topic(&options.topic);
        let question_count = clamp_question_count(options.question_count);

        let mut room_id = None;
        for _ in 0..16 {
            let candidate = generate_room_code();
            let in_registry = self.registry.lock().await.contains_key(&candidate);
            let in_store = self
                .tier
                .durable()
                .load_room_snapshot(&candidate)
                .await
                .map_err(CreateRoomError::Storage)?
                .is_some();
            if !in_registry && !in_store {
                room_id = Some(candidate);
                break;
            }
        }
        let room_id = room_id.ok_or(CreateRoomError::RoomCodeExhausted)?;

        let mut room = RoomState::new(
            room_id.clone(),
            topic.clone(),
            options.difficulty,
            options.game_mode,
            question_count,
            build_catalog_questions(&topic, question_count, options.difficulty),
        );

        if let Some(raw_batch) = &options.generated_questions {
            let questions = sanitize_generated_batch(raw_batch, question_count)
                .ok_or(CreateRoomError::InvalidGeneratedBatch)?;
            room.question_source = QuestionSource::Generated;
            room.generated_questions = Some(questions.clone());
            room.questions = questions;
        }

        let host_token = generate_secret(43);
        room.host_token_hash = hash_secret(&host_token);
        if let Some(password) = options
            .password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            room.room_password_hash = hash_secret(password);
        }

        let snapshot = crate::room::snapshot::serialize_snapshot(&room);
        let state_json =
            serde_json::to_value(&snapshot).map_err(|e| CreateRoomError::Storage(e.into()))?;
        self.tier
            .durable()
            .save_room_snapshot(&room_id, &topic, question_count, state_json)
            .await
            .map_err(CreateRoomError::Storage)?;

        self.metrics.increment(&self.metrics.rooms_created);
        tracing::info!(
            room_id = %room_id,
            topic = %topic,
            mode = %options.game_mode.as_str(),
            question_count,
            has_password = !room.room_password_hash.is_empty(),
            "Room created"
        );
        Ok((room_id, host_token))
    }

    /// Look up a live room, or load it from the snapshot tier on first
    /// admission. `None` means the room does not exist anywhere.
    pub(crate) async fn get_or_load_room(&self, room_id: &str) -> Option<Arc<RoomHandle>> {
        {
            let registry = self.registry.lock().await;
            if let Some(existing) = registry.get(room_id) {
                return Some(Arc::clone(existing));
            }
        }

        // Load outside the registry lock; a racing loader is resolved below.
        let (record, snapshot) = self.tier.load_room_state(room_id).await?;

        let mut room = RoomState::new(
            room_id.to_string(),
            record.topic.clone(),
            snapshot.difficulty_mode,
            snapshot.game_mode,
            record.question_count,
            Vec::new(),
        );
        apply_snapshot(&mut room, snapshot);

        // After a process restart no sockets exist; no in-flight game can
        // survive, so anything past the lobby is reset.
        if room.phase != Phase::Lobby {
            reset_room_for_empty_connections(&mut room);
        }

        let handle = RoomHandle::new(room);
        let mut registry = self.registry.lock().await;
        let entry = registry
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::clone(&handle));
        if !Arc::ptr_eq(entry, &handle) {
            // Another connection loaded the room first; ours is dropped.
            return Some(Arc::clone(entry));
        }
        self.metrics.increment(&self.metrics.rooms_loaded);
        Some(handle)
    }

    /// Remove a room from the registry if the given handle is still current.
    pub(crate) async fn evict_room(&self, room_id: &str, handle: &Arc<RoomHandle>) {
        let mut registry = self.registry.lock().await;
        if registry
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            registry.remove(room_id);
            self.metrics.increment(&self.metrics.rooms_evicted);
            let publisher = Arc::clone(&self.publisher);
            let room_id = room_id.to_string();
            drop(registry);
            publisher.publish(RoomEvent::RoomEvicted { room_id }).await;
        }
    }

    /// Arm a one-shot timer for this room.
    ///
    /// Cancels any timer already armed under `key`. The spawned task sleeps,
    /// re-acquires the room mutex, deregisters itself, and no-ops when the
    /// phase moved on while it slept.
    pub(crate) fn schedule_timer(
        self: &Arc<Self>,
        room: &mut RoomState,
        key: TimerKey,
        delay_ms: u64,
        action: TimerAction,
    ) {
        let Some(handle) = room.handle.upgrade() else {
            tracing::warn!(room_id = %room.room_id, key = key.as_str(), "Timer scheduled on detached room");
            return;
        };
        let delay = Duration::from_millis(delay_ms.max(MIN_TIMER_DELAY_MS));
        let armed_phase = room.phase;
        let server = Arc::clone(self);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = handle.state.lock().await;
            let _ = state.timers.take(key);
            if state.phase != armed_phase {
                server.metrics.increment(&server.metrics.timers_fired_stale);
                return;
            }
            server.run_timer_action(&mut state, action).await;
        });

        room.timers.arm(key, task);
        self.metrics.increment(&self.metrics.timers_scheduled);
    }

    pub(crate) fn cancel_timer(&self, room: &mut RoomState, key: TimerKey) {
        if room.timers.cancel(key) {
            self.metrics.increment(&self.metrics.timers_cancelled);
        }
    }

    pub(crate) fn clear_timers(&self, room: &mut RoomState) {
        room.timers.clear_all();
    }

    async fn run_timer_action(self: &Arc<Self>, room: &mut RoomState, action: TimerAction) {
        match action {
            TimerAction::FinalizeQuestion => questions::finalize_question(self, room).await,
            TimerAction::AdvanceAfterReveal => phases::advance_after_reveal(self, room).await,
            TimerAction::AfterTeamReveal => phases::after_team_reveal(self, room).await,
            TimerAction::FinalizeCaptainVote => phases::finalize_captain_vote(self, room).await,
            TimerAction::AutoCaptain => phases::run_auto_captain(self, room).await,
            TimerAction::FinalizeTeamNaming => phases::finalize_team_naming(self, room).await,
            TimerAction::HostReconnectTimeout => pause::host_reconnect_timeout(self, room).await,
        }
    }

    pub(crate) async fn persist_room(&self, room: &mut RoomState, force_hot: bool, force_durable: bool) {
        self.tier.persist_room(room, force_hot, force_durable).await;
    }

    /// Append the completed game to the results log, once per game.
    pub(crate) async fn persist_game_result(&self, room: &mut RoomState) {
        if room.results_recorded {
            return;
        }
        room.results_recorded = true;

        let result_players = crate::room::stats::build_result_players(room);
        let record = build_game_result_payload(room, &result_players);
        match self.tier.durable().append_game_result(record).await {
            Ok(()) => {
                self.metrics.increment(&self.metrics.game_results_recorded);
                self.metrics.increment(&self.metrics.games_finished);
            }
            Err(error) => {
                tracing::error!(room_id = %room.room_id, %error, "Failed to append game result");
            }
        }
        self.publisher
            .publish(RoomEvent::GameFinished {
                room_id: room.room_id.clone(),
            })
            .await;
    }

    /// Cancel every room's timers and force a final snapshot to both tiers.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<RoomHandle>> = {
            let mut registry = self.registry.lock().await;
            registry.drain().map(|(_, handle)| handle).collect()
        };

        for handle in rooms {
            let mut room = handle.state.lock().await;
            room.timers.clear_all();
            self.persist_room(&mut room, true, true).await;
        }
        tracing::info!("Server shutdown persisted all rooms");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityResolver;
    use crate::storage::InMemoryDurableStore;

    fn test_server() -> (Arc<QuizServer>, Arc<InMemoryDurableStore>) {
        let durable = Arc::new(InMemoryDurableStore::new());
        let server = QuizServer::new(
            Config::default(),
            Arc::clone(&durable) as Arc<dyn DurableStore>,
            None,
            Arc::new(InMemoryIdentityResolver::new()),
        );
        (server, durable)
    }

    #[test]
    fn hash_secret_is_hex_sha256() {
        let digest = hash_secret("secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[tokio::test]
    async fn create_room_persists_lobby_snapshot() {
        let (server, durable) = test_server();
        let (room_id, host_token) = server
            .create_room(CreateRoomOptions {
                topic: "История".to_string(),
                question_count: 5,
                difficulty: DifficultyMode::Easy,
                game_mode: GameMode::Classic,
                password: None,
                generated_questions: None,
            })
            .await
            .unwrap();

        assert_eq!(room_id.len(), 8);
        assert!(!host_token.is_empty());
        let record = durable.load_room_snapshot(&room_id).await.unwrap().unwrap();
        assert_eq!(record.state_json["phase"], serde_json::json!("lobby"));
        assert_eq!(
            record.state_json["hostTokenHash"],
            serde_json::json!(hash_secret(&host_token))
        );
    }

    #[tokio::test]
    async fn create_room_hashes_password() {
        let (server, durable) = test_server();
        let (room_id, _) = server
            .create_room(CreateRoomOptions {
                topic: "Кино".to_string(),
                question_count: 6,
                difficulty: DifficultyMode::Mixed,
                game_mode: GameMode::Chaos,
                password: Some("p@ss".to_string()),
                generated_questions: None,
            })
            .await
            .unwrap();
        let record = durable.load_room_snapshot(&room_id).await.unwrap().unwrap();
        assert_eq!(
            record.state_json["roomPasswordHash"],
            serde_json::json!(hash_secret("p@ss"))
        );
    }

    #[tokio::test]
    async fn loading_unknown_room_returns_none() {
        let (server, _) = test_server();
        assert!(server.get_or_load_room("NOPE1234").await.is_none());
    }

    #[tokio::test]
    async fn loaded_live_snapshot_resets_to_lobby() {
        let (server, durable) = test_server();
        let (room_id, _) = server
            .create_room(CreateRoomOptions {
                topic: "История".to_string(),
                question_count: 5,
                difficulty: DifficultyMode::Easy,
                game_mode: GameMode::Classic,
                password: None,
                generated_questions: None,
            })
            .await
            .unwrap();

        // Corrupt the stored phase to simulate a mid-game process restart.
        let mut record = durable.load_room_snapshot(&room_id).await.unwrap().unwrap();
        record.state_json["phase"] = serde_json::json!("question");
        record.state_json["currentQuestionIndex"] = serde_json::json!(2);
        durable
            .save_room_snapshot(
                &room_id,
                &record.topic,
                record.question_count,
                record.state_json,
            )
            .await
            .unwrap();

        let handle = server.get_or_load_room(&room_id).await.unwrap();
        let room = handle.state.lock().await;
        assert_eq!(room.phase, Phase::Lobby);
        assert_eq!(room.current_question_index, -1);
        assert!(!room.host_token_hash.is_empty());
    }

    #[tokio::test]
    async fn generated_room_reloads_with_its_batch() {
        let (server, _) = test_server();
        let batch: Vec<serde_json::Value> = (0..5)
            .map(|index| {
                serde_json::json!({
                    "id": (index + 1).to_string(),
                    "text": format!("Вопрос {index}?"),
                    "options": ["Да", "Нет", "Возможно"],
                    "correctIndex": 1,
                    "difficulty": "hard",
                })
            })
            .collect();
        let (room_id, _) = server
            .create_room(CreateRoomOptions {
                topic: "Космос".to_string(),
                question_count: 5,
                difficulty: DifficultyMode::Hard,
                game_mode: GameMode::Ffa,
                password: None,
                generated_questions: Some(batch),
            })
            .await
            .unwrap();

        let handle = server.get_or_load_room(&room_id).await.unwrap();
        let room = handle.state.lock().await;
        assert_eq!(room.question_source, QuestionSource::Generated);
        let generated = room.generated_questions.as_ref().unwrap();
        assert_eq!(generated.len(), 5);
        assert_eq!(generated[0].text, "Вопрос 0?");
        assert_eq!(generated[0].correct_index, 1);
    }

    #[tokio::test]
    async fn generated_batch_must_validate() {
        let (server, _) = test_server();
        let error = server
            .create_room(CreateRoomOptions {
                topic: "Космос".to_string(),
                question_count: 5,
                difficulty: DifficultyMode::Hard,
                game_mode: GameMode::Ffa,
                password: None,
                generated_questions: Some(vec![serde_json::json!({"text": ""})]),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, CreateRoomError::InvalidGeneratedBatch));
    }
}
