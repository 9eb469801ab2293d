#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use quiz_arena_server::config::Config;
use quiz_arena_server::identity::InMemoryIdentityResolver;
use quiz_arena_server::protocol::error_codes::AdmissionErrorCode;
use quiz_arena_server::protocol::messages::{ClientFrame, ServerFrame};
use quiz_arena_server::protocol::types::{DifficultyMode, GameMode, PeerId};
use quiz_arena_server::room::state::{Outbound, RoomState};
use quiz_arena_server::room::view::RoomStateView;
use quiz_arena_server::server::{AdmittedSeat, CreateRoomOptions, JoinRequest, QuizServer};
use quiz_arena_server::storage::{DurableStore, HotCache, InMemoryDurableStore, InMemoryHotCache};

pub struct TestHarness {
    pub server: Arc<QuizServer>,
    pub durable: Arc<InMemoryDurableStore>,
    pub hot: Arc<InMemoryHotCache>,
    pub identity: Arc<InMemoryIdentityResolver>,
}

/// Short phase timings so scenario tests complete in well under a second
/// per transition. The 120 ms minimum timer delay still applies.
#[allow(dead_code)]
pub fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.game.question_time_ms = 2_000;
    cfg.game.reveal_time_ms = 150;
    cfg.game.skip_reveal_time_ms = 130;
    cfg.game.team_reveal_time_ms = 150;
    cfg.game.captain_vote_time_ms = 700;
    cfg.game.auto_captain_delay_ms = 200;
    cfg.game.team_naming_time_ms = 700;
    cfg.game.host_reconnect_wait_ms = 700;
    cfg
}

#[allow(dead_code)]
pub async fn harness() -> TestHarness {
    harness_with_config(fast_config()).await
}

pub async fn harness_with_config(config: Config) -> TestHarness {
    let durable = Arc::new(InMemoryDurableStore::new());
    let hot = Arc::new(InMemoryHotCache::new());
    let identity = Arc::new(InMemoryIdentityResolver::new());
    let server = QuizServer::new(
        config,
        Arc::clone(&durable) as Arc<dyn DurableStore>,
        Some(Arc::clone(&hot) as Arc<dyn HotCache>),
        Arc::clone(&identity) as Arc<dyn quiz_arena_server::identity::IdentityResolver>,
    );
    TestHarness {
        server,
        durable,
        hot,
        identity,
    }
}

#[allow(dead_code)]
pub async fn create_room(
    harness: &TestHarness,
    mode: GameMode,
    question_count: i64,
    difficulty: DifficultyMode,
) -> (String, String) {
    harness
        .server
        .create_room(CreateRoomOptions {
            topic: "История".to_string(),
            question_count,
            difficulty,
            game_mode: mode,
            password: None,
            generated_questions: None,
        })
        .await
        .expect("room creation")
}

/// One admitted connection driven directly against the server API.
#[derive(Debug)]
pub struct TestClient {
    pub seat: AdmittedSeat,
    pub rx: mpsc::Receiver<Outbound>,
    pub player_token: String,
}

impl TestClient {
    pub fn peer_id(&self) -> PeerId {
        self.seat.peer_id
    }

    /// All queued outbound messages, including close requests.
    pub fn drain_raw(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }

    pub fn drain(&mut self) -> Vec<ServerFrame> {
        self.drain_raw()
            .into_iter()
            .filter_map(|outbound| match outbound {
                Outbound::Frame(frame) => Some(frame),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    /// The most recent `state-sync` projection queued for this client.
    pub fn last_state(&mut self) -> Option<RoomStateView> {
        self.drain()
            .into_iter()
            .rev()
            .find_map(|frame| match frame {
                ServerFrame::StateSync { room, .. } => Some(*room),
                _ => None,
            })
    }

    pub async fn send(&self, server: &Arc<QuizServer>, frame: ClientFrame) {
        server.handle_client_frame(&self.seat, frame).await;
    }

    pub async fn disconnect(&self, server: &Arc<QuizServer>) {
        server
            .cleanup_connection(&self.seat.room_id, self.seat.peer_id, self.seat.socket_id)
            .await;
    }
}

#[allow(dead_code)]
pub fn join_request(room_id: &str, name: &str) -> JoinRequest {
    JoinRequest {
        room_id: room_id.to_string(),
        name: Some(name.to_string()),
        ..JoinRequest::default()
    }
}

pub async fn join_with(
    server: &Arc<QuizServer>,
    request: JoinRequest,
) -> Result<TestClient, AdmissionErrorCode> {
    let (tx, rx) = mpsc::channel(256);
    let socket_id = Uuid::new_v4();
    let seat = server.admit(request, tx, socket_id).await?;
    let mut client = TestClient {
        seat,
        rx,
        player_token: String::new(),
    };

    // The first frame on a fresh seat is `connected`, carrying the token.
    let frames = client.drain();
    if let Some(ServerFrame::Connected { player_token, .. }) = frames.first() {
        client.player_token = player_token.clone();
    }
    Ok(client)
}

#[allow(dead_code)]
pub async fn join(
    server: &Arc<QuizServer>,
    room_id: &str,
    name: &str,
) -> Result<TestClient, AdmissionErrorCode> {
    join_with(server, join_request(room_id, name)).await
}

#[allow(dead_code)]
pub async fn join_host(
    server: &Arc<QuizServer>,
    room_id: &str,
    name: &str,
    host_token: &str,
) -> Result<TestClient, AdmissionErrorCode> {
    let mut request = join_request(room_id, name);
    request.host_token = Some(host_token.to_string());
    join_with(server, request).await
}

/// Inspect or tweak room state directly under the room mutex.
#[allow(dead_code)]
pub async fn with_room<R>(client: &TestClient, action: impl FnOnce(&mut RoomState) -> R) -> R {
    let mut room = client.seat.room.state.lock().await;
    action(&mut room)
}

/// Wait a bit longer than a configured timer interval.
#[allow(dead_code)]
pub async fn sleep_past(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms + 120)).await;
}
