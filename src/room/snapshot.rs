//! Room state ⇄ JSON snapshot round-tripping for the persistence tier.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::catalog::build_catalog_questions;
use crate::protocol::types::{
    DifficultyMode, GameMode, IdentityKey, PeerId, Phase, QuestionRecord, QuestionSource,
    SkipRequestStatus, Team,
};
use crate::protocol::validation::clamp_question_count;
use crate::room::state::{AnswerSubmission, ChatMessage, PausedState, PerTeam, RoomState};
use crate::room::stats::{EventHistoryEntry, PlayerStat, QuestionHistoryEntry, RevealRecord};

/// Deadline of the currently active phase, if it has one.
pub fn phase_deadline_epoch_ms(room: &RoomState) -> Option<u64> {
    match room.phase {
        Phase::Question => room.question_ends_at,
        Phase::TeamReveal => room.team_reveal_ends_at,
        Phase::CaptainVote => room.captain_vote_ends_at,
        Phase::TeamNaming => room.team_naming_ends_at,
        Phase::Reveal => room.reveal_ends_at,
        Phase::HostReconnect => room.host_reconnect_ends_at,
        Phase::Lobby | Phase::Results | Phase::ManualPause => None,
    }
}

/// Seat description persisted alongside the room (sockets excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPlayer {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Option<Team>,
    pub is_host: bool,
    pub is_spectator: bool,
    pub is_captain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Full persisted room state. This is the `stateJson` payload of the
/// durable snapshot record and the hot-cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub state_version: u64,
    pub last_event_id: usize,
    pub deadline_epoch_ms: Option<u64>,
    pub topic: String,
    pub difficulty_mode: DifficultyMode,
    pub game_mode: GameMode,
    pub question_count: usize,
    pub questions: Vec<QuestionRecord>,
    #[serde(default)]
    pub question_source: QuestionSource,
    /// Pre-validated generated batch; survives restarts so a generated room
    /// can still start its game after a reload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_questions: Option<Vec<QuestionRecord>>,
    pub phase: Phase,
    pub current_question_index: i64,
    pub active_team: Team,
    pub question_ends_at: Option<u64>,
    pub team_reveal_ends_at: Option<u64>,
    pub captain_vote_ends_at: Option<u64>,
    pub team_naming_ends_at: Option<u64>,
    pub reveal_ends_at: Option<u64>,
    pub host_reconnect_ends_at: Option<u64>,
    pub host_token_hash: String,
    pub room_password_hash: String,
    pub disconnected_host_name: Option<String>,
    pub disconnected_host_expected_name: Option<String>,
    #[serde(default)]
    pub disconnected_host_identity: Option<IdentityKey>,
    pub paused_state: Option<PausedState>,
    pub manual_pause_by_name: Option<String>,
    pub active_answer: Option<AnswerSubmission>,
    pub answer_submissions: HashMap<PeerId, AnswerSubmission>,
    pub skip_requesters: Vec<PeerId>,
    pub skip_request_status: SkipRequestStatus,
    pub skip_request_message_id: Option<String>,
    pub last_reveal: Option<RevealRecord>,
    pub scores: PerTeam<i64>,
    pub player_scores: HashMap<PeerId, i64>,
    pub player_stats: HashMap<PeerId, PlayerStat>,
    pub question_history: Vec<QuestionHistoryEntry>,
    pub event_history: Vec<EventHistoryEntry>,
    pub chat: Vec<ChatMessage>,
    pub chat_moderation_strikes: HashMap<PeerId, u32>,
    pub captains: PerTeam<Option<PeerId>>,
    pub captain_votes: PerTeam<HashMap<PeerId, u32>>,
    pub captain_ballots: PerTeam<HashMap<PeerId, PeerId>>,
    pub captain_vote_ready_teams: PerTeam<bool>,
    pub team_naming_ready_teams: PerTeam<bool>,
    pub team_names: PerTeam<String>,
    pub used_team_names: Vec<String>,
    pub players: Vec<SnapshotPlayer>,
}

/// Capture the full persistable state of a room.
pub fn serialize_snapshot(room: &RoomState) -> RoomSnapshot {
    let mut skip_requesters: Vec<PeerId> = room.skip_requesters.iter().copied().collect();
    skip_requesters.sort();
    let mut used_team_names: Vec<String> = room.used_team_names.iter().cloned().collect();
    used_team_names.sort();

    RoomSnapshot {
        state_version: room.state_version.max(1),
        last_event_id: room.event_history.len(),
        deadline_epoch_ms: phase_deadline_epoch_ms(room),
        topic: room.topic.clone(),
        difficulty_mode: room.difficulty_mode,
        game_mode: room.game_mode,
        question_count: room.question_count,
        questions: room.questions.clone(),
        question_source: room.question_source,
        generated_questions: room.generated_questions.clone(),
        phase: room.phase,
        current_question_index: room.current_question_index,
        active_team: room.active_team,
        question_ends_at: room.question_ends_at,
        team_reveal_ends_at: room.team_reveal_ends_at,
        captain_vote_ends_at: room.captain_vote_ends_at,
        team_naming_ends_at: room.team_naming_ends_at,
        reveal_ends_at: room.reveal_ends_at,
        host_reconnect_ends_at: room.host_reconnect_ends_at,
        host_token_hash: room.host_token_hash.clone(),
        room_password_hash: room.room_password_hash.clone(),
        disconnected_host_name: room.disconnected_host_name.clone(),
        disconnected_host_expected_name: room.disconnected_host_expected_name.clone(),
        disconnected_host_identity: room.disconnected_host_identity.clone(),
        paused_state: room.paused_state,
        manual_pause_by_name: room.manual_pause_by_name.clone(),
        active_answer: room.active_answer.clone(),
        answer_submissions: room.answer_submissions.clone(),
        skip_requesters,
        skip_request_status: room.skip_request_status,
        skip_request_message_id: room.skip_request_message_id.clone(),
        last_reveal: room.last_reveal.clone(),
        scores: room.scores,
        player_scores: room.player_scores.clone(),
        player_stats: room.player_stats.clone(),
        question_history: room.question_history.clone(),
        event_history: room.event_history.clone(),
        chat: room.chat.clone(),
        chat_moderation_strikes: room.chat_moderation_strikes.clone(),
        captains: room.captains,
        captain_votes: room.captain_votes.clone(),
        captain_ballots: room.captain_ballots.clone(),
        captain_vote_ready_teams: room.captain_vote_ready_teams,
        team_naming_ready_teams: room.team_naming_ready_teams,
        team_names: room.team_names.clone(),
        used_team_names,
        players: room
            .players
            .values()
            .map(|player| SnapshotPlayer {
                peer_id: player.peer_id,
                name: player.name.clone(),
                team: player.team,
                is_host: player.is_host,
                is_spectator: player.is_spectator,
                is_captain: player.is_captain,
                avatar: player.assets.avatar.clone(),
            })
            .collect(),
    }
}

/// Restore persisted fields onto a freshly created room.
///
/// Connections are never restored from a snapshot; the caller decides
/// whether the loaded phase can stand (see [`reset_room_for_empty_connections`]).
pub fn apply_snapshot(room: &mut RoomState, snapshot: RoomSnapshot) {
    room.topic = snapshot.topic;
    room.difficulty_mode = snapshot.difficulty_mode;
    room.game_mode = snapshot.game_mode;
    room.question_count = clamp_question_count(snapshot.question_count as i64);
    if snapshot.questions.is_empty() {
        room.questions =
            build_catalog_questions(&room.topic, room.question_count, room.difficulty_mode);
    } else {
        room.questions = snapshot.questions;
    }
    room.question_source = snapshot.question_source;
    room.generated_questions = snapshot.generated_questions;

    room.phase = snapshot.phase;
    room.current_question_index = snapshot.current_question_index;
    room.active_team = snapshot.active_team;
    room.question_ends_at = snapshot.question_ends_at;
    room.team_reveal_ends_at = snapshot.team_reveal_ends_at;
    room.captain_vote_ends_at = snapshot.captain_vote_ends_at;
    room.team_naming_ends_at = snapshot.team_naming_ends_at;
    room.reveal_ends_at = snapshot.reveal_ends_at;
    room.host_reconnect_ends_at = snapshot.host_reconnect_ends_at;

    if !snapshot.host_token_hash.is_empty() {
        room.host_token_hash = snapshot.host_token_hash;
    }
    if !snapshot.room_password_hash.is_empty() {
        room.room_password_hash = snapshot.room_password_hash;
    }
    room.disconnected_host_name = snapshot.disconnected_host_name;
    room.disconnected_host_expected_name = snapshot.disconnected_host_expected_name;
    room.disconnected_host_identity = snapshot.disconnected_host_identity;
    room.paused_state = snapshot.paused_state;
    room.manual_pause_by_name = snapshot.manual_pause_by_name;
    room.active_answer = snapshot.active_answer;
    room.answer_submissions = snapshot.answer_submissions;
    room.skip_requesters = snapshot.skip_requesters.into_iter().collect();
    room.skip_request_status = snapshot.skip_request_status;
    room.skip_request_message_id = snapshot.skip_request_message_id;
    room.last_reveal = snapshot.last_reveal;

    room.scores = snapshot.scores;
    room.player_scores = snapshot.player_scores;
    room.player_stats = snapshot.player_stats;
    room.question_history = truncate_tail(snapshot.question_history, 200);
    room.event_history = truncate_tail(snapshot.event_history, 300);
    room.chat = truncate_tail(snapshot.chat, 100);
    room.chat_moderation_strikes = snapshot.chat_moderation_strikes;

    room.captains = snapshot.captains;
    room.captain_votes = snapshot.captain_votes;
    room.captain_ballots = snapshot.captain_ballots;
    room.captain_vote_ready_teams = snapshot.captain_vote_ready_teams;
    room.team_naming_ready_teams = snapshot.team_naming_ready_teams;
    room.team_names = snapshot.team_names;
    room.used_team_names = snapshot
        .used_team_names
        .into_iter()
        .filter(|name| !name.trim().is_empty())
        .collect::<HashSet<String>>();

    room.state_version = snapshot.state_version.max(1);
}

fn truncate_tail<T>(mut items: Vec<T>, cap: usize) -> Vec<T> {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
    items
}

/// Reset a room whose snapshot survived a process restart: no sockets exist
/// any more, so no in-flight game can stand. Config and secrets survive.
pub fn reset_room_for_empty_connections(room: &mut RoomState) {
    room.timers.clear_all();
    room.phase = Phase::Lobby;
    room.current_question_index = -1;
    room.active_team = Team::A;
    room.question_ends_at = None;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;
    room.host_reconnect_ends_at = None;
    room.disconnected_host_name = None;
    room.disconnected_host_expected_name = None;
    room.disconnected_host_identity = None;
    room.paused_state = None;
    room.manual_pause_by_name = None;
    room.active_answer = None;
    room.answer_submissions.clear();
    room.skip_requesters.clear();
    room.skip_request_status = SkipRequestStatus::Idle;
    room.skip_request_message_id = None;
    room.last_reveal = None;
    room.scores = PerTeam::default();
    room.player_scores.clear();
    room.player_stats.clear();
    room.question_history.clear();
    room.event_history.clear();
    room.chat.clear();
    room.chat_moderation_strikes.clear();
    room.players.clear();
    room.player_tokens.clear();
    room.host_peer_id = None;
    // A validated generated batch stays usable for the next game; only
    // catalog rooms resample.
    if room.question_source == QuestionSource::Catalog {
        room.questions =
            build_catalog_questions(&room.topic, room.question_count, room.difficulty_mode);
    }
    room.reset_captain_state();
    room.team_names = PerTeam::new(
        Team::A.default_name().to_string(),
        Team::B.default_name().to_string(),
    );
    room.results_recorded = false;
}
