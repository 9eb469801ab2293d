use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Weak;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::identity::ProfileAssets;
use crate::protocol::messages::ServerFrame;
use crate::protocol::types::{
    DifficultyMode, GameMode, IdentityKey, PeerId, Phase, QuestionRecord, QuestionSource, RoomId,
    SkipRequestStatus, Team,
};
use crate::room::stats::{EventHistoryEntry, PlayerStat, QuestionHistoryEntry, RevealRecord};
use crate::room::timers::TimerSet;
use crate::room::RoomHandle;

/// Bounded history capacities; oldest entries are evicted FIFO.
pub const CHAT_LOG_CAP: usize = 100;
pub const QUESTION_HISTORY_CAP: usize = 200;
pub const EVENT_HISTORY_CAP: usize = 300;

/// Chat-moderation strikes before disqualification.
pub const STRIKES_TO_DISQUALIFY: u32 = 3;

/// Message pushed into a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    Close { code: u16, reason: String },
}

/// Pair of values keyed by team, serialized as `{"A": .., "B": ..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTeam<T> {
    #[serde(rename = "A")]
    pub a: T,
    #[serde(rename = "B")]
    pub b: T,
}

impl<T> PerTeam<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { a, b }
    }

    pub fn get(&self, team: Team) -> &T {
        match team {
            Team::A => &self.a,
            Team::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, team: Team) -> &mut T {
        match team {
            Team::A => &mut self.a,
            Team::B => &mut self.b,
        }
    }

    pub fn set(&mut self, team: Team, value: T) {
        *self.get_mut(team) = value;
    }
}

impl PerTeam<bool> {
    pub fn all_ready(&self) -> bool {
        self.a && self.b
    }
}

/// Who may see a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatVisibility {
    All,
    /// Host and spectators only.
    Host,
    Team(Team),
}

impl Serialize for ChatVisibility {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            ChatVisibility::All => "all",
            ChatVisibility::Host => "host",
            ChatVisibility::Team(team) => team.as_str(),
        };
        serializer.serialize_str(value)
    }
}

impl<'de> Deserialize<'de> for ChatVisibility {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "host" => ChatVisibility::Host,
            "A" => ChatVisibility::Team(Team::A),
            "B" => ChatVisibility::Team(Team::B),
            _ => ChatVisibility::All,
        })
    }
}

/// Non-player chat message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatKind {
    System,
    Presence,
    SkipRequest,
}

/// One entry of the bounded room chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Sender peer id as string, or "system".
    pub from: String,
    pub name: String,
    pub text: String,
    pub timestamp: u64,
    pub visibility: ChatVisibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChatKind>,
}

/// A submitted answer. Classic keeps at most one (the captain's); ffa/chaos
/// keep one per submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub selected_index: i64,
    pub by_peer_id: PeerId,
    pub by_name: String,
    pub answered_at: u64,
}

/// Phase context frozen while a room is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedState {
    pub phase: Phase,
    pub remaining_ms: u64,
}

/// One WebSocket participant's seat in a room.
#[derive(Debug)]
pub struct PlayerConnection {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Option<Team>,
    pub is_host: bool,
    pub is_spectator: bool,
    pub is_captain: bool,
    /// Opaque reclaim secret handed to the client in `connected`.
    pub player_token: String,
    pub identity_key: Option<IdentityKey>,
    pub auth_user_id: Option<i64>,
    pub assets: ProfileAssets,
    /// Outbound frame queue owned by the socket's send task.
    pub outbox: mpsc::Sender<Outbound>,
    /// Identifies the physical socket currently bound to this seat; stale
    /// disconnects after a handoff carry the old id and are ignored.
    pub socket_id: Uuid,
}

impl PlayerConnection {
    /// Non-host, non-spectator participants are the answering population.
    pub fn is_active_participant(&self) -> bool {
        !self.is_host && !self.is_spectator
    }
}

/// Aggregate root for one live room. All access is serialized by the room's
/// mutex; no field is shared outside it.
#[derive(Debug)]
pub struct RoomState {
    pub room_id: RoomId,
    pub topic: String,
    pub difficulty_mode: DifficultyMode,
    pub game_mode: GameMode,
    pub question_count: usize,
    pub questions: Vec<QuestionRecord>,
    pub question_source: QuestionSource,
    /// Pre-validated generated batch attached at room creation.
    pub generated_questions: Option<Vec<QuestionRecord>>,

    pub players: HashMap<PeerId, PlayerConnection>,
    /// player token → seat, for reclaim on reconnect.
    pub player_tokens: HashMap<String, PeerId>,
    pub host_peer_id: Option<PeerId>,
    pub host_token_hash: String,
    pub room_password_hash: String,

    pub phase: Phase,
    /// -1 until the first question opens.
    pub current_question_index: i64,
    pub active_team: Team,
    pub question_ends_at: Option<u64>,
    pub team_reveal_ends_at: Option<u64>,
    pub captain_vote_ends_at: Option<u64>,
    pub team_naming_ends_at: Option<u64>,
    pub reveal_ends_at: Option<u64>,
    pub host_reconnect_ends_at: Option<u64>,

    pub disconnected_host_name: Option<String>,
    pub disconnected_host_expected_name: Option<String>,
    pub disconnected_host_identity: Option<IdentityKey>,
    pub paused_state: Option<PausedState>,
    pub manual_pause_by_name: Option<String>,

    pub active_answer: Option<AnswerSubmission>,
    pub answer_submissions: HashMap<PeerId, AnswerSubmission>,
    pub skip_requesters: HashSet<PeerId>,
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
    /// voter → candidate, per team.
    pub captain_ballots: PerTeam<HashMap<PeerId, PeerId>>,
    pub captain_vote_ready_teams: PerTeam<bool>,
    pub team_naming_ready_teams: PerTeam<bool>,
    pub team_names: PerTeam<String>,
    pub used_team_names: HashSet<String>,

    pub results_recorded: bool,
    /// Strictly increases on every broadcast mutation.
    pub state_version: u64,

    /// Injectable RNG for captain election and chaos tie-breaks.
    pub rng: fastrand::Rng,
    pub timers: TimerSet,
    /// Self-reference used by timer tasks to re-acquire the room mutex.
    pub handle: Weak<RoomHandle>,

    pub last_hot_persist: Option<Instant>,
    pub last_durable_persist: Option<Instant>,
}

impl RoomState {
    pub fn new(
        room_id: RoomId,
        topic: String,
        difficulty_mode: DifficultyMode,
        game_mode: GameMode,
        question_count: usize,
        questions: Vec<QuestionRecord>,
    ) -> Self {
        Self {
            room_id,
            topic,
            difficulty_mode,
            game_mode,
            question_count,
            questions,
            question_source: QuestionSource::Catalog,
            generated_questions: None,
            players: HashMap::new(),
            player_tokens: HashMap::new(),
            host_peer_id: None,
            host_token_hash: String::new(),
            room_password_hash: String::new(),
            phase: Phase::Lobby,
            current_question_index: -1,
            active_team: Team::A,
            question_ends_at: None,
            team_reveal_ends_at: None,
            captain_vote_ends_at: None,
            team_naming_ends_at: None,
            reveal_ends_at: None,
            host_reconnect_ends_at: None,
            disconnected_host_name: None,
            disconnected_host_expected_name: None,
            disconnected_host_identity: None,
            paused_state: None,
            manual_pause_by_name: None,
            active_answer: None,
            answer_submissions: HashMap::new(),
            skip_requesters: HashSet::new(),
            skip_request_status: SkipRequestStatus::Idle,
            skip_request_message_id: None,
            last_reveal: None,
            scores: PerTeam::default(),
            player_scores: HashMap::new(),
            player_stats: HashMap::new(),
            question_history: Vec::new(),
            event_history: Vec::new(),
            chat: Vec::new(),
            chat_moderation_strikes: HashMap::new(),
            captains: PerTeam::default(),
            captain_votes: PerTeam::default(),
            captain_ballots: PerTeam::default(),
            captain_vote_ready_teams: PerTeam::default(),
            team_naming_ready_teams: PerTeam::default(),
            team_names: PerTeam::new(
                Team::A.default_name().to_string(),
                Team::B.default_name().to_string(),
            ),
            used_team_names: HashSet::new(),
            results_recorded: false,
            state_version: 1,
            rng: fastrand::Rng::new(),
            timers: TimerSet::default(),
            handle: Weak::new(),
            last_hot_persist: None,
            last_durable_persist: None,
        }
    }

    pub fn has_password(&self) -> bool {
        !self.room_password_hash.trim().is_empty()
    }

    /// The question currently in play, if any.
    pub fn current_question(&self) -> Option<&QuestionRecord> {
        usize::try_from(self.current_question_index)
            .ok()
            .and_then(|index| self.questions.get(index))
    }

    pub fn is_last_question(&self) -> bool {
        self.current_question_index >= self.question_count as i64 - 1
    }

    /// Non-host, non-spectator players.
    pub fn active_non_host_players(&self) -> Vec<&PlayerConnection> {
        let mut players: Vec<&PlayerConnection> = self
            .players
            .values()
            .filter(|player| player.is_active_participant())
            .collect();
        players.sort_by_key(|player| player.peer_id);
        players
    }

    /// Active participants on one team.
    pub fn team_players(&self, team: Team) -> Vec<&PlayerConnection> {
        let mut players: Vec<&PlayerConnection> = self
            .players
            .values()
            .filter(|player| player.is_active_participant() && player.team == Some(team))
            .collect();
        players.sort_by_key(|player| player.peer_id);
        players
    }

    pub fn team_counts(&self) -> PerTeam<usize> {
        let mut counts = PerTeam::default();
        for player in self.players.values() {
            if !player.is_active_participant() {
                continue;
            }
            if let Some(team) = player.team {
                *counts.get_mut(team) += 1;
            }
        }
        counts
    }

    /// Submitters eligible for the current question, by mode.
    pub fn answer_eligible_players(&self) -> Vec<&PlayerConnection> {
        match self.game_mode {
            GameMode::Classic => {
                let captain_id = *self.captains.get(self.active_team);
                captain_id
                    .and_then(|id| self.players.get(&id))
                    .filter(|captain| captain.is_active_participant())
                    .into_iter()
                    .collect()
            }
            GameMode::Chaos => self
                .active_non_host_players()
                .into_iter()
                .filter(|player| player.team.is_some())
                .collect(),
            GameMode::Ffa => self.active_non_host_players(),
        }
    }

    pub fn host(&self) -> Option<&PlayerConnection> {
        self.host_peer_id.and_then(|id| self.players.get(&id))
    }

    /// Clear all captain election state and flags.
    pub fn reset_captain_state(&mut self) {
        self.captain_votes = PerTeam::default();
        self.captain_ballots = PerTeam::default();
        self.captains = PerTeam::default();
        self.captain_vote_ready_teams = PerTeam::default();
        self.team_naming_ready_teams = PerTeam::default();
        for player in self.players.values_mut() {
            player.is_captain = false;
        }
    }

    /// Recompute `is_captain` flags from the captains map.
    pub fn apply_captain_flags(&mut self) {
        let captains = self.captains;
        for player in self.players.values_mut() {
            if player.is_host {
                player.is_captain = false;
                continue;
            }
            player.is_captain = match player.team {
                Some(team) => *captains.get(team) == Some(player.peer_id),
                None => false,
            };
        }
    }

    /// Uniform pick from a slice using the room's injectable RNG.
    pub fn pick_random<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[self.rng.usize(..items.len())])
    }

    /// In-place Fisher-Yates shuffle using the room's RNG.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        self.rng.shuffle(items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> mpsc::Sender<Outbound> {
        mpsc::channel(8).0
    }

    fn test_player(name: &str, team: Option<Team>) -> PlayerConnection {
        PlayerConnection {
            peer_id: Uuid::new_v4(),
            name: name.to_string(),
            team,
            is_host: false,
            is_spectator: false,
            is_captain: false,
            player_token: format!("token-{name}-000000"),
            identity_key: None,
            auth_user_id: None,
            assets: ProfileAssets::default(),
            outbox: sender(),
            socket_id: Uuid::new_v4(),
        }
    }

    fn test_room() -> RoomState {
        RoomState::new(
            "ROOM1".to_string(),
            "История".to_string(),
            DifficultyMode::Mixed,
            GameMode::Classic,
            5,
            crate::catalog::build_catalog_questions("История", 5, DifficultyMode::Mixed),
        )
    }

    #[test]
    fn team_players_excludes_host_and_spectators() {
        let mut room = test_room();
        let mut host = test_player("host", Some(Team::A));
        host.is_host = true;
        let mut spectator = test_player("watcher", Some(Team::A));
        spectator.is_spectator = true;
        let player = test_player("p1", Some(Team::A));
        let player_id = player.peer_id;
        for p in [host, spectator, player] {
            room.players.insert(p.peer_id, p);
        }

        let team_a = room.team_players(Team::A);
        assert_eq!(team_a.len(), 1);
        assert_eq!(team_a[0].peer_id, player_id);
    }

    #[test]
    fn classic_eligibility_is_active_team_captain() {
        let mut room = test_room();
        let captain = test_player("cap", Some(Team::A));
        let captain_id = captain.peer_id;
        let other = test_player("other", Some(Team::B));
        room.players.insert(captain.peer_id, captain);
        room.players.insert(other.peer_id, other);
        room.captains.set(Team::A, Some(captain_id));
        room.active_team = Team::A;

        let eligible = room.answer_eligible_players();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].peer_id, captain_id);

        room.active_team = Team::B;
        assert!(room.answer_eligible_players().is_empty());
    }

    #[test]
    fn chaos_eligibility_requires_team() {
        let mut room = test_room();
        room.game_mode = GameMode::Chaos;
        let teamed = test_player("a", Some(Team::A));
        let teamless = test_player("b", None);
        room.players.insert(teamed.peer_id, teamed);
        room.players.insert(teamless.peer_id, teamless);

        assert_eq!(room.answer_eligible_players().len(), 1);
        room.game_mode = GameMode::Ffa;
        assert_eq!(room.answer_eligible_players().len(), 2);
    }

    #[test]
    fn captain_flags_follow_captains_map() {
        let mut room = test_room();
        let player = test_player("cap", Some(Team::A));
        let player_id = player.peer_id;
        room.players.insert(player.peer_id, player);
        room.captains.set(Team::A, Some(player_id));
        room.apply_captain_flags();
        assert!(room.players[&player_id].is_captain);

        room.captains.set(Team::A, None);
        room.apply_captain_flags();
        assert!(!room.players[&player_id].is_captain);
    }

    #[test]
    fn chat_visibility_round_trips() {
        for visibility in [
            ChatVisibility::All,
            ChatVisibility::Host,
            ChatVisibility::Team(Team::A),
            ChatVisibility::Team(Team::B),
        ] {
            let json = serde_json::to_string(&visibility).unwrap();
            let parsed: ChatVisibility = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, visibility);
        }
        assert_eq!(
            serde_json::to_string(&ChatVisibility::Team(Team::A)).unwrap(),
            "\"A\""
        );
    }

    #[test]
    fn seeded_rng_makes_picks_deterministic() {
        let mut room = test_room();
        room.rng = fastrand::Rng::with_seed(7);
        let first = room.pick_random(&[1, 2, 3, 4]).unwrap();
        let mut other = test_room();
        other.rng = fastrand::Rng::with_seed(7);
        assert_eq!(other.pick_random(&[1, 2, 3, 4]).unwrap(), first);
    }
}
