//! Viewer-scoped projection of room state into the `state-sync` payload.
//!
//! Every field a client sees goes through here; masking rules (team
//! visibility, captain votes, question options, reveal records) are applied
//! per viewer before the frame leaves the room mutex.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::types::{
    DifficultyMode, GameMode, PeerId, Phase, QuestionDifficulty, RoomId, SkipRequestStatus, Team,
};
use crate::room::chat::{can_player_see_message, skip_requester_names};
use crate::room::snapshot::phase_deadline_epoch_ms;
use crate::room::state::{ChatKind, PerTeam, PlayerConnection, RoomState};
use crate::room::stats::{
    build_captain_contribution, build_ffa_ranking, build_result_players, calculate_speed_bonus,
    CaptainStatRow, PlayerStatRow, RankingRow, RevealRecord, BASE_CORRECT_POINTS,
};
use crate::room::{now_ms, vote};

/// One player entry of the `state-sync` players list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub peer_id: PeerId,
    pub auth_user_id: Option<i64>,
    pub name: String,
    pub team: Option<Team>,
    pub is_host: bool,
    pub is_spectator: bool,
    pub is_captain: bool,
    pub avatar: Option<String>,
    pub profile_frame: Option<String>,
    pub mascot_skins: MascotSkinsView,
    pub victory_effects: VictoryEffectsView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MascotSkinsView {
    pub cat: Option<String>,
    pub dog: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VictoryEffectsView {
    pub front: Option<String>,
    pub back: Option<String>,
}

/// Current question with options hidden from ineligible viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub difficulty: QuestionDifficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteProgress {
    pub votes: u32,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerProgress {
    pub answered: usize,
    pub total: usize,
}

/// Private echo of the viewer's own ffa answer during the question phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FfaAnswerView {
    pub selected_index: Option<i64>,
    pub is_correct: bool,
    pub base_points: i64,
    pub speed_bonus: i64,
    pub time_remaining_ms: u64,
    pub points_awarded: i64,
    pub projected_total_score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosProgressView {
    pub submitted: bool,
    pub answered_by_team: PerTeam<usize>,
    pub total_by_team: PerTeam<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRequestView {
    pub count: usize,
    pub me_requested: bool,
    /// Requester names; populated for host and spectators only.
    pub names: Vec<String>,
    pub status: SkipRequestStatus,
    pub notice: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptainContributionView {
    #[serde(rename = "A")]
    pub a: Option<CaptainStatRow>,
    #[serde(rename = "B")]
    pub b: Option<CaptainStatRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Host-only appendix of the results summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResultDetails {
    pub players: Vec<PlayerStatRow>,
    pub question_history: Vec<crate::room::stats::QuestionHistoryEntry>,
    pub event_history: Vec<crate::room::stats::EventHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicResultRow {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Option<Team>,
    pub correct_answers: u32,
}

/// Results shown after the last question. Public shape for everyone; host
/// additionally receives `hostDetails`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummaryView {
    pub mode: GameMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Vec<RankingRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_scores: Option<PerTeam<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_team: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_names: Option<PerTeam<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<PublicResultRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captain_contribution: Option<CaptainContributionView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_details: Option<HostResultDetails>,
}

/// Chat entry as delivered to a viewer (visibility tag stripped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub id: String,
    pub from: String,
    pub name: String,
    pub text: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChatKind>,
}

/// The `room` object of a `state-sync` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateView {
    pub room_id: RoomId,
    pub topic: String,
    pub difficulty_mode: DifficultyMode,
    pub game_mode: GameMode,
    pub question_count: usize,
    pub state_version: u64,
    pub last_event_id: usize,
    pub deadline_epoch_ms: Option<u64>,
    pub phase: Phase,
    pub current_question_index: i64,
    pub active_team: Team,
    pub question_ends_at: Option<u64>,
    pub team_reveal_ends_at: Option<u64>,
    pub captain_vote_ends_at: Option<u64>,
    pub team_naming_ends_at: Option<u64>,
    pub reveal_ends_at: Option<u64>,
    pub host_reconnect_ends_at: Option<u64>,
    pub disconnected_host_name: Option<String>,
    pub manual_pause_by_name: Option<String>,
    pub scores: PerTeam<i64>,
    pub player_scores: HashMap<PeerId, i64>,
    pub has_password: bool,
    pub team_names: PerTeam<String>,
    pub captains: PerTeam<Option<PeerId>>,
    pub captain_votes: PerTeam<HashMap<PeerId, u32>>,
    pub my_captain_vote: Option<PeerId>,
    pub captain_vote_ready_teams: PerTeam<bool>,
    pub captain_vote_progress: PerTeam<VoteProgress>,
    pub team_naming_ready_teams: PerTeam<bool>,
    pub players: Vec<PlayerView>,
    pub current_question: Option<QuestionView>,
    pub last_reveal: Option<RevealRecord>,
    pub answer_progress: Option<AnswerProgress>,
    pub my_answer: Option<FfaAnswerView>,
    pub pending_players: Vec<String>,
    pub chaos_progress: Option<ChaosProgressView>,
    pub skip_request: Option<SkipRequestView>,
    pub results_summary: Option<ResultsSummaryView>,
    pub chat: Vec<ChatMessageView>,
}

fn is_paused_lobby(room: &RoomState) -> bool {
    room.phase == Phase::HostReconnect
        && room
            .paused_state
            .is_some_and(|paused| paused.phase == Phase::Lobby)
}

/// Teams are hidden while the room is (or is paused in) the lobby, and from
/// viewers who have no team themselves (except the host).
fn visible_team_for_viewer(
    room: &RoomState,
    viewer: &PlayerConnection,
    target: &PlayerConnection,
) -> Option<Team> {
    if room.phase == Phase::Lobby || is_paused_lobby(room) {
        return None;
    }
    if viewer.is_host || viewer.is_spectator {
        return target.team;
    }
    if viewer.team.is_none() {
        return None;
    }
    target.team
}

fn build_question_for_viewer(room: &RoomState, viewer: &PlayerConnection) -> Option<QuestionView> {
    let question = room.current_question()?;

    let can_see_options = match room.phase {
        Phase::Question => {
            room.game_mode != GameMode::Classic
                || viewer.is_host
                || viewer.is_spectator
                || viewer.team == Some(room.active_team)
        }
        Phase::Reveal => {
            if room.game_mode != GameMode::Classic {
                true
            } else {
                let reveal_team = room.last_reveal.as_ref().and_then(|reveal| reveal.team);
                viewer.is_host
                    || viewer.is_spectator
                    || (viewer.team.is_some() && reveal_team == viewer.team)
            }
        }
        Phase::Results
        | Phase::TeamNaming
        | Phase::CaptainVote
        | Phase::TeamReveal
        | Phase::HostReconnect => true,
        Phase::Lobby | Phase::ManualPause => false,
    };

    Some(QuestionView {
        id: question.id.clone(),
        text: question.text.clone(),
        options: if can_see_options {
            question.options.clone()
        } else {
            Vec::new()
        },
        difficulty: question.difficulty,
    })
}

fn build_reveal_for_viewer(room: &RoomState, viewer: &PlayerConnection) -> Option<RevealRecord> {
    if room.phase == Phase::Results && !viewer.is_host {
        return None;
    }
    let reveal = room.last_reveal.as_ref()?;
    if room.game_mode != GameMode::Classic {
        return Some(reveal.clone());
    }
    let reveal_team = reveal.team?;
    if reveal.skipped_by_host || viewer.is_host || viewer.is_spectator {
        return Some(reveal.clone());
    }
    if viewer.team != Some(reveal_team) {
        return None;
    }
    Some(reveal.clone())
}

fn build_answer_progress(room: &RoomState) -> Option<AnswerProgress> {
    if room.phase != Phase::Question {
        return None;
    }
    Some(AnswerProgress {
        answered: room.answer_submissions.len(),
        total: room.answer_eligible_players().len(),
    })
}

fn build_ffa_answer_for_viewer(
    room: &RoomState,
    viewer: &PlayerConnection,
    question_time_ms: u64,
) -> Option<FfaAnswerView> {
    if room.game_mode != GameMode::Ffa
        || room.phase != Phase::Question
        || viewer.is_host
        || viewer.is_spectator
    {
        return None;
    }
    let question = room.current_question()?;
    let submission = room.answer_submissions.get(&viewer.peer_id)?;

    let question_ends_at = room.question_ends_at.unwrap_or_else(now_ms);
    let remaining_ms = question_ends_at.saturating_sub(submission.answered_at);
    let is_correct = submission.selected_index == question.correct_index as i64;
    let speed_bonus = if is_correct {
        calculate_speed_bonus(remaining_ms, question_time_ms)
    } else {
        0
    };
    let base_points = if is_correct { BASE_CORRECT_POINTS } else { 0 };
    let points_awarded = base_points + speed_bonus;
    Some(FfaAnswerView {
        selected_index: Some(submission.selected_index),
        is_correct,
        base_points,
        speed_bonus,
        time_remaining_ms: if is_correct { remaining_ms } else { 0 },
        points_awarded,
        projected_total_score: room.player_scores.get(&viewer.peer_id).copied().unwrap_or(0)
            + points_awarded,
    })
}

/// Names of players the viewer is still waiting on, shown only after the
/// viewer has answered.
fn build_ffa_pending_players(room: &RoomState, viewer: &PlayerConnection) -> Vec<String> {
    if room.game_mode != GameMode::Ffa || room.phase != Phase::Question {
        return Vec::new();
    }
    if viewer.is_host || viewer.is_spectator {
        return Vec::new();
    }
    if !room.answer_submissions.contains_key(&viewer.peer_id) {
        return Vec::new();
    }
    room.active_non_host_players()
        .into_iter()
        .filter(|player| !room.answer_submissions.contains_key(&player.peer_id))
        .map(|player| player.name.clone())
        .collect()
}

fn build_chaos_progress(room: &RoomState, viewer: &PlayerConnection) -> Option<ChaosProgressView> {
    if room.game_mode != GameMode::Chaos || room.phase != Phase::Question {
        return None;
    }
    let mut answered = PerTeam::<usize>::default();
    for peer_id in room.answer_submissions.keys() {
        let Some(player) = room.players.get(peer_id) else {
            continue;
        };
        if !player.is_active_participant() {
            continue;
        }
        if let Some(team) = player.team {
            *answered.get_mut(team) += 1;
        }
    }
    Some(ChaosProgressView {
        submitted: room.answer_submissions.contains_key(&viewer.peer_id),
        answered_by_team: answered,
        total_by_team: room.team_counts(),
    })
}

fn build_skip_request_view(
    room: &RoomState,
    viewer: &PlayerConnection,
) -> Option<SkipRequestView> {
    if room.phase != Phase::Question {
        return None;
    }
    let names = skip_requester_names(room);
    let notice = match room.skip_request_status {
        SkipRequestStatus::Pending if !names.is_empty() => Some(if names.len() == 1 {
            format!("Участник {} попросил пропустить вопрос.", names[0])
        } else {
            format!("Участники {} попросили пропустить вопрос.", names.join(", "))
        }),
        SkipRequestStatus::Rejected => {
            Some("Запрос на пропуск вопроса отклонён ведущим.".to_string())
        }
        _ => None,
    };
    Some(SkipRequestView {
        count: names.len(),
        me_requested: room.skip_requesters.contains(&viewer.peer_id),
        names: if viewer.is_host || viewer.is_spectator {
            names
        } else {
            Vec::new()
        },
        status: room.skip_request_status,
        notice,
        message_id: room.skip_request_message_id.clone(),
    })
}

fn build_results_summary(
    room: &mut RoomState,
    viewer_peer_id: PeerId,
) -> Option<ResultsSummaryView> {
    if room.phase != Phase::Results {
        return None;
    }
    let viewer_is_host = room
        .players
        .get(&viewer_peer_id)
        .map(|viewer| viewer.is_host)
        .unwrap_or(false);

    let players_full = build_result_players(room);
    let host_details = viewer_is_host.then(|| HostResultDetails {
        players: players_full.clone(),
        question_history: room
            .question_history
            .iter()
            .rev()
            .take(120)
            .rev()
            .cloned()
            .collect(),
        event_history: room
            .event_history
            .iter()
            .rev()
            .take(180)
            .rev()
            .cloned()
            .collect(),
    });

    if room.game_mode == GameMode::Ffa {
        return Some(ResultsSummaryView {
            mode: GameMode::Ffa,
            ranking: Some(build_ffa_ranking(&players_full)),
            team_scores: None,
            winner_team: None,
            team_names: None,
            players: None,
            captain_contribution: None,
            host_details,
        });
    }

    let winner_team = if room.scores.a > room.scores.b {
        Some(Team::A)
    } else if room.scores.b > room.scores.a {
        Some(Team::B)
    } else {
        None
    };

    let captain_contribution = if room.game_mode == GameMode::Classic {
        let contribution = build_captain_contribution(room, &players_full);
        CaptainContributionView {
            a: contribution.a,
            b: contribution.b,
            note: None,
        }
    } else {
        CaptainContributionView {
            a: None,
            b: None,
            note: Some("В этом режиме капитанов нет.".to_string()),
        }
    };

    Some(ResultsSummaryView {
        mode: room.game_mode,
        ranking: None,
        team_scores: Some(room.scores),
        winner_team,
        team_names: Some(room.team_names.clone()),
        players: Some(
            players_full
                .iter()
                .map(|row| PublicResultRow {
                    peer_id: row.peer_id,
                    name: row.name.clone(),
                    team: row.team,
                    correct_answers: row.correct_answers,
                })
                .collect(),
        ),
        captain_contribution: Some(captain_contribution),
        host_details,
    })
}

/// Captain votes visible to this viewer: host and spectators see both
/// teams, players only their own; nothing is shown on the results screen
/// to non-hosts.
fn build_votes_for_viewer(
    room: &RoomState,
    viewer: &PlayerConnection,
) -> PerTeam<HashMap<PeerId, u32>> {
    if room.phase == Phase::Results && !viewer.is_host {
        return PerTeam::default();
    }
    if viewer.is_host || viewer.is_spectator {
        return room.captain_votes.clone();
    }
    match viewer.team {
        Some(Team::A) => PerTeam::new(room.captain_votes.a.clone(), HashMap::new()),
        Some(Team::B) => PerTeam::new(HashMap::new(), room.captain_votes.b.clone()),
        None => PerTeam::default(),
    }
}

fn viewer_captain_vote(room: &RoomState, viewer: &PlayerConnection) -> Option<PeerId> {
    let team = viewer.team?;
    if viewer.is_host {
        return None;
    }
    room.captain_ballots.get(team).get(&viewer.peer_id).copied()
}

fn build_captain_vote_progress(room: &RoomState) -> PerTeam<VoteProgress> {
    PerTeam::new(
        VoteProgress {
            votes: vote::team_votes_count(room, Team::A),
            total: room.team_players(Team::A).len(),
        },
        VoteProgress {
            votes: vote::team_votes_count(room, Team::B),
            total: room.team_players(Team::B).len(),
        },
    )
}

/// Project the room for one viewer.
///
/// Takes `&mut RoomState` because the results projection refreshes stat
/// metadata in place; nothing observable changes for other viewers.
pub fn build_state_view(
    room: &mut RoomState,
    viewer_peer_id: PeerId,
    question_time_ms: u64,
) -> Option<RoomStateView> {
    let viewer = room.players.get(&viewer_peer_id)?;

    let players: Vec<PlayerView> = {
        let mut entries: Vec<&PlayerConnection> = room.players.values().collect();
        entries.sort_by_key(|player| player.peer_id);
        entries
            .iter()
            .map(|player| PlayerView {
                peer_id: player.peer_id,
                auth_user_id: player.auth_user_id,
                name: player.name.clone(),
                team: visible_team_for_viewer(room, viewer, player),
                is_host: player.is_host,
                is_spectator: player.is_spectator,
                is_captain: player.is_captain,
                avatar: player.assets.avatar.clone(),
                profile_frame: player.assets.profile_frame.clone(),
                mascot_skins: MascotSkinsView {
                    cat: player.assets.mascot_skin_cat.clone(),
                    dog: player.assets.mascot_skin_dog.clone(),
                },
                victory_effects: VictoryEffectsView {
                    front: player.assets.victory_effect_front.clone(),
                    back: player.assets.victory_effect_back.clone(),
                },
            })
            .collect()
    };

    let chat: Vec<ChatMessageView> = room
        .chat
        .iter()
        .filter(|message| can_player_see_message(viewer, room, message))
        .map(|message| ChatMessageView {
            id: message.id.clone(),
            from: message.from.clone(),
            name: message.name.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
            kind: message.kind,
        })
        .collect();

    let current_question = build_question_for_viewer(room, viewer);
    let last_reveal = build_reveal_for_viewer(room, viewer);
    let answer_progress = build_answer_progress(room);
    let my_answer = build_ffa_answer_for_viewer(room, viewer, question_time_ms);
    let pending_players = build_ffa_pending_players(room, viewer);
    let chaos_progress = build_chaos_progress(room, viewer);
    let skip_request = build_skip_request_view(room, viewer);
    let captain_votes = build_votes_for_viewer(room, viewer);
    let my_captain_vote = viewer_captain_vote(room, viewer);
    let captain_vote_progress = build_captain_vote_progress(room);

    let results_summary = build_results_summary(room, viewer_peer_id);

    Some(RoomStateView {
        room_id: room.room_id.clone(),
        topic: room.topic.clone(),
        difficulty_mode: room.difficulty_mode,
        game_mode: room.game_mode,
        question_count: room.question_count,
        state_version: room.state_version.max(1),
        last_event_id: room.event_history.len(),
        deadline_epoch_ms: phase_deadline_epoch_ms(room),
        phase: room.phase,
        current_question_index: room.current_question_index,
        active_team: room.active_team,
        question_ends_at: room.question_ends_at,
        team_reveal_ends_at: room.team_reveal_ends_at,
        captain_vote_ends_at: room.captain_vote_ends_at,
        team_naming_ends_at: room.team_naming_ends_at,
        reveal_ends_at: room.reveal_ends_at,
        host_reconnect_ends_at: room.host_reconnect_ends_at,
        disconnected_host_name: room.disconnected_host_name.clone(),
        manual_pause_by_name: room.manual_pause_by_name.clone(),
        scores: room.scores,
        player_scores: room.player_scores.clone(),
        has_password: room.has_password(),
        team_names: room.team_names.clone(),
        captains: room.captains,
        captain_votes,
        my_captain_vote,
        captain_vote_ready_teams: room.captain_vote_ready_teams,
        captain_vote_progress,
        team_naming_ready_teams: room.team_naming_ready_teams,
        players,
        current_question,
        last_reveal,
        answer_progress,
        my_answer,
        pending_players,
        chaos_progress,
        skip_request,
        results_summary,
        chat,
    })
}
