//! Phase state machine: game start/reset, team reveal, captain vote,
//! team naming, and the reveal → next-step transitions.
//!
//! Every function here runs under the room mutex and re-checks the phase it
//! expects before mutating, so a stale timer firing after a transition is a
//! no-op.

use serde_json::Value;
use std::sync::Arc;

use crate::catalog::build_catalog_questions;
use crate::protocol::types::{GameMode, PeerId, Phase, QuestionSource, Team};
use crate::room::chat::{append_system_chat_message, reset_skip_request};
use crate::room::state::{ChatKind, PerTeam, RoomState};
use crate::room::stats::{append_result_event, initialize_result_tracking};
use crate::room::timers::{TimerAction, TimerKey};
use crate::room::{now_ms, vote};
use crate::server::{QuizServer, RoomEvent};

/// Open the current question: arm the deadline and clear per-question state.
pub(crate) async fn start_question_phase(server: &Arc<QuizServer>, room: &mut RoomState) {
    let question_time_ms = server.config().game.question_time_ms;
    room.phase = Phase::Question;
    room.question_ends_at = Some(now_ms() + question_time_ms);
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;
    room.active_answer = None;
    room.last_reveal = None;
    reset_skip_request(room);

    server.schedule_timer(
        room,
        TimerKey::Question,
        question_time_ms,
        TimerAction::FinalizeQuestion,
    );
    server.broadcast_and_persist(room).await;
}

/// Enter the results phase and record the completed game.
pub(crate) async fn enter_results(server: &Arc<QuizServer>, room: &mut RoomState) {
    room.phase = Phase::Results;
    room.question_ends_at = None;
    room.active_answer = None;
    room.answer_submissions.clear();
    tracing::info!(
        room_id = %room.room_id,
        mode = room.game_mode.as_str(),
        "Game finished, entering results"
    );
    append_result_event(
        room,
        "Игра завершена. Переход к финальной статистике.",
        "phase",
        Value::Null,
    );
    server.persist_game_result(room).await;
    server.broadcast_and_persist(room).await;
}

fn clear_between_questions(room: &mut RoomState) {
    room.chat.clear();
    room.last_reveal = None;
    room.active_answer = None;
    room.answer_submissions.clear();
}

/// Reveal window elapsed: move to the next question, the other team's pass,
/// or the results.
pub(crate) async fn advance_after_reveal(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::Reveal {
        return;
    }
    server.cancel_timer(room, TimerKey::Reveal);
    room.reveal_ends_at = None;

    match room.game_mode {
        GameMode::Ffa => {
            if room.is_last_question() {
                enter_results(server, room).await;
                return;
            }
            room.current_question_index += 1;
            clear_between_questions(room);
            start_question_phase(server, room).await;
        }
        GameMode::Chaos => {
            if room.is_last_question() {
                enter_results(server, room).await;
                return;
            }
            room.current_question_index += 1;
            clear_between_questions(room);
            room.active_team = Team::A;
            start_question_phase(server, room).await;
        }
        GameMode::Classic => {
            // A host skip jumps both teams to the next question.
            let skipped_by_host = room
                .last_reveal
                .as_ref()
                .is_some_and(|reveal| reveal.skipped_by_host);
            if skipped_by_host {
                if room.is_last_question() {
                    enter_results(server, room).await;
                    return;
                }
                room.current_question_index += 1;
                clear_between_questions(room);
                room.active_team = Team::A;
                start_question_phase(server, room).await;
                return;
            }

            // Each question is answered by A, then B.
            if room.active_team == Team::A {
                clear_between_questions(room);
                room.active_team = Team::B;
                start_question_phase(server, room).await;
                return;
            }

            if room.is_last_question() {
                enter_results(server, room).await;
                return;
            }
            room.current_question_index += 1;
            room.chat.clear();
            room.active_team = Team::A;
            room.answer_submissions.clear();
            start_question_phase(server, room).await;
        }
    }
}

/// Team naming done (everyone ready or timeout): open question 0.
pub(crate) async fn finalize_team_naming(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::TeamNaming {
        return;
    }
    server.cancel_timer(room, TimerKey::TeamNaming);
    room.team_naming_ready_teams = PerTeam::new(true, true);

    room.current_question_index = 0;
    room.active_team = Team::A;
    room.chat.clear();
    room.last_reveal = None;
    room.active_answer = None;
    room.answer_submissions.clear();
    reset_skip_request(room);
    room.scores = PerTeam::default();
    room.player_scores.clear();

    start_question_phase(server, room).await;
}

pub(crate) async fn start_team_naming_phase(server: &Arc<QuizServer>, room: &mut RoomState) {
    let naming_time_ms = server.config().game.team_naming_time_ms;
    room.phase = Phase::TeamNaming;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = Some(now_ms() + naming_time_ms);
    vote::initialize_team_naming_progress(room);
    tracing::debug!(
        room_id = %room.room_id,
        captains = ?room.captains,
        ready = ?room.team_naming_ready_teams,
        "Team naming started"
    );

    if room.team_naming_ready_teams.all_ready() {
        finalize_team_naming(server, room).await;
        return;
    }

    server.schedule_timer(
        room,
        TimerKey::TeamNaming,
        naming_time_ms,
        TimerAction::FinalizeTeamNaming,
    );
    server.broadcast_and_persist(room).await;
}

/// Captain vote done: resolve any missing captains and move to team naming.
pub(crate) async fn finalize_captain_vote(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::CaptainVote {
        return;
    }
    server.cancel_timer(room, TimerKey::CaptainVote);
    server.cancel_timer(room, TimerKey::CaptainAuto);

    if room.game_mode != GameMode::Classic {
        room.captains = PerTeam::default();
        room.captain_vote_ready_teams = PerTeam::new(true, true);
        room.apply_captain_flags();
        start_team_naming_phase(server, room).await;
        return;
    }

    for team in Team::ALL {
        if room.captains.get(team).is_none() {
            let chosen = vote::choose_captain_by_votes(room, team);
            room.captains.set(team, chosen);
        }
    }
    room.captain_vote_ready_teams = PerTeam::new(true, true);
    room.apply_captain_flags();
    tracing::debug!(
        room_id = %room.room_id,
        captains = ?room.captains,
        "Captain vote finalized"
    );

    start_team_naming_phase(server, room).await;
}

/// Arm the 3-second auto-captain shortcut when a single-member team is
/// still waiting for a captain.
pub(crate) fn schedule_single_member_auto_captain(server: &Arc<QuizServer>, room: &mut RoomState) {
    if vote::single_member_pending_teams(room).is_empty() {
        return;
    }
    if room.timers.is_armed(TimerKey::CaptainAuto) {
        return;
    }
    let delay_ms = server.config().game.auto_captain_delay_ms;
    server.schedule_timer(room, TimerKey::CaptainAuto, delay_ms, TimerAction::AutoCaptain);
}

/// The auto-captain timer fired: appoint sole members still pending.
pub(crate) async fn run_auto_captain(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::CaptainVote {
        return;
    }
    vote::apply_auto_captains(room);
    if room.captain_vote_ready_teams.all_ready() {
        finalize_captain_vote(server, room).await;
        return;
    }
    server.broadcast_and_persist(room).await;
}

pub(crate) async fn start_captain_vote(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.game_mode != GameMode::Classic {
        start_team_naming_phase(server, room).await;
        return;
    }

    room.phase = Phase::CaptainVote;
    room.team_reveal_ends_at = None;
    room.team_naming_ends_at = None;
    room.team_naming_ready_teams = PerTeam::default();
    room.captains = PerTeam::default();
    room.captain_vote_ready_teams = PerTeam::default();

    // When every non-empty team has a single member, nobody can cast a
    // ballot; the whole vote collapses into the auto-captain delay.
    let single_member_fast_path = vote::all_non_empty_teams_single_member(room);
    let timeout_ms = if single_member_fast_path {
        server.config().game.auto_captain_delay_ms
    } else {
        server.config().game.captain_vote_time_ms
    };
    room.captain_vote_ends_at = Some(now_ms() + timeout_ms);

    if !single_member_fast_path {
        vote::refresh_captain_vote_progress(room);
        schedule_single_member_auto_captain(server, room);
        if room.captain_vote_ready_teams.all_ready() {
            finalize_captain_vote(server, room).await;
            return;
        }
    }

    tracing::debug!(
        room_id = %room.room_id,
        timeout_ms,
        single_member_fast_path,
        "Captain vote started"
    );
    server.schedule_timer(
        room,
        TimerKey::CaptainVote,
        timeout_ms,
        TimerAction::FinalizeCaptainVote,
    );
    server.broadcast_and_persist(room).await;
}

/// Team reveal window elapsed.
pub(crate) async fn after_team_reveal(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::TeamReveal {
        return;
    }
    if room.game_mode == GameMode::Classic {
        start_captain_vote(server, room).await;
        return;
    }
    start_team_naming_phase(server, room).await;
}

/// Shuffle non-host players alternately onto teams A and B.
fn assign_teams_for_start(room: &mut RoomState) {
    let mut candidates: Vec<PeerId> = room
        .players
        .values()
        .filter(|player| !player.is_host)
        .map(|player| player.peer_id)
        .collect();
    candidates.sort();
    let mut shuffled = candidates;
    room.shuffle(&mut shuffled);

    let mut next_team = Team::A;
    for peer_id in shuffled {
        if let Some(player) = room.players.get_mut(&peer_id) {
            player.is_spectator = false;
            player.is_captain = false;
            player.team = Some(next_team);
        }
        next_team = next_team.opposite();
    }
}

/// Host pressed start: validate, provision questions, reset all game state,
/// and enter team reveal (team modes) or question 0 (ffa).
pub(crate) async fn start_game(server: &Arc<QuizServer>, room: &mut RoomState) {
    let participant_count = room.active_non_host_players().len();
    if participant_count == 0 {
        append_system_chat_message(
            room,
            "Нельзя начать игру: в комнате нет участников.",
            ChatKind::System,
        );
        server.broadcast_and_persist(room).await;
        return;
    }
    if room.game_mode.is_team_mode() && participant_count < 2 {
        append_system_chat_message(
            room,
            "Нельзя начать игру: для командных режимов нужно минимум 2 участника.",
            ChatKind::System,
        );
        server.broadcast_and_persist(room).await;
        return;
    }

    if room.question_source == QuestionSource::Generated {
        match room.generated_questions.clone() {
            Some(questions) if questions.len() >= room.question_count => {
                room.questions = questions;
            }
            _ => {
                append_system_chat_message(
                    room,
                    "Не удалось подготовить вопросы по этой теме. Выберите тему из готового списка или попробуйте позже.",
                    ChatKind::System,
                );
                server.broadcast_and_persist(room).await;
                return;
            }
        }
    } else {
        room.questions =
            build_catalog_questions(&room.topic, room.question_count, room.difficulty_mode);
    }

    server.clear_timers(room);
    room.reset_captain_state();

    room.host_reconnect_ends_at = None;
    room.disconnected_host_name = None;
    room.disconnected_host_expected_name = None;
    room.disconnected_host_identity = None;
    room.paused_state = None;
    room.manual_pause_by_name = None;
    room.team_names = PerTeam::new(
        Team::A.default_name().to_string(),
        Team::B.default_name().to_string(),
    );
    room.current_question_index = -1;
    room.active_team = Team::A;
    room.question_ends_at = None;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;
    room.chat.clear();
    room.active_answer = None;
    room.answer_submissions.clear();
    reset_skip_request(room);
    room.last_reveal = None;
    room.scores = PerTeam::default();
    room.player_scores.clear();
    room.chat_moderation_strikes.clear();
    room.results_recorded = false;

    server.metrics.increment(&server.metrics.games_started);
    server
        .publisher()
        .publish(RoomEvent::GameStarted {
            room_id: room.room_id.clone(),
            mode: room.game_mode,
        })
        .await;

    if room.game_mode == GameMode::Ffa {
        let peer_ids: Vec<PeerId> = room.players.keys().copied().collect();
        for peer_id in peer_ids {
            if let Some(player) = room.players.get_mut(&peer_id) {
                if !player.is_host {
                    player.is_spectator = false;
                    player.team = None;
                    player.is_captain = false;
                }
            }
        }
        initialize_result_tracking(room);
        append_result_event(room, "Игра началась (Все против всех).", "phase", Value::Null);
        room.current_question_index = 0;
        start_question_phase(server, room).await;
        return;
    }

    assign_teams_for_start(room);
    initialize_result_tracking(room);
    append_result_event(
        room,
        &format!("Игра началась ({}).", room.game_mode.as_str()),
        "phase",
        Value::Null,
    );
    let team_reveal_ms = server.config().game.team_reveal_time_ms;
    room.phase = Phase::TeamReveal;
    room.team_reveal_ends_at = Some(now_ms() + team_reveal_ms);
    server.schedule_timer(
        room,
        TimerKey::TeamReveal,
        team_reveal_ms,
        TimerAction::AfterTeamReveal,
    );
    server.broadcast_and_persist(room).await;
}

/// Return the room to the lobby (host `new-game` or a forced reset).
pub(crate) async fn reset_game(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
    system_message: Option<&str>,
) {
    server.clear_timers(room);
    if room.question_source == QuestionSource::Catalog {
        room.questions =
            build_catalog_questions(&room.topic, room.question_count, room.difficulty_mode);
    }
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
    reset_skip_request(room);
    room.chat.clear();
    room.last_reveal = None;
    room.scores = PerTeam::default();
    room.player_scores.clear();
    room.player_stats.clear();
    room.question_history.clear();
    room.event_history.clear();
    room.chat_moderation_strikes.clear();
    room.results_recorded = false;

    room.reset_captain_state();
    room.team_names = PerTeam::new(
        Team::A.default_name().to_string(),
        Team::B.default_name().to_string(),
    );

    let peer_ids: Vec<PeerId> = room.players.keys().copied().collect();
    for peer_id in peer_ids {
        if let Some(player) = room.players.get_mut(&peer_id) {
            if !player.is_host {
                player.is_spectator = false;
                player.team = None;
            }
        }
    }

    if let Some(message) = system_message {
        append_system_chat_message(room, message, ChatKind::System);
    }

    server.broadcast_and_persist(room).await;
}
