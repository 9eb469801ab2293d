//! Question finalization and scoring for the three game modes.
//!
//! Invoked by the question timer, by eligibility-complete submission, or by
//! a host skip. Points per correct answer are 1 base + speed bonus; the
//! remaining time is always measured from the moment of submission.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::types::{GameMode, PeerId, Phase, Team};
use crate::room::chat::reset_skip_request;
use crate::room::state::{PerTeam, RoomState};
use crate::room::stats::{
    append_question_history, append_result_event, calculate_speed_bonus, record_answer_stat,
    record_skip_stat, AnswerOutcomeStatus, ChaosTeamResult, ParticipantRef, PlayerQuestionResult,
    QuestionHistoryEntry, RevealRecord, BASE_CORRECT_POINTS,
};
use crate::room::timers::{TimerAction, TimerKey};
use crate::room::{now_ms, phases};
use crate::server::QuizServer;

fn zero_result(
    participant: &ParticipantRef,
    status: AnswerOutcomeStatus,
    total_score: Option<i64>,
) -> PlayerQuestionResult {
    PlayerQuestionResult {
        peer_id: participant.peer_id,
        name: participant.name.clone(),
        team: participant.team,
        selected_index: None,
        is_correct: false,
        base_points: 0,
        speed_bonus: 0,
        time_remaining_ms: 0,
        points_awarded: 0,
        total_score,
        status,
    }
}

/// Close the current question: score it, write the reveal record and the
/// history entry, and arm the reveal timer.
pub(crate) async fn finalize_question(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::Question || room.current_question_index < 0 {
        return;
    }
    server.cancel_timer(room, TimerKey::Question);

    let Some(question) = room.current_question().cloned() else {
        return;
    };
    let correct_index = question.correct_index as i64;
    let question_number = room.current_question_index + 1;
    let question_time_ms = server.config().game.question_time_ms;
    let reveal_time_ms = server.config().game.reveal_time_ms;
    let question_ends_at = room.question_ends_at;
    let fallback_remaining_ms = question_ends_at
        .map(|ends_at| ends_at.saturating_sub(now_ms()))
        .unwrap_or(0);

    match room.game_mode {
        GameMode::Ffa => {
            let participants: Vec<ParticipantRef> = room
                .active_non_host_players()
                .into_iter()
                .map(ParticipantRef::from)
                .collect();
            let mut player_results = Vec::with_capacity(participants.len());
            let mut total_points_awarded = 0i64;

            for participant in &participants {
                let Some(submission) =
                    room.answer_submissions.get(&participant.peer_id).cloned()
                else {
                    record_skip_stat(&mut room.player_stats, participant);
                    let total_score = room
                        .player_scores
                        .get(&participant.peer_id)
                        .copied()
                        .unwrap_or(0);
                    player_results.push(zero_result(
                        participant,
                        AnswerOutcomeStatus::Timeout,
                        Some(total_score),
                    ));
                    continue;
                };

                let remaining_ms = question_ends_at
                    .map(|ends_at| ends_at.saturating_sub(submission.answered_at))
                    .unwrap_or(0);
                let is_correct = submission.selected_index == correct_index;
                let speed_bonus = if is_correct {
                    calculate_speed_bonus(remaining_ms, question_time_ms)
                } else {
                    0
                };
                let base_points = if is_correct { BASE_CORRECT_POINTS } else { 0 };
                let points_awarded = base_points + speed_bonus;
                if points_awarded > 0 {
                    *room.player_scores.entry(participant.peer_id).or_insert(0) += points_awarded;
                }
                total_points_awarded += points_awarded;
                let total_score = room
                    .player_scores
                    .get(&participant.peer_id)
                    .copied()
                    .unwrap_or(0);
                record_answer_stat(
                    &mut room.player_stats,
                    participant,
                    is_correct,
                    points_awarded,
                    remaining_ms,
                    Some(submission.answered_at),
                    question_time_ms,
                );
                player_results.push(PlayerQuestionResult {
                    peer_id: participant.peer_id,
                    name: participant.name.clone(),
                    team: participant.team,
                    selected_index: Some(submission.selected_index),
                    is_correct,
                    base_points,
                    speed_bonus,
                    time_remaining_ms: if is_correct { remaining_ms } else { 0 },
                    points_awarded,
                    total_score: Some(total_score),
                    status: AnswerOutcomeStatus::Answered,
                });
            }

            let mut history = QuestionHistoryEntry::base(
                GameMode::Ffa,
                question_number,
                question.difficulty,
                correct_index,
            );
            history.player_results = Some(player_results.clone());
            append_question_history(room, history);

            room.chat.clear();
            room.phase = Phase::Reveal;
            room.question_ends_at = None;
            room.reveal_ends_at = Some(now_ms() + reveal_time_ms);
            room.active_answer = None;
            room.answer_submissions.clear();
            reset_skip_request(room);
            room.last_reveal = Some(RevealRecord {
                mode: GameMode::Ffa,
                correct_index,
                selected_index: None,
                answered_by: None,
                answered_by_name: Some("Индивидуальная проверка".to_string()),
                team: None,
                is_correct: false,
                base_points: 0,
                speed_bonus: 0,
                time_remaining_ms: 0,
                points_awarded: total_points_awarded,
                skipped_by_host: false,
                skipped_by_name: None,
                participants_count: Some(participants.len()),
                player_results: Some(player_results),
                chaos_team_results: None,
            });

            server.schedule_timer(
                room,
                TimerKey::Reveal,
                reveal_time_ms,
                TimerAction::AdvanceAfterReveal,
            );
            server.broadcast_and_persist(room).await;
            return;
        }
        GameMode::Classic => {
            room.chat.clear();
            room.phase = Phase::Reveal;
            room.question_ends_at = None;
            room.reveal_ends_at = Some(now_ms() + reveal_time_ms);

            let selected = room.active_answer.clone();
            let selected_index = selected.as_ref().map(|answer| answer.selected_index);
            let is_correct = selected_index == Some(correct_index);
            // Remaining time counts from the captain's submission, exactly
            // like the individual modes.
            let remaining_ms = selected
                .as_ref()
                .and_then(|answer| {
                    question_ends_at.map(|ends_at| ends_at.saturating_sub(answer.answered_at))
                })
                .unwrap_or(0);
            let speed_bonus = if is_correct {
                calculate_speed_bonus(remaining_ms, question_time_ms)
            } else {
                0
            };
            let base_points = if is_correct { BASE_CORRECT_POINTS } else { 0 };
            let points_awarded = base_points + speed_bonus;
            if points_awarded > 0 {
                *room.scores.get_mut(room.active_team) += points_awarded;
            }

            let answered_by = selected.as_ref().map(|answer| answer.by_peer_id);
            let answered_by_name = selected.as_ref().map(|answer| answer.by_name.clone());
            if let Some(answer) = &selected {
                let participant = room
                    .players
                    .get(&answer.by_peer_id)
                    .filter(|player| !player.is_host)
                    .map(ParticipantRef::from);
                if let Some(participant) = participant {
                    record_answer_stat(
                        &mut room.player_stats,
                        &participant,
                        is_correct,
                        points_awarded,
                        remaining_ms,
                        Some(answer.answered_at),
                        question_time_ms,
                    );
                }
            } else if let Some(captain_id) = *room.captains.get(room.active_team) {
                let participant = room
                    .players
                    .get(&captain_id)
                    .filter(|player| !player.is_host)
                    .map(ParticipantRef::from);
                if let Some(participant) = participant {
                    record_skip_stat(&mut room.player_stats, &participant);
                }
            }

            room.last_reveal = Some(RevealRecord {
                mode: GameMode::Classic,
                correct_index,
                selected_index,
                answered_by,
                answered_by_name: answered_by_name.clone(),
                team: Some(room.active_team),
                is_correct,
                base_points,
                speed_bonus,
                time_remaining_ms: if is_correct { remaining_ms } else { 0 },
                points_awarded,
                skipped_by_host: false,
                skipped_by_name: None,
                participants_count: None,
                player_results: None,
                chaos_team_results: None,
            });

            let mut history = QuestionHistoryEntry::base(
                GameMode::Classic,
                question_number,
                question.difficulty,
                correct_index,
            );
            history.team = Some(room.active_team);
            history.selected_index = selected_index;
            history.answered_by = answered_by;
            history.answered_by_name = answered_by_name;
            history.is_correct = Some(is_correct);
            history.base_points = Some(base_points);
            history.speed_bonus = Some(speed_bonus);
            history.time_remaining_ms = Some(if is_correct { remaining_ms } else { 0 });
            history.points_awarded = Some(points_awarded);
            history.status = Some(if answered_by.is_some() {
                AnswerOutcomeStatus::Answered
            } else {
                AnswerOutcomeStatus::Timeout
            });
            append_question_history(room, history);
        }
        GameMode::Chaos => {
            room.chat.clear();
            room.phase = Phase::Reveal;
            room.question_ends_at = None;
            room.reveal_ends_at = Some(now_ms() + reveal_time_ms);

            let mut team_results: PerTeam<Option<ChaosTeamResult>> = PerTeam::default();
            let mut chaos_player_results = Vec::new();
            let mut total_points_awarded = 0i64;

            for team in Team::ALL {
                let participants: Vec<ParticipantRef> = room
                    .team_players(team)
                    .into_iter()
                    .map(ParticipantRef::from)
                    .collect();
                let mut vote_counts: HashMap<i64, u32> = HashMap::new();
                let mut answered_count = 0usize;
                let mut latest_answered_at: Option<u64> = None;

                for participant in &participants {
                    let Some(submission) =
                        room.answer_submissions.get(&participant.peer_id).cloned()
                    else {
                        record_skip_stat(&mut room.player_stats, participant);
                        chaos_player_results.push(zero_result(
                            participant,
                            AnswerOutcomeStatus::Timeout,
                            None,
                        ));
                        continue;
                    };
                    answered_count += 1;
                    latest_answered_at = Some(
                        latest_answered_at
                            .map_or(submission.answered_at, |latest| {
                                latest.max(submission.answered_at)
                            }),
                    );
                    let player_remaining_ms = question_ends_at
                        .map(|ends_at| ends_at.saturating_sub(submission.answered_at))
                        .unwrap_or(fallback_remaining_ms);

                    *vote_counts.entry(submission.selected_index).or_insert(0) += 1;
                    let player_is_correct = submission.selected_index == correct_index;
                    record_answer_stat(
                        &mut room.player_stats,
                        participant,
                        player_is_correct,
                        0,
                        player_remaining_ms,
                        Some(submission.answered_at),
                        question_time_ms,
                    );
                    chaos_player_results.push(PlayerQuestionResult {
                        peer_id: participant.peer_id,
                        name: participant.name.clone(),
                        team: Some(team),
                        selected_index: Some(submission.selected_index),
                        is_correct: player_is_correct,
                        base_points: 0,
                        speed_bonus: 0,
                        time_remaining_ms: if player_is_correct {
                            player_remaining_ms
                        } else {
                            0
                        },
                        points_awarded: 0,
                        total_score: None,
                        status: AnswerOutcomeStatus::Answered,
                    });
                }

                let mut selected_index = None;
                let mut tie_resolved_randomly = false;
                if !vote_counts.is_empty() {
                    let max_votes = vote_counts.values().copied().max().unwrap_or(0);
                    let mut leaders: Vec<i64> = vote_counts
                        .iter()
                        .filter(|(_, count)| **count == max_votes)
                        .map(|(index, _)| *index)
                        .collect();
                    leaders.sort_unstable();
                    tie_resolved_randomly = leaders.len() > 1;
                    selected_index = room.pick_random(&leaders);
                }

                let is_correct = selected_index == Some(correct_index);
                let team_remaining_ms = match (question_ends_at, latest_answered_at) {
                    (Some(ends_at), Some(latest)) => ends_at.saturating_sub(latest),
                    _ => fallback_remaining_ms,
                };
                let speed_bonus = if is_correct {
                    calculate_speed_bonus(team_remaining_ms, question_time_ms)
                } else {
                    0
                };
                let base_points = if is_correct { BASE_CORRECT_POINTS } else { 0 };
                let points_awarded = base_points + speed_bonus;
                if points_awarded > 0 {
                    *room.scores.get_mut(team) += points_awarded;
                }
                total_points_awarded += points_awarded;

                team_results.set(
                    team,
                    Some(ChaosTeamResult {
                        team,
                        selected_index,
                        is_correct,
                        base_points,
                        speed_bonus,
                        time_remaining_ms: if is_correct { team_remaining_ms } else { 0 },
                        points_awarded,
                        vote_counts: vote_counts
                            .into_iter()
                            .map(|(index, count)| (index.to_string(), count))
                            .collect(),
                        tie_resolved_randomly,
                        participants_count: participants.len(),
                        answered_count,
                    }),
                );
            }

            let chaos_team_results = PerTeam::new(
                team_results.a.take().unwrap_or_else(|| empty_team_result(Team::A)),
                team_results.b.take().unwrap_or_else(|| empty_team_result(Team::B)),
            );

            room.last_reveal = Some(RevealRecord {
                mode: GameMode::Chaos,
                correct_index,
                selected_index: None,
                answered_by: None,
                answered_by_name: Some("Голосование команд".to_string()),
                team: None,
                is_correct: false,
                base_points: 0,
                speed_bonus: 0,
                time_remaining_ms: 0,
                points_awarded: total_points_awarded,
                skipped_by_host: false,
                skipped_by_name: None,
                participants_count: None,
                player_results: Some(chaos_player_results.clone()),
                chaos_team_results: Some(chaos_team_results.clone()),
            });

            let mut history = QuestionHistoryEntry::base(
                GameMode::Chaos,
                question_number,
                question.difficulty,
                correct_index,
            );
            history.chaos_team_results = Some(chaos_team_results);
            history.player_results = Some(chaos_player_results);
            append_question_history(room, history);
        }
    }

    room.active_answer = None;
    room.answer_submissions.clear();
    reset_skip_request(room);
    server.schedule_timer(
        room,
        TimerKey::Reveal,
        reveal_time_ms,
        TimerAction::AdvanceAfterReveal,
    );
    server.broadcast_and_persist(room).await;
}

fn empty_team_result(team: Team) -> ChaosTeamResult {
    ChaosTeamResult {
        team,
        selected_index: None,
        is_correct: false,
        base_points: 0,
        speed_bonus: 0,
        time_remaining_ms: 0,
        points_awarded: 0,
        vote_counts: HashMap::new(),
        tie_resolved_randomly: false,
        participants_count: 0,
        answered_count: 0,
    }
}

/// Host skips the current question. FFA jumps straight to the next question
/// (or results) without a reveal; team modes show a short reveal flagged as
/// skipped.
pub(crate) async fn skip_question_by_host(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
    host_peer_id: PeerId,
) {
    if room.phase != Phase::Question || room.current_question_index < 0 {
        return;
    }
    server.cancel_timer(room, TimerKey::Question);

    let Some(question) = room.current_question().cloned() else {
        return;
    };
    let question_number = room.current_question_index + 1;
    let host_name = room
        .players
        .get(&host_peer_id)
        .map(|player| player.name.clone())
        .unwrap_or_else(|| "Ведущий".to_string());
    let remaining_ms = room
        .question_ends_at
        .map(|ends_at| ends_at.saturating_sub(now_ms()))
        .unwrap_or(0);

    let skipped_participants: Vec<ParticipantRef> = match room.game_mode {
        GameMode::Ffa => room
            .active_non_host_players()
            .into_iter()
            .map(ParticipantRef::from)
            .collect(),
        GameMode::Chaos => room
            .active_non_host_players()
            .into_iter()
            .filter(|player| player.team.is_some())
            .map(ParticipantRef::from)
            .collect(),
        GameMode::Classic => {
            let captain_id = *room.captains.get(room.active_team);
            captain_id
                .and_then(|id| room.players.get(&id))
                .map(ParticipantRef::from)
                .into_iter()
                .collect()
        }
    };
    let skipped_player_results: Vec<PlayerQuestionResult> = skipped_participants
        .iter()
        .map(|participant| zero_result(participant, AnswerOutcomeStatus::SkippedByHost, None))
        .collect();
    for participant in &skipped_participants {
        if !room.answer_submissions.contains_key(&participant.peer_id) {
            record_skip_stat(&mut room.player_stats, participant);
        }
    }

    let mut history = QuestionHistoryEntry::base(
        room.game_mode,
        question_number,
        question.difficulty,
        question.correct_index as i64,
    );
    history.team = (room.game_mode != GameMode::Ffa).then_some(room.active_team);
    history.skipped_by_host = true;
    history.skipped_by_name = Some(host_name.clone());
    history.time_remaining_ms = Some(remaining_ms);
    history.player_results = Some(skipped_player_results);
    append_question_history(room, history);
    append_result_event(
        room,
        &format!("Ведущий {host_name} пропустил вопрос №{question_number}."),
        "question-skip",
        json!({"questionNumber": question_number, "mode": room.game_mode}),
    );

    room.chat.clear();
    room.question_ends_at = None;
    room.active_answer = None;
    room.answer_submissions.clear();
    reset_skip_request(room);

    if room.game_mode == GameMode::Ffa {
        room.last_reveal = None;
        room.reveal_ends_at = None;
        if room.is_last_question() {
            phases::enter_results(server, room).await;
            return;
        }
        room.current_question_index += 1;
        phases::start_question_phase(server, room).await;
        return;
    }

    let skip_reveal_time_ms = server.config().game.skip_reveal_time_ms;
    room.phase = Phase::Reveal;
    room.reveal_ends_at = Some(now_ms() + skip_reveal_time_ms);
    room.last_reveal = Some(RevealRecord {
        mode: room.game_mode,
        correct_index: question.correct_index as i64,
        selected_index: None,
        answered_by: None,
        answered_by_name: None,
        team: Some(room.active_team),
        is_correct: false,
        base_points: 0,
        speed_bonus: 0,
        time_remaining_ms: remaining_ms,
        points_awarded: 0,
        skipped_by_host: true,
        skipped_by_name: Some(host_name),
        participants_count: None,
        player_results: None,
        chaos_team_results: None,
    });

    server.schedule_timer(
        room,
        TimerKey::Reveal,
        skip_reveal_time_ms,
        TimerAction::AdvanceAfterReveal,
    );
    server.broadcast_and_persist(room).await;
}
