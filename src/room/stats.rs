//! Per-player cumulative stats, bounded histories, and end-of-game results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::types::{GameMode, PeerId, QuestionDifficulty, Team};
use crate::room::state::{PerTeam, PlayerConnection, RoomState};
use crate::room::{now_ms, random_id};
use crate::storage::GameResultRecord;

/// Base points for any correct answer before the speed bonus.
pub const BASE_CORRECT_POINTS: i64 = 1;

/// Speed bonus from the remaining/total ratio: ≥0.67 → +2, ≥0.34 → +1, else 0.
pub fn calculate_speed_bonus(remaining_ms: u64, question_time_ms: u64) -> i64 {
    let total = question_time_ms.max(1);
    let ratio = remaining_ms.min(total) as f64 / total as f64;
    if ratio >= 0.67 {
        2
    } else if ratio >= 0.34 {
        1
    } else {
        0
    }
}

/// Answer outcome recorded per participant in reveal and history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcomeStatus {
    Answered,
    Timeout,
    Invalid,
    SkippedByHost,
}

/// One participant's outcome for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerQuestionResult {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Option<Team>,
    pub selected_index: Option<i64>,
    pub is_correct: bool,
    pub base_points: i64,
    pub speed_bonus: i64,
    pub time_remaining_ms: u64,
    pub points_awarded: i64,
    /// Running total after this question (ffa only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i64>,
    pub status: AnswerOutcomeStatus,
}

/// One team's plurality outcome for a chaos question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosTeamResult {
    pub team: Team,
    pub selected_index: Option<i64>,
    pub is_correct: bool,
    pub base_points: i64,
    pub speed_bonus: i64,
    pub time_remaining_ms: u64,
    pub points_awarded: i64,
    /// option index (as string) → vote count
    pub vote_counts: HashMap<String, u32>,
    pub tie_resolved_randomly: bool,
    pub participants_count: usize,
    pub answered_count: usize,
}

/// The reveal shown after a question closes. Shape varies by mode; absent
/// fields stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRecord {
    pub mode: GameMode,
    pub correct_index: i64,
    pub selected_index: Option<i64>,
    pub answered_by: Option<PeerId>,
    pub answered_by_name: Option<String>,
    pub team: Option<Team>,
    pub is_correct: bool,
    pub base_points: i64,
    pub speed_bonus: i64,
    pub time_remaining_ms: u64,
    pub points_awarded: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped_by_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_results: Option<Vec<PlayerQuestionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_team_results: Option<PerTeam<ChaosTeamResult>>,
}

/// One closed question in the bounded question history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistoryEntry {
    pub id: String,
    pub timestamp: u64,
    pub mode: GameMode,
    pub question_number: i64,
    pub difficulty: QuestionDifficulty,
    pub correct_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_by: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_bonus: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AnswerOutcomeStatus>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped_by_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_results: Option<Vec<PlayerQuestionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_team_results: Option<PerTeam<ChaosTeamResult>>,
}

impl QuestionHistoryEntry {
    /// Entry with only the always-present fields filled in.
    pub fn base(mode: GameMode, question_number: i64, difficulty: QuestionDifficulty, correct_index: i64) -> Self {
        Self {
            id: random_id(),
            timestamp: now_ms(),
            mode,
            question_number,
            difficulty,
            correct_index,
            team: None,
            selected_index: None,
            answered_by: None,
            answered_by_name: None,
            is_correct: None,
            base_points: None,
            speed_bonus: None,
            time_remaining_ms: None,
            points_awarded: None,
            status: None,
            skipped_by_host: false,
            skipped_by_name: None,
            player_results: None,
            chaos_team_results: None,
        }
    }
}

/// One entry of the bounded game event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHistoryEntry {
    pub id: String,
    pub timestamp: u64,
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub payload: Value,
}

/// Cumulative per-peer stats for the current game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStat {
    pub peer_id: PeerId,
    pub account_user_id: Option<i64>,
    pub name: String,
    pub team: Option<Team>,
    pub answers: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub skipped_answers: u32,
    pub points: i64,
    pub total_response_ms: u64,
    pub fastest_response_ms: Option<u64>,
    pub last_answered_at: Option<u64>,
}

/// Identity slice of a participant captured before stats mutation.
#[derive(Debug, Clone)]
pub struct ParticipantRef {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Option<Team>,
    pub auth_user_id: Option<i64>,
}

impl From<&PlayerConnection> for ParticipantRef {
    fn from(player: &PlayerConnection) -> Self {
        Self {
            peer_id: player.peer_id,
            name: player.name.clone(),
            team: player.team,
            auth_user_id: player.auth_user_id,
        }
    }
}

/// Get or create the stat entry for a participant, refreshing its metadata.
pub fn ensure_stat_entry<'a>(
    stats: &'a mut HashMap<PeerId, PlayerStat>,
    participant: &ParticipantRef,
) -> &'a mut PlayerStat {
    let stat = stats
        .entry(participant.peer_id)
        .or_insert_with(|| PlayerStat {
            peer_id: participant.peer_id,
            account_user_id: participant.auth_user_id,
            name: participant.name.clone(),
            team: participant.team,
            answers: 0,
            correct_answers: 0,
            wrong_answers: 0,
            skipped_answers: 0,
            points: 0,
            total_response_ms: 0,
            fastest_response_ms: None,
            last_answered_at: None,
        });
    stat.name = participant.name.clone();
    stat.team = participant.team;
    stat.account_user_id = participant.auth_user_id;
    stat
}

/// Record one answered question on a participant's cumulative stats.
pub fn record_answer_stat(
    stats: &mut HashMap<PeerId, PlayerStat>,
    participant: &ParticipantRef,
    is_correct: bool,
    points_awarded: i64,
    remaining_ms: u64,
    answered_at: Option<u64>,
    question_time_ms: u64,
) {
    let stat = ensure_stat_entry(stats, participant);
    stat.answers += 1;
    if is_correct {
        stat.correct_answers += 1;
    } else {
        stat.wrong_answers += 1;
    }
    if points_awarded > 0 {
        stat.points += points_awarded;
    }

    let response_ms = question_time_ms.saturating_sub(remaining_ms);
    stat.total_response_ms += response_ms;
    stat.fastest_response_ms = Some(match stat.fastest_response_ms {
        Some(fastest) => fastest.min(response_ms),
        None => response_ms,
    });
    stat.last_answered_at = Some(answered_at.unwrap_or_else(now_ms));
}

/// Record a missed question (no submission before the deadline).
pub fn record_skip_stat(stats: &mut HashMap<PeerId, PlayerStat>, participant: &ParticipantRef) {
    let stat = ensure_stat_entry(stats, participant);
    stat.skipped_answers += 1;
}

/// Append to the bounded event log.
pub fn append_result_event(room: &mut RoomState, text: &str, kind: &str, payload: Value) {
    room.event_history.push(EventHistoryEntry {
        id: random_id(),
        timestamp: now_ms(),
        kind: kind.to_string(),
        text: text.chars().take(280).collect(),
        payload,
    });
    let cap = crate::room::state::EVENT_HISTORY_CAP;
    if room.event_history.len() > cap {
        let excess = room.event_history.len() - cap;
        room.event_history.drain(..excess);
    }
}

/// Append to the bounded question history.
pub fn append_question_history(room: &mut RoomState, entry: QuestionHistoryEntry) {
    room.question_history.push(entry);
    let cap = crate::room::state::QUESTION_HISTORY_CAP;
    if room.question_history.len() > cap {
        let excess = room.question_history.len() - cap;
        room.question_history.drain(..excess);
    }
}

/// Reset result tracking at game start, seeding entries for participants.
pub fn initialize_result_tracking(room: &mut RoomState) {
    room.player_stats.clear();
    room.question_history.clear();
    room.event_history.clear();
    let participants: Vec<ParticipantRef> = room
        .active_non_host_players()
        .into_iter()
        .map(ParticipantRef::from)
        .collect();
    for participant in &participants {
        ensure_stat_entry(&mut room.player_stats, participant);
    }
}

/// Refresh names/teams/account links on existing stat entries.
pub fn sync_player_stats_metadata(room: &mut RoomState) {
    let refs: Vec<ParticipantRef> = room.players.values().map(ParticipantRef::from).collect();
    for participant in refs {
        if let Some(stat) = room.player_stats.get_mut(&participant.peer_id) {
            stat.name = participant.name.clone();
            stat.team = participant.team;
            stat.account_user_id = participant.auth_user_id;
        }
    }
}

/// Per-player results row for the results screen and persisted result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatRow {
    pub peer_id: PeerId,
    pub account_user_id: Option<i64>,
    pub name: String,
    pub team: Option<Team>,
    pub answers: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub skipped_answers: u32,
    pub points: i64,
    pub total_response_ms: u64,
    pub avg_response_ms: Option<u64>,
    pub fastest_response_ms: Option<u64>,
    pub last_answered_at: Option<u64>,
}

/// Dense-ranked row (shared places on ties) for ffa results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub place: usize,
    pub peer_id: PeerId,
    pub name: String,
    pub points: i64,
    pub correct_answers: u32,
}

/// Full per-player rows, sorted for the active mode: ffa by points then
/// correct answers; team modes by correct answers then points.
pub fn build_result_players(room: &mut RoomState) -> Vec<PlayerStatRow> {
    sync_player_stats_metadata(room);

    let mut rows: Vec<PlayerStatRow> = room
        .player_stats
        .values()
        .map(|stat| {
            let mut points = stat.points;
            if room.game_mode == GameMode::Ffa {
                points = points.max(*room.player_scores.get(&stat.peer_id).unwrap_or(&0));
            }
            PlayerStatRow {
                peer_id: stat.peer_id,
                account_user_id: stat.account_user_id,
                name: stat.name.chars().take(24).collect(),
                team: stat.team,
                answers: stat.answers,
                correct_answers: stat.correct_answers,
                wrong_answers: stat.wrong_answers,
                skipped_answers: stat.skipped_answers,
                points,
                total_response_ms: stat.total_response_ms,
                avg_response_ms: (stat.answers > 0)
                    .then(|| stat.total_response_ms / u64::from(stat.answers)),
                fastest_response_ms: stat.fastest_response_ms,
                last_answered_at: stat.last_answered_at,
            }
        })
        .collect();

    if room.game_mode == GameMode::Ffa {
        rows.sort_by(|left, right| {
            right
                .points
                .cmp(&left.points)
                .then(right.correct_answers.cmp(&left.correct_answers))
                .then(left.name.cmp(&right.name))
        });
    } else {
        rows.sort_by(|left, right| {
            right
                .correct_answers
                .cmp(&left.correct_answers)
                .then(right.points.cmp(&left.points))
                .then(left.name.cmp(&right.name))
        });
    }
    rows
}

/// Dense ranking over already-sorted ffa rows; tied rows share a place.
pub fn build_ffa_ranking(rows: &[PlayerStatRow]) -> Vec<RankingRow> {
    let mut ranking = Vec::with_capacity(rows.len());
    let mut place = 0usize;
    let mut previous: Option<(i64, u32)> = None;
    for (index, row) in rows.iter().enumerate() {
        let key = (row.points, row.correct_answers);
        if previous != Some(key) {
            place = index + 1;
            previous = Some(key);
        }
        ranking.push(RankingRow {
            place,
            peer_id: row.peer_id,
            name: row.name.clone(),
            points: row.points,
            correct_answers: row.correct_answers,
        });
    }
    ranking
}

/// Stats rows for the classic captains, keyed by team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptainStatRow {
    pub peer_id: PeerId,
    pub name: String,
    pub team: Team,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub points: i64,
}

pub fn build_captain_contribution(
    room: &RoomState,
    rows: &[PlayerStatRow],
) -> PerTeam<Option<CaptainStatRow>> {
    let mut contribution: PerTeam<Option<CaptainStatRow>> = PerTeam::default();
    for team in Team::ALL {
        let Some(captain_id) = *room.captains.get(team) else {
            continue;
        };
        let stat = rows.iter().find(|row| row.peer_id == captain_id);
        contribution.set(
            team,
            Some(CaptainStatRow {
                peer_id: captain_id,
                name: stat
                    .map(|row| row.name.clone())
                    .or_else(|| room.players.get(&captain_id).map(|p| p.name.clone()))
                    .unwrap_or_else(|| "Игрок".to_string()),
                team,
                correct_answers: stat.map(|row| row.correct_answers).unwrap_or(0),
                wrong_answers: stat.map(|row| row.wrong_answers).unwrap_or(0),
                points: stat.map(|row| row.points).unwrap_or(0),
            }),
        );
    }
    contribution
}

/// The durable record appended when a game reaches results.
pub fn build_game_result_payload(
    room: &RoomState,
    result_players: &[PlayerStatRow],
) -> GameResultRecord {
    let history_tail = |entries: &[QuestionHistoryEntry]| -> Value {
        let tail: Vec<&QuestionHistoryEntry> =
            entries.iter().rev().take(120).rev().collect();
        serde_json::to_value(tail).unwrap_or(Value::Array(Vec::new()))
    };
    let events_tail: Vec<&EventHistoryEntry> =
        room.event_history.iter().rev().take(180).rev().collect();
    let events_json = serde_json::to_value(&events_tail).unwrap_or(Value::Array(Vec::new()));

    if room.game_mode == GameMode::Ffa {
        let mut sorted_scores: Vec<(PeerId, i64)> = room
            .player_scores
            .iter()
            .map(|(peer_id, score)| (*peer_id, *score))
            .collect();
        sorted_scores.sort_by(|left, right| right.1.cmp(&left.1));
        let name_for = |peer_id: PeerId, fallback: &str| {
            room.players
                .get(&peer_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        let (leader_id, leader_score) = sorted_scores.first().copied().unwrap_or_default();
        let (runner_id, runner_score) = sorted_scores.get(1).copied().unwrap_or_default();
        let ranking = build_ffa_ranking(result_players);

        return GameResultRecord {
            room_id: room.room_id.clone(),
            team_a_name: format!("Лидер: {}", name_for(leader_id, "Игрок 1"))
                .chars()
                .take(32)
                .collect(),
            team_b_name: format!("2 место: {}", name_for(runner_id, "Игрок 2"))
                .chars()
                .take(32)
                .collect(),
            score_a: leader_score,
            score_b: runner_score,
            winner_team: (leader_score > runner_score).then(|| "A".to_string()),
            payload_json: serde_json::json!({
                "gameMode": "ffa",
                "playerScores": room.player_scores,
                "playerStats": result_players,
                "ranking": ranking,
                "questionHistory": history_tail(&room.question_history),
                "eventHistory": events_json,
                "leaderPeerId": leader_id,
                "finishedAt": now_ms(),
            }),
        };
    }

    let winner_team = if room.scores.a > room.scores.b {
        Some(Team::A)
    } else if room.scores.b > room.scores.a {
        Some(Team::B)
    } else {
        None
    };
    let captain_contribution = (room.game_mode == GameMode::Classic)
        .then(|| build_captain_contribution(room, result_players));

    GameResultRecord {
        room_id: room.room_id.clone(),
        team_a_name: room.team_names.a.clone(),
        team_b_name: room.team_names.b.clone(),
        score_a: room.scores.a,
        score_b: room.scores.b,
        winner_team: winner_team.map(|team| team.as_str().to_string()),
        payload_json: serde_json::json!({
            "gameMode": room.game_mode,
            "scores": room.scores,
            "teamNames": room.team_names,
            "playerStats": result_players,
            "captainContribution": captain_contribution,
            "questionHistory": history_tail(&room.question_history),
            "eventHistory": events_json,
            "winnerTeam": winner_team,
            "finishedAt": now_ms(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_bonus_thresholds() {
        let total = 30_000;
        assert_eq!(calculate_speed_bonus(30_000, total), 2);
        assert_eq!(calculate_speed_bonus(20_100, total), 2); // 0.67
        assert_eq!(calculate_speed_bonus(20_000, total), 1);
        assert_eq!(calculate_speed_bonus(10_200, total), 1); // 0.34
        assert_eq!(calculate_speed_bonus(10_199, total), 0);
        assert_eq!(calculate_speed_bonus(0, total), 0);
    }

    #[test]
    fn answer_stat_tracks_fastest_and_average_inputs() {
        let mut stats = HashMap::new();
        let participant = ParticipantRef {
            peer_id: uuid::Uuid::new_v4(),
            name: "Алиса".to_string(),
            team: Some(Team::A),
            auth_user_id: None,
        };
        record_answer_stat(&mut stats, &participant, true, 3, 28_000, Some(1), 30_000);
        record_answer_stat(&mut stats, &participant, false, 0, 5_000, Some(2), 30_000);

        let stat = &stats[&participant.peer_id];
        assert_eq!(stat.answers, 2);
        assert_eq!(stat.correct_answers, 1);
        assert_eq!(stat.wrong_answers, 1);
        assert_eq!(stat.points, 3);
        assert_eq!(stat.total_response_ms, 2_000 + 25_000);
        assert_eq!(stat.fastest_response_ms, Some(2_000));
        assert_eq!(stat.last_answered_at, Some(2));
    }

    #[test]
    fn ffa_ranking_shares_places_on_ties() {
        let row = |name: &str, points: i64, correct: u32| PlayerStatRow {
            peer_id: uuid::Uuid::new_v4(),
            account_user_id: None,
            name: name.to_string(),
            team: None,
            answers: 0,
            correct_answers: correct,
            wrong_answers: 0,
            skipped_answers: 0,
            points,
            total_response_ms: 0,
            avg_response_ms: None,
            fastest_response_ms: None,
            last_answered_at: None,
        };
        let rows = vec![
            row("a", 9, 3),
            row("b", 9, 3),
            row("c", 5, 2),
        ];
        let ranking = build_ffa_ranking(&rows);
        assert_eq!(
            ranking.iter().map(|r| r.place).collect::<Vec<_>>(),
            vec![1, 1, 3]
        );
    }

    #[test]
    fn histories_are_bounded_fifo() {
        let mut room = crate::room::test_support::classic_room(0);
        for index in 0..EVENT_CAP_PLUS {
            append_result_event(&mut room, &format!("событие {index}"), "system", Value::Null);
        }
        assert_eq!(room.event_history.len(), crate::room::state::EVENT_HISTORY_CAP);
        assert!(room.event_history[0].text.ends_with(&format!(
            "{}",
            EVENT_CAP_PLUS - crate::room::state::EVENT_HISTORY_CAP
        )));
    }

    const EVENT_CAP_PLUS: usize = crate::room::state::EVENT_HISTORY_CAP + 20;
}
