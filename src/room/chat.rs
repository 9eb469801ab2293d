//! Chat log, visibility rules, and the skip-request system message.

use crate::protocol::types::{GameMode, Phase, SkipRequestStatus, Team};
use crate::room::state::{
    ChatKind, ChatMessage, ChatVisibility, PlayerConnection, RoomState, CHAT_LOG_CAP,
};
use crate::room::{now_ms, random_id};

/// Whether `viewer` may see `message` given the room's mode and phase.
///
/// Order matters: system presence/skip-request messages are public, `host`
/// visibility covers host and spectators, the ffa question gate hides the
/// room chat from players who have not answered yet, and manual pause opens
/// everything up so participants can coordinate.
pub fn can_player_see_message(
    viewer: &PlayerConnection,
    room: &RoomState,
    message: &ChatMessage,
) -> bool {
    let visibility = message.visibility;
    if message.kind == Some(ChatKind::Presence) && visibility == ChatVisibility::All {
        return true;
    }
    if message.kind == Some(ChatKind::SkipRequest) && visibility == ChatVisibility::All {
        return true;
    }
    if visibility == ChatVisibility::Host {
        return viewer.is_host || viewer.is_spectator;
    }

    if room.game_mode == GameMode::Ffa && room.phase == Phase::Question {
        if viewer.is_host || viewer.is_spectator {
            return true;
        }
        return room.answer_submissions.contains_key(&viewer.peer_id);
    }

    if room.phase == Phase::ManualPause {
        return true;
    }

    if viewer.is_host || viewer.is_spectator {
        return true;
    }

    if room.game_mode == GameMode::Ffa {
        return true;
    }
    if room.game_mode == GameMode::Chaos {
        return visibility == ChatVisibility::All || visibility == team_visibility(viewer.team);
    }

    if room.phase == Phase::Question {
        if viewer.team != Some(room.active_team) {
            return false;
        }
        return visibility == ChatVisibility::All
            || visibility == ChatVisibility::Team(room.active_team);
    }

    if visibility == ChatVisibility::All {
        return true;
    }
    visibility == team_visibility(viewer.team)
}

fn team_visibility(team: Option<Team>) -> ChatVisibility {
    match team {
        Some(team) => ChatVisibility::Team(team),
        // No team never matches a team-scoped message.
        None => ChatVisibility::Host,
    }
}

/// Append with FIFO eviction at the cap.
pub fn push_chat_bounded(room: &mut RoomState, message: ChatMessage) {
    room.chat.push(message);
    if room.chat.len() > CHAT_LOG_CAP {
        let excess = room.chat.len() - CHAT_LOG_CAP;
        room.chat.drain(..excess);
        if let Some(pinned) = &room.skip_request_message_id {
            if !room.chat.iter().any(|message| &message.id == pinned) {
                room.skip_request_message_id = None;
            }
        }
    }
}

/// Append a system chat message; returns its id.
pub fn append_system_chat_message(room: &mut RoomState, text: &str, kind: ChatKind) -> String {
    let id = random_id();
    push_chat_bounded(
        room,
        ChatMessage {
            id: id.clone(),
            from: "system".to_string(),
            name: "Система".to_string(),
            text: text.to_string(),
            timestamp: now_ms(),
            visibility: ChatVisibility::All,
            kind: Some(kind),
        },
    );
    id
}

/// Names of current skip requesters, in player-id order.
pub fn skip_requester_names(room: &RoomState) -> Vec<String> {
    room.active_non_host_players()
        .into_iter()
        .filter(|player| room.skip_requesters.contains(&player.peer_id))
        .map(|player| player.name.clone())
        .collect()
}

/// Create or update the pinned system message describing the skip request.
///
/// Outside the question phase the request state is cleared entirely. When
/// nothing is left to show, the pinned message is removed.
pub fn upsert_skip_request_message(room: &mut RoomState) {
    if room.phase != Phase::Question {
        room.skip_requesters.clear();
        room.skip_request_status = SkipRequestStatus::Idle;
        room.skip_request_message_id = None;
        return;
    }

    let requesters = skip_requester_names(room);
    if room.skip_request_status == SkipRequestStatus::Pending && requesters.is_empty() {
        room.skip_request_status = SkipRequestStatus::Idle;
    }

    let text = match room.skip_request_status {
        SkipRequestStatus::Rejected => "Запрос на пропуск вопроса отклонён.".to_string(),
        SkipRequestStatus::Pending => match requesters.len() {
            0 => String::new(),
            1 => format!("Участник {} попросил пропустить вопрос.", requesters[0]),
            _ => format!(
                "Участники {} попросили пропустить вопрос.",
                requesters.join(", ")
            ),
        },
        SkipRequestStatus::Idle => String::new(),
    };

    if text.is_empty() {
        if let Some(pinned) = room.skip_request_message_id.take() {
            room.chat.retain(|message| message.id != pinned);
        }
        return;
    }

    let now = now_ms();
    if let Some(pinned) = room.skip_request_message_id.clone() {
        if let Some(message) = room.chat.iter_mut().find(|message| message.id == pinned) {
            message.text = text;
            message.timestamp = now;
            message.visibility = ChatVisibility::All;
            message.kind = Some(ChatKind::SkipRequest);
            return;
        }
    }

    let id = random_id();
    room.skip_request_message_id = Some(id.clone());
    push_chat_bounded(
        room,
        ChatMessage {
            id,
            from: "system".to_string(),
            name: "Система".to_string(),
            text,
            timestamp: now,
            visibility: ChatVisibility::All,
            kind: Some(ChatKind::SkipRequest),
        },
    );
}

/// Drop the skip-request state entirely (question transitions).
pub fn reset_skip_request(room: &mut RoomState) {
    room.skip_requesters.clear();
    room.skip_request_status = SkipRequestStatus::Idle;
    room.skip_request_message_id = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::state::AnswerSubmission;
    use crate::room::test_support::{add_host, add_player, blank_room, make_player};

    fn player_message(visibility: ChatVisibility) -> ChatMessage {
        ChatMessage {
            id: random_id(),
            from: "someone".to_string(),
            name: "Игрок".to_string(),
            text: "привет".to_string(),
            timestamp: 0,
            visibility,
            kind: None,
        }
    }

    #[test]
    fn classic_question_phase_hides_other_team_chat() {
        let mut room = blank_room(GameMode::Classic);
        room.phase = Phase::Question;
        room.active_team = Team::A;

        let team_a_viewer = make_player("a", Some(Team::A));
        let team_b_viewer = make_player("b", Some(Team::B));
        let message = player_message(ChatVisibility::Team(Team::A));

        assert!(can_player_see_message(&team_a_viewer, &room, &message));
        assert!(!can_player_see_message(&team_b_viewer, &room, &message));
    }

    #[test]
    fn host_and_spectators_see_everything() {
        let mut room = blank_room(GameMode::Classic);
        room.phase = Phase::Question;
        room.active_team = Team::A;

        let mut host = make_player("h", None);
        host.is_host = true;
        let mut spectator = make_player("s", None);
        spectator.is_spectator = true;
        let message = player_message(ChatVisibility::Team(Team::B));

        assert!(can_player_see_message(&host, &room, &message));
        assert!(can_player_see_message(&spectator, &room, &message));
    }

    #[test]
    fn host_visibility_excludes_players() {
        let room = blank_room(GameMode::Classic);
        let player = make_player("p", Some(Team::A));
        let mut host = make_player("h", None);
        host.is_host = true;
        let message = player_message(ChatVisibility::Host);

        assert!(!can_player_see_message(&player, &room, &message));
        assert!(can_player_see_message(&host, &room, &message));
    }

    #[test]
    fn ffa_question_chat_gated_on_submission() {
        let mut room = blank_room(GameMode::Ffa);
        room.phase = Phase::Question;
        let answered = make_player("done", None);
        let pending = make_player("pending", None);
        room.answer_submissions.insert(
            answered.peer_id,
            AnswerSubmission {
                selected_index: 0,
                by_peer_id: answered.peer_id,
                by_name: answered.name.clone(),
                answered_at: 0,
            },
        );
        let message = player_message(ChatVisibility::All);

        assert!(can_player_see_message(&answered, &room, &message));
        assert!(!can_player_see_message(&pending, &room, &message));
    }

    #[test]
    fn manual_pause_opens_chat_to_everyone() {
        let mut room = blank_room(GameMode::Classic);
        room.phase = Phase::ManualPause;
        let viewer = make_player("p", Some(Team::B));
        let message = player_message(ChatVisibility::Team(Team::A));
        assert!(can_player_see_message(&viewer, &room, &message));
    }

    #[test]
    fn chaos_team_chat_scoped_to_team() {
        let mut room = blank_room(GameMode::Chaos);
        room.phase = Phase::Question;
        let team_a = make_player("a", Some(Team::A));
        let team_b = make_player("b", Some(Team::B));
        let message = player_message(ChatVisibility::Team(Team::A));
        assert!(can_player_see_message(&team_a, &room, &message));
        assert!(!can_player_see_message(&team_b, &room, &message));
        let broadcast = player_message(ChatVisibility::All);
        assert!(can_player_see_message(&team_b, &room, &broadcast));
    }

    #[test]
    fn chat_log_is_bounded() {
        let mut room = blank_room(GameMode::Classic);
        for index in 0..CHAT_LOG_CAP + 15 {
            append_system_chat_message(&mut room, &format!("сообщение {index}"), ChatKind::System);
        }
        assert_eq!(room.chat.len(), CHAT_LOG_CAP);
        assert!(room.chat[0].text.ends_with("15"));
    }

    #[test]
    fn skip_request_message_upserts_in_place() {
        let mut room = blank_room(GameMode::Classic);
        add_host(&mut room, "Ведущий");
        let requester = add_player(&mut room, "Алиса", Some(Team::A));
        room.phase = Phase::Question;
        room.skip_requesters.insert(requester);
        room.skip_request_status = SkipRequestStatus::Pending;

        upsert_skip_request_message(&mut room);
        let pinned = room.skip_request_message_id.clone().unwrap();
        assert_eq!(room.chat.len(), 1);
        assert!(room.chat[0].text.contains("Алиса"));

        let second = add_player(&mut room, "Борис", Some(Team::B));
        room.skip_requesters.insert(second);
        upsert_skip_request_message(&mut room);
        assert_eq!(room.chat.len(), 1);
        assert_eq!(room.skip_request_message_id.as_deref(), Some(pinned.as_str()));
        assert!(room.chat[0].text.contains("Борис"));
    }

    #[test]
    fn skip_request_state_clears_outside_question() {
        let mut room = blank_room(GameMode::Classic);
        let requester = add_player(&mut room, "Алиса", Some(Team::A));
        room.phase = Phase::Reveal;
        room.skip_requesters.insert(requester);
        room.skip_request_status = SkipRequestStatus::Pending;
        upsert_skip_request_message(&mut room);
        assert!(room.skip_requesters.is_empty());
        assert_eq!(room.skip_request_status, SkipRequestStatus::Idle);
    }
}
