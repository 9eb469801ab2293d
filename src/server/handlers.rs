//! Per-frame message handling. Every handler starts with phase/role guards;
//! a failed guard is a silent no-op so a misbehaving client cannot
//! destabilize the room.

use std::sync::Arc;
use uuid::Uuid;

use super::gateway::AdmittedSeat;
use super::QuizServer;
use crate::protocol::messages::{ClientFrame, ModerationNoticeLevel, ServerFrame, SkipDecision};
use crate::protocol::types::{GameMode, PeerId, Phase, SkipRequestStatus};
use crate::protocol::validation::{normalize_team_name, sanitize_chat_text, sanitize_team_name};
use crate::room::chat::{
    append_system_chat_message, push_chat_bounded, upsert_skip_request_message,
};
use crate::room::state::{
    AnswerSubmission, ChatKind, ChatMessage, ChatVisibility, RoomState, STRIKES_TO_DISQUALIFY,
};
use crate::room::{now_ms, pause, phases, questions, random_id, vote};

impl QuizServer {
    /// Entry point for every post-join frame of one connection.
    pub async fn handle_client_frame(self: &Arc<Self>, seat: &AdmittedSeat, frame: ClientFrame) {
        self.metrics.increment(&self.metrics.frames_received);
        let mut room = seat.room.state.lock().await;

        let Some(player) = room.players.get(&seat.peer_id) else {
            return;
        };
        // Frames racing a handoff belong to the superseded socket.
        if player.socket_id != seat.socket_id {
            self.metrics.increment(&self.metrics.frames_rejected);
            return;
        }

        self.dispatch_frame(&mut room, seat.peer_id, frame).await;
    }

    async fn dispatch_frame(self: &Arc<Self>, room: &mut RoomState, peer_id: PeerId, frame: ClientFrame) {
        match frame {
            ClientFrame::Join { .. } => {
                // A second join on an established connection is ignored.
                self.metrics.increment(&self.metrics.frames_rejected);
            }
            ClientFrame::Ping => {
                self.metrics.increment(&self.metrics.pings_received);
                if let Some(player) = room.players.get(&peer_id) {
                    self.send_frame(
                        player,
                        ServerFrame::Pong {
                            server_time: now_ms(),
                        },
                    );
                }
            }
            ClientFrame::RefreshProfileAssets => {
                self.refresh_profile_assets(room, peer_id).await;
            }
            ClientFrame::TogglePause => {
                let Some(player) = room.players.get(&peer_id) else {
                    return;
                };
                if !player.is_host || room.phase == Phase::HostReconnect {
                    return;
                }
                let host_name = player.name.clone();
                if room.phase == Phase::ManualPause {
                    pause::resume_game_by_host(self, room).await;
                } else {
                    pause::pause_game_by_host(self, room, &host_name).await;
                }
            }
            ClientFrame::StartGame => {
                let is_host = room
                    .players
                    .get(&peer_id)
                    .is_some_and(|player| player.is_host);
                if !is_host || room.phase != Phase::Lobby {
                    return;
                }
                phases::start_game(self, room).await;
            }
            ClientFrame::VoteCaptain { candidate_peer_id } => {
                self.handle_vote_captain(room, peer_id, candidate_peer_id)
                    .await;
            }
            ClientFrame::SetTeamName { name } => {
                self.handle_team_name(room, peer_id, Some(name)).await;
            }
            ClientFrame::RandomTeamName => {
                self.handle_team_name(room, peer_id, None).await;
            }
            ClientFrame::SubmitAnswer { answer_index } => {
                self.handle_submit_answer(room, peer_id, answer_index).await;
            }
            ClientFrame::SkipQuestion => {
                let is_host = room
                    .players
                    .get(&peer_id)
                    .is_some_and(|player| player.is_host);
                if !is_host || room.phase != Phase::Question {
                    return;
                }
                questions::skip_question_by_host(self, room, peer_id).await;
            }
            ClientFrame::RequestSkipQuestion => {
                self.handle_request_skip(room, peer_id).await;
            }
            ClientFrame::ResolveSkipRequest { decision } => {
                self.handle_resolve_skip(room, peer_id, decision).await;
            }
            ClientFrame::NewGame => {
                let is_host = room
                    .players
                    .get(&peer_id)
                    .is_some_and(|player| player.is_host);
                if !is_host {
                    return;
                }
                phases::reset_game(self, room, None).await;
            }
            ClientFrame::ModerateChatMessage { message_id } => {
                self.handle_moderate_chat(room, peer_id, &message_id).await;
            }
            ClientFrame::SendChat { text } => {
                self.handle_send_chat(room, peer_id, &text).await;
            }
        }
    }

    async fn refresh_profile_assets(self: &Arc<Self>, room: &mut RoomState, peer_id: PeerId) {
        let Some(user_id) = room
            .players
            .get(&peer_id)
            .and_then(|player| player.auth_user_id)
        else {
            return;
        };
        // Asset refresh is non-critical: failures are logged and dropped.
        match self.identity_resolver().fetch_assets(user_id).await {
            Ok(Some(assets)) => {
                if let Some(player) = room.players.get_mut(&peer_id) {
                    player.assets = assets;
                }
                self.broadcast_and_persist(room).await;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, user_id, "Profile asset refresh failed");
            }
        }
    }

    async fn handle_vote_captain(
        self: &Arc<Self>,
        room: &mut RoomState,
        peer_id: PeerId,
        candidate_peer_id: PeerId,
    ) {
        if room.game_mode != GameMode::Classic || room.phase != Phase::CaptainVote {
            return;
        }
        let Some(voter) = room.players.get(&peer_id) else {
            return;
        };
        if voter.is_host || voter.is_spectator {
            return;
        }
        let Some(team) = voter.team else {
            return;
        };
        if *room.captain_vote_ready_teams.get(team) {
            return;
        }
        if candidate_peer_id == peer_id {
            return;
        }
        let candidate_ok = room
            .players
            .get(&candidate_peer_id)
            .is_some_and(|candidate| !candidate.is_host && candidate.team == Some(team));
        if !candidate_ok {
            return;
        }

        // Recasting moves the ballot: the previous candidate loses one vote.
        let previous = room.captain_ballots.get(team).get(&peer_id).copied();
        if let Some(previous_candidate) = previous {
            let votes = room.captain_votes.get_mut(team);
            if let Some(count) = votes.get_mut(&previous_candidate) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    votes.remove(&previous_candidate);
                }
            }
        }
        room.captain_ballots
            .get_mut(team)
            .insert(peer_id, candidate_peer_id);
        *room
            .captain_votes
            .get_mut(team)
            .entry(candidate_peer_id)
            .or_insert(0) += 1;

        vote::refresh_captain_vote_progress(room);
        phases::schedule_single_member_auto_captain(self, room);
        if room.captain_vote_ready_teams.all_ready() {
            phases::finalize_captain_vote(self, room).await;
            return;
        }
        self.broadcast_and_persist(room).await;
    }

    /// `Some(name)` sets a custom team name; `None` draws from the pool.
    async fn handle_team_name(
        self: &Arc<Self>,
        room: &mut RoomState,
        peer_id: PeerId,
        name: Option<String>,
    ) {
        if room.phase != Phase::TeamNaming {
            return;
        }
        let Some(player) = room.players.get(&peer_id) else {
            return;
        };
        let Some(team) = player.team else {
            return;
        };
        let can_set = if room.game_mode == GameMode::Classic {
            player.is_captain
        } else {
            !player.is_host
        };
        if !can_set || player.is_spectator {
            return;
        }
        if *room.team_naming_ready_teams.get(team) {
            return;
        }

        let fallback = team.default_name();
        let next_name = match name {
            Some(raw) => {
                let sanitized = sanitize_team_name(&raw, fallback);
                room.used_team_names.insert(normalize_team_name(&sanitized));
                sanitized
            }
            None => vote::get_random_unique_team_name(room, fallback),
        };
        room.team_names.set(team, next_name);
        room.team_naming_ready_teams.set(team, true);

        if room.team_naming_ready_teams.all_ready() {
            phases::finalize_team_naming(self, room).await;
            return;
        }
        self.broadcast_and_persist(room).await;
    }

    async fn handle_submit_answer(
        self: &Arc<Self>,
        room: &mut RoomState,
        peer_id: PeerId,
        answer_index: i64,
    ) {
        if room.phase != Phase::Question {
            return;
        }
        let Some(player) = room.players.get(&peer_id) else {
            return;
        };
        if player.is_spectator {
            return;
        }
        let player_name = player.name.clone();
        let player_team = player.team;
        let player_is_host = player.is_host;
        let player_is_captain = player.is_captain;

        if room.game_mode == GameMode::Classic {
            if player_team != Some(room.active_team) || !player_is_captain {
                return;
            }
            if room.active_answer.is_some() {
                return;
            }
            room.active_answer = Some(AnswerSubmission {
                selected_index: answer_index,
                by_peer_id: peer_id,
                by_name: player_name,
                answered_at: now_ms(),
            });
            questions::finalize_question(self, room).await;
            return;
        }

        match room.game_mode {
            GameMode::Chaos => {
                if player_is_host || player_team.is_none() {
                    return;
                }
            }
            GameMode::Ffa => {
                if player_is_host {
                    return;
                }
            }
            GameMode::Classic => unreachable!("classic handled above"),
        }

        if room.answer_submissions.contains_key(&peer_id) {
            return;
        }
        room.answer_submissions.insert(
            peer_id,
            AnswerSubmission {
                selected_index: answer_index,
                by_peer_id: peer_id,
                by_name: player_name,
                answered_at: now_ms(),
            },
        );

        let eligible = room.answer_eligible_players().len();
        if eligible > 0 && room.answer_submissions.len() >= eligible {
            questions::finalize_question(self, room).await;
        } else {
            self.broadcast_and_persist(room).await;
        }
    }

    async fn handle_request_skip(self: &Arc<Self>, room: &mut RoomState, peer_id: PeerId) {
        if room.phase != Phase::Question {
            return;
        }
        let Some(player) = room.players.get(&peer_id) else {
            return;
        };
        if player.is_host || player.is_spectator {
            return;
        }
        // A rejection latches for the rest of the question.
        if room.skip_request_status == SkipRequestStatus::Rejected {
            return;
        }
        if !room.skip_requesters.insert(peer_id) {
            return;
        }
        room.skip_request_status = SkipRequestStatus::Pending;
        upsert_skip_request_message(room);
        self.broadcast_and_persist(room).await;
    }

    async fn handle_resolve_skip(
        self: &Arc<Self>,
        room: &mut RoomState,
        peer_id: PeerId,
        decision: SkipDecision,
    ) {
        if room.phase != Phase::Question {
            return;
        }
        let is_host = room
            .players
            .get(&peer_id)
            .is_some_and(|player| player.is_host);
        if !is_host {
            return;
        }

        match decision {
            SkipDecision::Approve => {
                if room.skip_request_status != SkipRequestStatus::Pending
                    || room.skip_requesters.is_empty()
                {
                    return;
                }
                questions::skip_question_by_host(self, room, peer_id).await;
            }
            SkipDecision::Reject => {
                if room.skip_request_status != SkipRequestStatus::Pending {
                    return;
                }
                room.skip_request_status = SkipRequestStatus::Rejected;
                upsert_skip_request_message(room);
                self.broadcast_and_persist(room).await;
            }
        }
    }

    async fn handle_send_chat(self: &Arc<Self>, room: &mut RoomState, peer_id: PeerId, text: &str) {
        let Some(player) = room.players.get(&peer_id) else {
            return;
        };
        if player.is_spectator {
            return;
        }
        let text = sanitize_chat_text(text);
        if text.is_empty() {
            return;
        }

        if room.phase == Phase::Question {
            match room.game_mode {
                GameMode::Ffa => {
                    if !player.is_host && !room.answer_submissions.contains_key(&peer_id) {
                        return;
                    }
                }
                GameMode::Chaos => {
                    if player.is_host || player.team.is_none() {
                        return;
                    }
                }
                GameMode::Classic => {
                    if player.is_host || player.team != Some(room.active_team) {
                        return;
                    }
                }
            }
        }

        // Question-phase chat is team talk in the team modes: classic scopes
        // it to the answering team, chaos to the sender's own team.
        let visibility = if room.phase != Phase::Question {
            ChatVisibility::All
        } else {
            match room.game_mode {
                GameMode::Classic => ChatVisibility::Team(room.active_team),
                GameMode::Chaos => match player.team {
                    Some(team) => ChatVisibility::Team(team),
                    None => ChatVisibility::All,
                },
                GameMode::Ffa => ChatVisibility::All,
            }
        };
        let message = ChatMessage {
            id: random_id(),
            from: peer_id.to_string(),
            name: player.name.clone(),
            text,
            timestamp: now_ms(),
            visibility,
            kind: None,
        };
        push_chat_bounded(room, message);
        self.metrics.increment(&self.metrics.chat_messages);
        self.broadcast_and_persist(room).await;
    }

    async fn handle_moderate_chat(
        self: &Arc<Self>,
        room: &mut RoomState,
        peer_id: PeerId,
        message_id: &str,
    ) {
        let is_host = room
            .players
            .get(&peer_id)
            .is_some_and(|player| player.is_host);
        if !is_host || room.phase == Phase::Lobby {
            return;
        }

        let Some(position) = room.chat.iter().position(|message| message.id == message_id)
        else {
            return;
        };
        // System and skip-request messages are not moderatable.
        if room.chat[position].from == "system" || room.chat[position].kind.is_some() {
            return;
        }
        let removed = room.chat.remove(position);
        self.metrics.increment(&self.metrics.moderation_deletions);

        let Some(sender_id) = Uuid::parse_str(&removed.from).ok() else {
            self.broadcast_and_persist(room).await;
            return;
        };

        let strikes = {
            let entry = room.chat_moderation_strikes.entry(sender_id).or_insert(0);
            *entry += 1;
            *entry
        };

        let sender_present = room.players.contains_key(&sender_id);
        let should_disqualify = sender_present
            && strikes >= STRIKES_TO_DISQUALIFY
            && room
                .players
                .get(&sender_id)
                .is_some_and(|player| !player.is_spectator);

        if should_disqualify {
            self.disqualify_player(room, sender_id, strikes).await;
            return;
        }

        if sender_present {
            if let Some(sender) = room.players.get(&sender_id) {
                self.send_frame(
                    sender,
                    ServerFrame::ModerationNotice {
                        message: "Сообщение удалено ведущим.".to_string(),
                        level: ModerationNoticeLevel::Warning,
                        strikes,
                        disqualified: false,
                    },
                );
            }
        }
        self.broadcast_and_persist(room).await;
    }

    /// Third strike: the offender becomes a spectator and loses every active
    /// role in the current question.
    async fn disqualify_player(
        self: &Arc<Self>,
        room: &mut RoomState,
        sender_id: PeerId,
        strikes: u32,
    ) {
        let (sender_name, sender_team, was_captain) = {
            let Some(player) = room.players.get_mut(&sender_id) else {
                return;
            };
            player.is_spectator = true;
            let was_captain = player.is_captain;
            player.is_captain = false;
            (player.name.clone(), player.team, was_captain)
        };

        if was_captain {
            if let Some(team) = sender_team {
                room.captains.set(team, None);
                vote::reassign_captain_if_needed(room, team);
                if room.phase == Phase::TeamNaming && room.captains.get(team).is_none() {
                    room.team_naming_ready_teams.set(team, true);
                }
            }
        }
        room.apply_captain_flags();

        room.answer_submissions.remove(&sender_id);
        if room
            .active_answer
            .as_ref()
            .is_some_and(|answer| answer.by_peer_id == sender_id)
        {
            room.active_answer = None;
        }
        if room.skip_requesters.remove(&sender_id) {
            upsert_skip_request_message(room);
        }

        if let Some(sender) = room.players.get(&sender_id) {
            self.send_frame(
                sender,
                ServerFrame::ModerationNotice {
                    message: "Вы дисквалифицированы за нарушение правил чата.".to_string(),
                    level: ModerationNoticeLevel::Error,
                    strikes,
                    disqualified: true,
                },
            );
        }
        append_system_chat_message(
            room,
            &format!("Игрок {sender_name} дисквалифицирован за нарушение правил чата."),
            ChatKind::System,
        );
        self.metrics
            .increment(&self.metrics.moderation_disqualifications);
        tracing::warn!(
            room_id = %room.room_id,
            offender = %sender_id,
            strikes,
            "Player disqualified by chat moderation"
        );

        // The answering population shrank; the question may now be complete.
        if room.phase == Phase::Question && room.game_mode != GameMode::Classic {
            let eligible = room.answer_eligible_players().len();
            if eligible > 0 && room.answer_submissions.len() >= eligible {
                questions::finalize_question(self, room).await;
                return;
            }
        }
        if room.phase == Phase::TeamNaming && room.team_naming_ready_teams.all_ready() {
            phases::finalize_team_naming(self, room).await;
            return;
        }
        self.broadcast_and_persist(room).await;
    }
}
