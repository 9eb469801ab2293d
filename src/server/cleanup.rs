//! Connection teardown: seat removal, host absence handling, phase
//! re-finalization, and room eviction.

use std::sync::Arc;
use uuid::Uuid;

use super::QuizServer;
use crate::protocol::types::{GameMode, PeerId, Phase, Team};
use crate::room::chat::{append_system_chat_message, upsert_skip_request_message};
use crate::room::state::{ChatKind, RoomState};
use crate::room::{pause, phases, questions, vote, RoomHandle};

/// Is the room in (or paused inside) a running game?
fn in_live_game(room: &RoomState) -> bool {
    match room.phase {
        Phase::TeamReveal
        | Phase::CaptainVote
        | Phase::TeamNaming
        | Phase::Question
        | Phase::Reveal => true,
        Phase::HostReconnect | Phase::ManualPause => room
            .paused_state
            .is_some_and(|paused| paused.phase != Phase::Lobby),
        Phase::Lobby | Phase::Results => false,
    }
}

impl QuizServer {
    /// Tear down one connection's seat.
    ///
    /// A stale disconnect — the socket no longer bound to the seat after a
    /// handoff — is counted and otherwise ignored.
    pub async fn cleanup_connection(
        self: &Arc<Self>,
        room_id: &str,
        peer_id: PeerId,
        socket_id: Uuid,
    ) {
        let handle: Option<Arc<RoomHandle>> = {
            let registry = self.registry.lock().await;
            registry.get(room_id).cloned()
        };
        let Some(handle) = handle else {
            return;
        };

        let mut room = handle.state.lock().await;
        let Some(existing) = room.players.get(&peer_id) else {
            return;
        };
        if existing.socket_id != socket_id {
            self.metrics.increment(&self.metrics.stale_disconnects);
            return;
        }

        let Some(removed) = room.players.remove(&peer_id) else {
            return;
        };
        self.metrics.increment(&self.metrics.disconnections);
        room.player_tokens.remove(&removed.player_token);
        room.answer_submissions.remove(&peer_id);
        if room
            .active_answer
            .as_ref()
            .is_some_and(|answer| answer.by_peer_id == peer_id)
        {
            room.active_answer = None;
        }
        if room.skip_requesters.remove(&peer_id) {
            upsert_skip_request_message(&mut room);
        }
        vote::cleanup_votes_for_player(&mut room, peer_id);

        // Last connection out: final snapshot, then drop the room from the
        // registry (the durable record remains).
        if room.players.is_empty() {
            self.clear_timers(&mut room);
            self.persist_room(&mut room, true, true).await;
            drop(room);
            self.evict_room(room_id, &handle).await;
            tracing::info!(room_id, "Last connection left, room evicted");
            return;
        }

        let was_host = removed.is_host || room.host_peer_id == Some(peer_id);
        if was_host {
            let paused = pause::pause_for_host_reconnect(
                self,
                &mut room,
                Some(&removed.name),
                removed.identity_key.clone(),
            )
            .await;
            if !paused {
                let _ = pause::assign_new_host(self, &mut room).await;
            }
        }

        if let Some(team) = removed.team {
            if *room.captains.get(team) == Some(peer_id) {
                room.captains.set(team, None);
                if room.phase == Phase::TeamNaming {
                    room.team_naming_ready_teams.set(team, false);
                    vote::reassign_captain_if_needed(&mut room, team);
                    if room.captains.get(team).is_none() {
                        room.team_naming_ready_teams.set(team, true);
                    }
                } else {
                    vote::reassign_captain_if_needed(&mut room, team);
                }
                room.apply_captain_flags();
            }
        }

        if room.phase == Phase::Lobby {
            let peer_ids: Vec<PeerId> = room.players.keys().copied().collect();
            for id in peer_ids {
                if let Some(player) = room.players.get_mut(&id) {
                    if !player.is_host {
                        player.team = None;
                        player.is_captain = false;
                    }
                }
            }
        }

        if !was_host {
            append_system_chat_message(
                &mut room,
                &format!("{} покинул(а) комнату.", removed.name),
                ChatKind::Presence,
            );
        }

        // A team game cannot continue without two occupied teams.
        if room.game_mode.is_team_mode() && in_live_game(&room) {
            let counts = room.team_counts();
            let active_total = room.active_non_host_players().len();
            if active_total < 2 || *counts.get(Team::A) == 0 || *counts.get(Team::B) == 0 {
                phases::reset_game(
                    self,
                    &mut room,
                    Some("Недостаточно участников для продолжения. Игра возвращена в лобби."),
                )
                .await;
                return;
            }
        }

        match room.phase {
            Phase::CaptainVote => {
                vote::refresh_captain_vote_progress(&mut room);
                phases::schedule_single_member_auto_captain(self, &mut room);
                if room.captain_vote_ready_teams.all_ready() {
                    phases::finalize_captain_vote(self, &mut room).await;
                    self.persist_room(&mut room, false, true).await;
                    return;
                }
            }
            Phase::TeamNaming => {
                for team in Team::ALL {
                    let auto_ready = room.team_players(team).is_empty()
                        || (room.game_mode == GameMode::Classic
                            && room.captains.get(team).is_none());
                    if auto_ready {
                        room.team_naming_ready_teams.set(team, true);
                    }
                }
                if room.team_naming_ready_teams.all_ready() {
                    phases::finalize_team_naming(self, &mut room).await;
                    self.persist_room(&mut room, false, true).await;
                    return;
                }
            }
            Phase::Question if room.game_mode != GameMode::Classic => {
                let eligible = room.answer_eligible_players().len();
                if eligible > 0 && room.answer_submissions.len() >= eligible {
                    questions::finalize_question(self, &mut room).await;
                    self.persist_room(&mut room, false, true).await;
                    return;
                }
            }
            _ => {}
        }

        self.broadcast_and_persist(&mut room).await;
    }
}
