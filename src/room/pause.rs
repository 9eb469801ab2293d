//! Host-absence pause/resume and the host-initiated manual pause.
//!
//! Both mechanisms freeze the current phase with its exact remaining time
//! into `paused_state`, cancel every timer, and later resume by re-arming
//! the phase timer with that remaining time.

use std::sync::Arc;

use crate::protocol::types::{IdentityKey, PeerId, Phase};
use crate::protocol::validation::normalize_player_name;
use crate::room::state::{PausedState, RoomState};
use crate::room::timers::{TimerAction, TimerKey, MIN_TIMER_DELAY_MS};
use crate::room::now_ms;
use crate::server::{QuizServer, RoomEvent};

/// Remaining milliseconds of `phase`'s deadline.
pub fn get_phase_remaining_ms_for_pause(room: &RoomState, phase: Phase) -> u64 {
    let now = now_ms();
    let deadline = match phase {
        Phase::Question => room.question_ends_at,
        Phase::TeamReveal => room.team_reveal_ends_at,
        Phase::CaptainVote => room.captain_vote_ends_at,
        Phase::TeamNaming => room.team_naming_ends_at,
        Phase::Reveal => room.reveal_ends_at,
        _ => None,
    };
    deadline.map(|ends_at| ends_at.saturating_sub(now)).unwrap_or(0)
}

/// Re-arm the timer of a resumed phase with its preserved remaining time.
pub(crate) fn schedule_phase_timer(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
    phase: Phase,
    remaining_ms: u64,
) {
    let delay = remaining_ms.max(MIN_TIMER_DELAY_MS);
    let ends_at = now_ms() + delay;

    match phase {
        Phase::Question => {
            room.question_ends_at = Some(ends_at);
            server.schedule_timer(room, TimerKey::Question, delay, TimerAction::FinalizeQuestion);
        }
        Phase::TeamReveal => {
            room.team_reveal_ends_at = Some(ends_at);
            server.schedule_timer(room, TimerKey::TeamReveal, delay, TimerAction::AfterTeamReveal);
        }
        Phase::CaptainVote => {
            room.captain_vote_ends_at = Some(ends_at);
            server.schedule_timer(
                room,
                TimerKey::CaptainVote,
                delay,
                TimerAction::FinalizeCaptainVote,
            );
        }
        Phase::TeamNaming => {
            room.team_naming_ends_at = Some(ends_at);
            server.schedule_timer(
                room,
                TimerKey::TeamNaming,
                delay,
                TimerAction::FinalizeTeamNaming,
            );
        }
        Phase::Reveal => {
            room.reveal_ends_at = Some(ends_at);
            server.schedule_timer(room, TimerKey::Reveal, delay, TimerAction::AdvanceAfterReveal);
        }
        Phase::Lobby | Phase::Results | Phase::HostReconnect | Phase::ManualPause => {}
    }
}

/// Which phases freeze (rather than continue) when the host vanishes.
pub fn should_pause_on_host_disconnect(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Lobby
            | Phase::TeamReveal
            | Phase::CaptainVote
            | Phase::TeamNaming
            | Phase::Question
            | Phase::Reveal
    )
}

/// Freeze the room while waiting for the dropped host to return.
///
/// Returns false when the current phase does not pause (the caller then
/// reassigns the host immediately).
pub(crate) async fn pause_for_host_reconnect(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
    host_name: Option<&str>,
    host_identity: Option<IdentityKey>,
) -> bool {
    if !should_pause_on_host_disconnect(room.phase) {
        return false;
    }

    let previous_phase = room.phase;
    let remaining_ms = get_phase_remaining_ms_for_pause(room, previous_phase);
    server.clear_timers(room);

    let wait_ms = server.config().game.host_reconnect_wait_ms;
    room.paused_state = Some(PausedState {
        phase: previous_phase,
        remaining_ms,
    });
    room.phase = Phase::HostReconnect;
    room.question_ends_at = None;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;
    room.host_reconnect_ends_at = Some(now_ms() + wait_ms);
    room.manual_pause_by_name = None;
    room.disconnected_host_name = Some(host_name.unwrap_or("Ведущий").to_string());
    room.disconnected_host_expected_name = host_name.map(normalize_player_name);
    room.disconnected_host_identity = host_identity;

    tracing::warn!(
        room_id = %room.room_id,
        paused_phase = previous_phase.as_str(),
        remaining_ms,
        "Host disconnected, room paused for reconnect"
    );
    server
        .metrics
        .increment(&server.metrics.host_reconnect_pauses);

    server.broadcast_and_persist(room).await;

    server.schedule_timer(
        room,
        TimerKey::HostReconnect,
        wait_ms,
        TimerAction::HostReconnectTimeout,
    );
    true
}

/// The reconnect window elapsed: promote a new host and resume.
pub(crate) async fn host_reconnect_timeout(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::HostReconnect {
        return;
    }
    let _ = assign_new_host(server, room).await;
    resume_after_host_reconnect(server, room).await;
}

/// Restore the paused phase with its preserved remaining time.
pub(crate) async fn resume_after_host_reconnect(server: &Arc<QuizServer>, room: &mut RoomState) {
    let Some(paused) = room.paused_state.take() else {
        room.host_reconnect_ends_at = None;
        room.disconnected_host_name = None;
        room.disconnected_host_expected_name = None;
        room.disconnected_host_identity = None;
        server
            .metrics
            .increment(&server.metrics.host_reconnect_resumes);
        server.broadcast_and_persist(room).await;
        return;
    };

    server.clear_timers(room);

    room.phase = paused.phase;
    room.host_reconnect_ends_at = None;
    room.disconnected_host_name = None;
    room.disconnected_host_expected_name = None;
    room.disconnected_host_identity = None;
    room.manual_pause_by_name = None;

    room.question_ends_at = None;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;

    tracing::info!(
        room_id = %room.room_id,
        resumed_phase = paused.phase.as_str(),
        remaining_ms = paused.remaining_ms,
        "Room resumed"
    );
    server
        .metrics
        .increment(&server.metrics.host_reconnect_resumes);

    schedule_phase_timer(server, room, paused.phase, paused.remaining_ms);
    server.broadcast_and_persist(room).await;
}

/// Promote the next available player to host: first non-spectator, falling
/// back to anyone still connected.
pub(crate) async fn assign_new_host(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
) -> Option<PeerId> {
    let mut peer_ids: Vec<PeerId> = room.players.keys().copied().collect();
    peer_ids.sort();

    let mut candidate: Option<PeerId> = None;
    let mut fallback: Option<PeerId> = None;
    for peer_id in &peer_ids {
        let Some(player) = room.players.get_mut(peer_id) else {
            continue;
        };
        player.is_host = false;
        if fallback.is_none() {
            fallback = Some(*peer_id);
        }
        if candidate.is_none() && !player.is_spectator {
            candidate = Some(*peer_id);
        }
    }

    let chosen = candidate.or(fallback)?;
    let in_lobby = room.phase == Phase::Lobby;
    if let Some(player) = room.players.get_mut(&chosen) {
        player.is_host = true;
        player.is_spectator = false;
        if in_lobby {
            player.team = None;
        }
    }
    room.host_peer_id = Some(chosen);

    tracing::warn!(
        room_id = %room.room_id,
        new_host = %chosen,
        phase = room.phase.as_str(),
        "Host reassigned"
    );
    server.metrics.increment(&server.metrics.host_reassignments);
    server
        .publisher()
        .publish(RoomEvent::HostReassigned {
            room_id: room.room_id.clone(),
            new_host: chosen,
        })
        .await;
    Some(chosen)
}

/// Phases the host may freeze manually.
pub fn can_manually_pause(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::TeamReveal | Phase::CaptainVote | Phase::TeamNaming | Phase::Question | Phase::Reveal
    )
}

/// Host toggled pause on: identical freeze to host-reconnect, but
/// open-ended and resumed explicitly.
pub(crate) async fn pause_game_by_host(
    server: &Arc<QuizServer>,
    room: &mut RoomState,
    host_name: &str,
) {
    if !can_manually_pause(room.phase) {
        return;
    }
    let previous_phase = room.phase;
    let remaining_ms = get_phase_remaining_ms_for_pause(room, previous_phase);
    server.clear_timers(room);

    room.paused_state = Some(PausedState {
        phase: previous_phase,
        remaining_ms,
    });
    room.phase = Phase::ManualPause;
    room.question_ends_at = None;
    room.team_reveal_ends_at = None;
    room.captain_vote_ends_at = None;
    room.team_naming_ends_at = None;
    room.reveal_ends_at = None;
    room.host_reconnect_ends_at = None;
    room.manual_pause_by_name = Some(host_name.to_string());

    tracing::info!(
        room_id = %room.room_id,
        paused_phase = previous_phase.as_str(),
        remaining_ms,
        "Room manually paused"
    );
    server.metrics.increment(&server.metrics.manual_pauses);
    server.broadcast_and_persist(room).await;
}

/// Host toggled pause off.
pub(crate) async fn resume_game_by_host(server: &Arc<QuizServer>, room: &mut RoomState) {
    if room.phase != Phase::ManualPause {
        return;
    }
    resume_after_host_reconnect(server, room).await;
}
