//! Connection admission: authenticate, deduplicate, gate, and seat.

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{hash_secret, QuizServer};
use crate::identity::AuthIdentity;
use crate::protocol::error_codes::{AdmissionErrorCode, CLOSE_DUPLICATE_HANDOFF};
use crate::protocol::messages::ServerFrame;
use crate::protocol::types::{IdentityKey, PeerId, Phase, RoomId};
use crate::protocol::validation::{
    normalize_client_id, normalize_player_name, normalize_player_token, sanitize_player_name,
    sanitize_room_id, uniquify_name, DEFAULT_PLAYER_NAME,
};
use crate::room::pause::resume_after_host_reconnect;
use crate::room::state::{Outbound, PlayerConnection, RoomState};
use crate::room::{generate_player_token, RoomHandle};

/// The decoded join intent, from the first frame or the legacy query string.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub room_id: String,
    pub name: Option<String>,
    pub host_token: Option<String>,
    pub player_token: Option<String>,
    pub room_password: Option<String>,
    pub bearer_token: Option<String>,
    pub client_id: Option<String>,
}

/// A successfully admitted connection's addressing info.
#[derive(Debug, Clone)]
pub struct AdmittedSeat {
    pub room: Arc<RoomHandle>,
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub socket_id: Uuid,
}

fn is_paused_lobby(room: &RoomState) -> bool {
    room.phase == Phase::HostReconnect
        && room
            .paused_state
            .is_some_and(|paused| paused.phase == Phase::Lobby)
}

impl QuizServer {
    /// Admit a socket into a room, or reject it with a typed code.
    ///
    /// Rejections never mutate room state.
    pub async fn admit(
        self: &Arc<Self>,
        request: JoinRequest,
        outbox: mpsc::Sender<Outbound>,
        socket_id: Uuid,
    ) -> Result<AdmittedSeat, AdmissionErrorCode> {
        let result = self.admit_inner(request, outbox, socket_id).await;
        match &result {
            Ok(_) => self.metrics.increment(&self.metrics.admissions),
            Err(code) => {
                self.metrics.increment(&self.metrics.admission_rejections);
                tracing::info!(code = ?code, "Admission rejected");
            }
        }
        result
    }

    async fn admit_inner(
        self: &Arc<Self>,
        request: JoinRequest,
        outbox: mpsc::Sender<Outbound>,
        socket_id: Uuid,
    ) -> Result<AdmittedSeat, AdmissionErrorCode> {
        let room_id = sanitize_room_id(&request.room_id);
        if room_id.is_empty() {
            return Err(AdmissionErrorCode::InvalidRoomId);
        }

        // Resolve account identity before touching the room.
        let mut identity: Option<AuthIdentity> = None;
        if let Some(bearer) = request
            .bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            match self.identity_resolver().resolve(bearer).await {
                Ok(Some(resolved)) => {
                    self.metrics.increment(&self.metrics.identity_resolutions);
                    identity = Some(resolved);
                }
                Ok(None) => {
                    self.metrics.increment(&self.metrics.identity_failures);
                    return Err(AdmissionErrorCode::AuthTokenInvalid);
                }
                Err(error) => {
                    self.metrics.increment(&self.metrics.identity_failures);
                    tracing::warn!(%error, "Identity service failed during admission");
                    return Err(AdmissionErrorCode::AuthTokenInvalid);
                }
            }
        }
        let identity_key: Option<IdentityKey> = identity
            .as_ref()
            .map(|resolved| IdentityKey::account(resolved.user_id))
            .or_else(|| {
                request
                    .client_id
                    .as_deref()
                    .and_then(normalize_client_id)
                    .map(|client_id| IdentityKey::guest(&client_id))
            });

        let Some(handle) = self.get_or_load_room(&room_id).await else {
            return Err(AdmissionErrorCode::RoomNotFound);
        };

        let mut room = handle.state.lock().await;
        let requested_host = request
            .host_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .is_some();

        // Duplicate detection: player token first, then identity key.
        let normalized_token = request
            .player_token
            .as_deref()
            .and_then(normalize_player_token);
        let existing_peer = normalized_token
            .as_ref()
            .and_then(|token| room.player_tokens.get(token).copied())
            .or_else(|| {
                identity_key.as_ref().and_then(|key| {
                    room.players
                        .values()
                        .find(|player| player.identity_key.as_ref() == Some(key))
                        .map(|player| player.peer_id)
                })
            });

        if let Some(peer_id) = existing_peer {
            return self
                .handoff_seat(
                    &handle, &mut room, peer_id, request, requested_host, identity, outbox,
                    socket_id,
                )
                .await;
        }

        if room.players.len() >= self.config().game.max_players {
            return Err(AdmissionErrorCode::RoomFull);
        }

        if requested_host {
            let provided_hash = hash_secret(request.host_token.as_deref().unwrap_or_default().trim());
            if room.host_token_hash.is_empty() || provided_hash != room.host_token_hash {
                return Err(AdmissionErrorCode::HostTokenInvalid);
            }
        }

        let is_returning_host = requested_host
            && room.phase == Phase::HostReconnect
            && host_reclaim_matches(&room, identity_key.as_ref(), request.name.as_deref());

        if !requested_host && room.has_password() {
            let provided = request
                .room_password
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty());
            match provided {
                None => return Err(AdmissionErrorCode::RoomPasswordRequired),
                Some(password) if hash_secret(password) != room.room_password_hash => {
                    return Err(AdmissionErrorCode::RoomPasswordInvalid);
                }
                Some(_) => {}
            }
        }

        // An empty room has no host to wait for; the first connection takes
        // the seat (a later valid host token still reclaims it).
        let becomes_host = requested_host || room.players.is_empty();

        // Live-phase joiners observe without playing.
        let in_lobby = room.phase == Phase::Lobby || is_paused_lobby(&room);
        let is_spectator = !becomes_host && !in_lobby;
        if is_spectator {
            self.metrics.increment(&self.metrics.spectator_admissions);
        }

        if becomes_host {
            for player in room.players.values_mut() {
                player.is_host = false;
            }
        }

        let peer_id = Uuid::new_v4();
        let name = {
            let candidate = sanitize_player_name(request.name.as_deref().unwrap_or(DEFAULT_PLAYER_NAME));
            let taken: Vec<String> = room.players.values().map(|p| p.name.clone()).collect();
            uniquify_name(&candidate, taken.iter().map(String::as_str))
        };
        let player_token = generate_player_token();

        let player = PlayerConnection {
            peer_id,
            name,
            team: None,
            is_host: becomes_host,
            is_spectator,
            is_captain: false,
            player_token: player_token.clone(),
            identity_key,
            auth_user_id: identity.as_ref().map(|resolved| resolved.user_id),
            assets: identity
                .as_ref()
                .map(|resolved| resolved.assets.clone())
                .unwrap_or_default(),
            outbox,
            socket_id,
        };
        room.player_tokens.insert(player_token.clone(), peer_id);
        if becomes_host {
            room.host_peer_id = Some(peer_id);
        }

        let connected = ServerFrame::Connected {
            peer_id,
            room_id: room_id.clone(),
            is_host: becomes_host,
            is_spectator,
            assigned_team: None,
            player_token,
        };
        self.send_frame(&player, connected);
        room.players.insert(peer_id, player);

        tracing::info!(
            room_id = %room_id,
            peer_id = %peer_id,
            is_host = becomes_host,
            is_spectator,
            phase = room.phase.as_str(),
            "Player admitted"
        );

        if is_returning_host {
            resume_after_host_reconnect(self, &mut room).await;
        } else {
            self.broadcast_and_persist(&mut room).await;
        }
        drop(room);

        Ok(AdmittedSeat {
            room: handle,
            room_id,
            peer_id,
            socket_id,
        })
    }

    /// Rebind an existing seat to a fresh socket (same account reconnected).
    #[allow(clippy::too_many_arguments)]
    async fn handoff_seat(
        self: &Arc<Self>,
        handle: &Arc<RoomHandle>,
        room: &mut RoomState,
        peer_id: PeerId,
        request: JoinRequest,
        requested_host: bool,
        identity: Option<AuthIdentity>,
        outbox: mpsc::Sender<Outbound>,
        socket_id: Uuid,
    ) -> Result<AdmittedSeat, AdmissionErrorCode> {
        let existing_is_host = room
            .players
            .get(&peer_id)
            .map(|player| player.is_host)
            .ok_or(AdmissionErrorCode::RoomNotFound)?;

        if existing_is_host != requested_host {
            return Err(AdmissionErrorCode::AccountAlreadyInRoom);
        }
        if requested_host {
            let provided_hash = hash_secret(request.host_token.as_deref().unwrap_or_default().trim());
            if room.host_token_hash.is_empty() || provided_hash != room.host_token_hash {
                return Err(AdmissionErrorCode::HostTokenInvalid);
            }
        }

        // Close the superseded socket, then rebind the seat.
        if let Some(player) = room.players.get(&peer_id) {
            self.send_close(player, CLOSE_DUPLICATE_HANDOFF, "superseded by a new connection");
        }

        let taken: Vec<String> = room
            .players
            .values()
            .filter(|player| player.peer_id != peer_id)
            .map(|player| player.name.clone())
            .collect();

        let room_id = room.room_id.clone();
        let in_lobby = room.phase == Phase::Lobby;
        let (frame, is_pending_host) = {
            let Some(player) = room.players.get_mut(&peer_id) else {
                return Err(AdmissionErrorCode::RoomNotFound);
            };
            player.outbox = outbox;
            player.socket_id = socket_id;
            if let Some(resolved) = &identity {
                player.auth_user_id = Some(resolved.user_id);
                player.assets = resolved.assets.clone();
            }
            if let Some(raw_name) = request.name.as_deref() {
                let candidate = sanitize_player_name(raw_name);
                player.name = uniquify_name(&candidate, taken.iter().map(String::as_str));
            }

            let frame = ServerFrame::Connected {
                peer_id,
                room_id: room_id.clone(),
                is_host: player.is_host,
                is_spectator: player.is_spectator,
                assigned_team: if in_lobby { None } else { player.team },
                player_token: player.player_token.clone(),
            };
            (frame, player.is_host)
        };

        if let Some(player) = room.players.get(&peer_id) {
            self.send_frame(player, frame);
        }
        self.metrics.increment(&self.metrics.duplicate_handoffs);
        tracing::info!(
            room_id = %room_id,
            peer_id = %peer_id,
            "Duplicate identity, seat handed off to new socket"
        );

        if room.phase == Phase::HostReconnect && is_pending_host {
            resume_after_host_reconnect(self, room).await;
        } else {
            self.broadcast_and_persist(room).await;
        }

        Ok(AdmittedSeat {
            room: Arc::clone(handle),
            room_id,
            peer_id,
            socket_id,
        })
    }
}

/// Does a host-token reconnect match the host we are waiting for?
fn host_reclaim_matches(
    room: &RoomState,
    identity_key: Option<&IdentityKey>,
    name: Option<&str>,
) -> bool {
    if room.host_reconnect_ends_at.is_none() {
        return false;
    }
    if let (Some(expected), Some(actual)) = (room.disconnected_host_identity.as_ref(), identity_key)
    {
        return expected == actual;
    }
    match (&room.disconnected_host_expected_name, name) {
        (Some(expected), Some(actual)) => *expected == normalize_player_name(actual),
        _ => false,
    }
}
