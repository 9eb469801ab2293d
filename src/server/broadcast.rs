//! State fan-out: bump the version, project per viewer, enqueue, persist.

use tokio::sync::mpsc::error::TrySendError;

use super::QuizServer;
use crate::protocol::messages::ServerFrame;
use crate::protocol::types::PeerId;
use crate::room::now_ms;
use crate::room::state::{Outbound, PlayerConnection, RoomState};
use crate::room::view::build_state_view;

impl QuizServer {
    /// Enqueue one frame to a player's socket. Slow or closed sockets are
    /// counted and otherwise ignored; the room never blocks on a client.
    pub(crate) fn send_frame(&self, player: &PlayerConnection, frame: ServerFrame) {
        match player.outbox.try_send(Outbound::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.increment(&self.metrics.frames_dropped);
                tracing::debug!(peer_id = %player.peer_id, "Outbox full, frame dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.increment(&self.metrics.send_failures);
            }
        }
    }

    /// Ask a socket's send task to close the connection with `code`.
    pub(crate) fn send_close(&self, player: &PlayerConnection, code: u16, reason: &str) {
        let _ = player.outbox.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Project and enqueue a `state-sync` frame for every connection.
    pub(crate) fn broadcast_state(&self, room: &mut RoomState) {
        let question_time_ms = self.config().game.question_time_ms;
        let mut peer_ids: Vec<PeerId> = room.players.keys().copied().collect();
        peer_ids.sort();

        for peer_id in peer_ids {
            let Some(view) = build_state_view(room, peer_id, question_time_ms) else {
                continue;
            };
            let frame = ServerFrame::StateSync {
                server_time: now_ms(),
                room: Box::new(view),
            };
            if let Some(player) = room.players.get(&peer_id) {
                self.send_frame(player, frame);
            }
        }
    }

    /// The tail of every state-changing handler: bump the state version,
    /// fan out viewer projections, then hand the room to the snapshot tier.
    pub(crate) async fn broadcast_and_persist(&self, room: &mut RoomState) {
        room.state_version = room.state_version.saturating_add(1);
        self.broadcast_state(room);
        self.persist_room(room, false, false).await;
    }
}
