use serde::{Deserialize, Serialize};

use super::error_codes::AdmissionErrorCode;
use super::types::{PeerId, RoomId, Team};
use crate::room::view::RoomStateView;

/// Message types sent from client to server.
///
/// Every frame is a JSON object tagged by `type`. The `join` frame must be
/// the first frame on a connection (legacy clients may pass the same fields
/// in the connection query string instead).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Request admission into a room (MUST be first frame)
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
        /// Proves the bearer is the host (issued at room creation)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_token: Option<String>,
        /// Opaque reclaim secret from a previous `connected` frame
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_password: Option<String>,
        /// Bearer token for account identity resolution
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        /// Stable anonymous client id for guest identity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Heartbeat; answered with `pong`
    Ping,
    /// Host starts the game from the lobby
    StartGame,
    /// Cast or recast a captain ballot for a teammate
    #[serde(rename_all = "camelCase")]
    VoteCaptain { candidate_peer_id: PeerId },
    /// Submit a custom team name during team-naming
    SetTeamName { name: String },
    /// Draw a random unused team name from the pool
    RandomTeamName,
    /// Submit an answer index for the current question
    #[serde(rename_all = "camelCase")]
    SubmitAnswer { answer_index: i64 },
    /// Host skips the current question outright
    SkipQuestion,
    /// Participant asks the host to skip the current question
    RequestSkipQuestion,
    /// Host resolves a pending skip request
    ResolveSkipRequest { decision: SkipDecision },
    /// Host returns the room to the lobby after results
    NewGame,
    /// Host deletes a chat message (strikes toward disqualification)
    #[serde(rename_all = "camelCase")]
    ModerateChatMessage { message_id: String },
    /// Send a chat message
    SendChat { text: String },
    /// Host toggles the manual pause
    TogglePause,
    /// Re-fetch the caller's cosmetic profile assets
    RefreshProfileAssets,
}

/// Host decision on a pending skip request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SkipDecision {
    Approve,
    Reject,
}

/// Severity attached to a `moderation-notice` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModerationNoticeLevel {
    Warning,
    Error,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Admission succeeded; the connection now occupies a seat
    #[serde(rename_all = "camelCase")]
    Connected {
        peer_id: PeerId,
        room_id: RoomId,
        is_host: bool,
        is_spectator: bool,
        /// Present only once teams exist (past lobby)
        #[serde(skip_serializing_if = "Option::is_none")]
        assigned_team: Option<Team>,
        player_token: String,
    },
    /// Full viewer-scoped room projection (boxed to reduce enum size)
    #[serde(rename_all = "camelCase")]
    StateSync {
        server_time: u64,
        room: Box<RoomStateView>,
    },
    /// Heartbeat response
    #[serde(rename_all = "camelCase")]
    Pong { server_time: u64 },
    /// Admission failure; always followed by close 1008
    Error {
        code: AdmissionErrorCode,
        message: String,
    },
    /// Moderation outcome delivered to the offending player only
    #[serde(rename_all = "camelCase")]
    ModerationNotice {
        message: String,
        level: ModerationNoticeLevel,
        strikes: u32,
        disqualified: bool,
    },
}

impl ServerFrame {
    pub fn admission_error(code: AdmissionErrorCode) -> Self {
        Self::Error {
            code,
            message: code.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_parses_from_wire_shape() {
        let raw = r#"{
            "type": "join",
            "roomId": "ABCD1234",
            "name": "Алиса",
            "hostToken": "secret",
            "clientId": "client-00001"
        }"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Join {
                room_id,
                name,
                host_token,
                client_id,
                player_token,
                ..
            } => {
                assert_eq!(room_id, "ABCD1234");
                assert_eq!(name.as_deref(), Some("Алиса"));
                assert_eq!(host_token.as_deref(), Some("secret"));
                assert_eq!(client_id.as_deref(), Some("client-00001"));
                assert_eq!(player_token, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn submit_answer_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"submit-answer","answerIndex":2}"#).unwrap();
        assert_eq!(frame, ClientFrame::SubmitAnswer { answer_index: 2 });
    }

    #[test]
    fn resolve_skip_request_parses_decision() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"resolve-skip-request","decision":"approve"}"#)
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::ResolveSkipRequest {
                decision: SkipDecision::Approve
            }
        );
    }

    #[test]
    fn error_frame_serializes_code_and_message() {
        let frame = ServerFrame::admission_error(AdmissionErrorCode::RoomFull);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "ROOM_FULL");
        assert!(json["message"].as_str().is_some());
    }

    #[test]
    fn connected_frame_hides_absent_team() {
        let frame = ServerFrame::Connected {
            peer_id: uuid::Uuid::new_v4(),
            room_id: "ABCD1234".to_string(),
            is_host: true,
            is_spectator: false,
            assigned_team: None,
            player_token: "tok".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "connected");
        assert!(json.get("assignedTeam").is_none());
    }
}
