use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed admission failure codes.
///
/// Every rejected join produces exactly one `error` frame carrying one of
/// these codes, followed by a close with policy code 1008. Admission errors
/// never mutate room state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionErrorCode {
    InvalidRoomId,
    InvalidJoinPayload,
    JoinTimeout,
    RoomNotFound,
    RoomFull,
    HostTokenInvalid,
    AuthTokenInvalid,
    AccountAlreadyInRoom,
    RoomPasswordRequired,
    RoomPasswordInvalid,
}

impl AdmissionErrorCode {
    /// Human-readable message shipped in the `error` frame alongside the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidRoomId => "Room id must be up to 8 alphanumeric characters.",
            Self::InvalidJoinPayload => {
                "The first frame must be a valid join payload with a room id."
            }
            Self::JoinTimeout => "No join payload arrived within the handshake window.",
            Self::RoomNotFound => "Комната не найдена. Проверьте код комнаты.",
            Self::RoomFull => "Комната заполнена. Максимум 20 участников.",
            Self::HostTokenInvalid => "Host token does not match this room.",
            Self::AuthTokenInvalid => "The bearer token could not be resolved to an account.",
            Self::AccountAlreadyInRoom => {
                "This account already occupies a different seat in the room."
            }
            Self::RoomPasswordRequired => "Эта комната защищена паролем.",
            Self::RoomPasswordInvalid => "Неверный пароль комнаты.",
        }
    }
}

impl fmt::Display for AdmissionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// WebSocket close code for policy rejections (admission failures).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code sent to the old socket on a duplicate-identity handoff.
pub const CLOSE_DUPLICATE_HANDOFF: u16 = 4002;
