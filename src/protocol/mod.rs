// Protocol module: wire frames, typed error codes, input sanitization.

pub mod error_codes;
pub mod messages;
pub mod room_codes;
pub mod types;
pub mod validation;

pub use error_codes::{AdmissionErrorCode, CLOSE_DUPLICATE_HANDOFF, CLOSE_POLICY_VIOLATION};

pub use messages::{ClientFrame, ModerationNoticeLevel, ServerFrame, SkipDecision};

pub use types::{
    DifficultyMode, GameMode, IdentityKey, PeerId, Phase, QuestionDifficulty, QuestionRecord,
    QuestionSource, RoomId, SkipRequestStatus, Team,
};
