use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned identifier for one connection's seat in a room.
pub type PeerId = Uuid;

/// Room codes are short uppercase alphanumeric strings (max 8 chars).
pub type RoomId = String;

/// The two quiz teams. FFA mode leaves every player team-less.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::A, Team::B];

    pub fn opposite(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::A => "A",
            Team::B => "B",
        }
    }

    pub fn default_name(self) -> &'static str {
        match self {
            Team::A => "Команда A",
            Team::B => "Команда B",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room lifecycle phase.
///
/// ```text
/// lobby ──start-game──▶ (ffa: question) | (classic/chaos: team-reveal)
/// team-reveal ──6s──▶ captain-vote (classic) | team-naming (chaos)
/// captain-vote ──all ready | 30s──▶ team-naming
/// team-naming ──all ready | 30s──▶ question
/// question ──complete | 30s──▶ reveal ──4s──▶ next question | results
/// any live phase ──host drop──▶ host-reconnect ──▶ resume or reassign
/// any live phase ──host toggle──▶ manual-pause ──host toggle──▶ resume
/// results ──new-game──▶ lobby
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Lobby,
    TeamReveal,
    CaptainVote,
    TeamNaming,
    Question,
    Reveal,
    Results,
    HostReconnect,
    ManualPause,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::TeamReveal => "team-reveal",
            Phase::CaptainVote => "captain-vote",
            Phase::TeamNaming => "team-naming",
            Phase::Question => "question",
            Phase::Reveal => "reveal",
            Phase::Results => "results",
            Phase::HostReconnect => "host-reconnect",
            Phase::ManualPause => "manual-pause",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How answers are collected and scored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// One elected captain answers for the active team; teams alternate.
    #[default]
    Classic,
    /// Every player answers individually, ranked by points.
    Ffa,
    /// Every team member votes; the team answer is the plurality choice.
    Chaos,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Classic => "classic",
            GameMode::Ffa => "ffa",
            GameMode::Chaos => "chaos",
        }
    }

    pub fn is_team_mode(self) -> bool {
        !matches!(self, GameMode::Ffa)
    }
}

/// Difficulty of a single question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionDifficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl QuestionDifficulty {
    pub const LEVELS: [QuestionDifficulty; 3] = [
        QuestionDifficulty::Easy,
        QuestionDifficulty::Medium,
        QuestionDifficulty::Hard,
    ];
}

/// Difficulty selection strategy for a whole game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyMode {
    Easy,
    Medium,
    Hard,
    /// Cycle easy → medium → hard.
    #[default]
    Mixed,
    /// Ramp from easy up to hard over the question count.
    Progressive,
}

/// Where the question set came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    #[default]
    Catalog,
    Generated,
}

/// Lifecycle of the participants' request to skip the current question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipRequestStatus {
    #[default]
    Idle,
    Pending,
    Rejected,
}

/// One quiz question as stored in the room's question set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub difficulty: QuestionDifficulty,
}

/// Canonicalized identity used for duplicate detection within a room.
///
/// Authenticated users collapse to `acct:<userId>`, anonymous clients with a
/// well-formed client id to `guest:<clientId>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn account(user_id: i64) -> Self {
        Self(format!("acct:{user_id}"))
    }

    pub fn guest(client_id: &str) -> Self {
        Self(format!("guest:{client_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
