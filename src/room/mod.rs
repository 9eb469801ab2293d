//! The room aggregate and its game flows.
//!
//! [`state::RoomState`] owns everything about one live room; the flow
//! modules ([`phases`], [`questions`], [`vote`], [`chat`], [`pause`]) mutate
//! it under the room mutex held by the caller. [`snapshot`] round-trips the
//! state through JSON for the persistence tier and [`view`] projects it into
//! viewer-scoped `state-sync` payloads.

pub mod chat;
pub mod pause;
pub mod phases;
pub mod questions;
pub mod snapshot;
pub mod state;
pub mod stats;
pub mod timers;
pub mod view;
pub mod vote;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::types::RoomId;
pub use state::{PlayerConnection, RoomState};

/// Shared ownership wrapper for one room; all state sits behind the mutex.
#[derive(Debug)]
pub struct RoomHandle {
    pub room_id: RoomId,
    pub state: Mutex<RoomState>,
}

impl RoomHandle {
    /// Wrap a state, wiring its self-reference for timer tasks.
    pub fn new(state: RoomState) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let mut state = state;
            state.handle = weak.clone();
            RoomHandle {
                room_id: state.room_id.clone(),
                state: Mutex::new(state),
            }
        })
    }
}

/// Epoch milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Fresh uuid string for chat/history entry ids.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Opaque reclaim secret handed to a newly seated player.
pub fn generate_player_token() -> String {
    crate::protocol::room_codes::generate_secret(32)
}
