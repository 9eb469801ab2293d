#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Quiz Arena Server
//!
//! Realtime room orchestrator for a live multiplayer quiz: one WebSocket per
//! participant, a deterministic phase state machine per room, per-mode answer
//! scoring under tight deadlines, and two-tier snapshot persistence so rooms
//! survive process restarts and host disconnects.
//!
//! The outer surfaces (HTTP API, relational storage, authentication, question
//! generation) are consumed through narrow traits; see [`storage`] and
//! [`identity`].

/// Question provisioning and the team-name pool
pub mod catalog;

/// Server configuration and environment variables
pub mod config;

/// Bearer-token identity resolution
pub mod identity;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Two-tier snapshot persistence policy
pub mod persistence;

/// WebSocket message protocol definitions
pub mod protocol;

/// Room state, phase flows, and projection
pub mod room;

/// Main server orchestration
pub mod server;

/// Room snapshot and game result stores
pub mod storage;

/// WebSocket connection handling
pub mod websocket;
