//! Configuration module.
//!
//! JSON config files with environment overrides and compiled-in defaults:
//!
//! - [`types`]: Root `Config` struct
//! - [`server`]: Game timing and persistence cadence
//! - [`logging`]: Logging configuration
//! - [`loader`]: Configuration loading functions
//! - [`defaults`]: Default value functions

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod server;
pub mod types;

pub use loader::load;

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use server::{GameConfig, PersistenceConfig};

pub use types::Config;
