//! Root configuration types.

use super::defaults::default_port;
use super::logging::LoggingConfig;
use super::server::{GameConfig, PersistenceConfig};
use serde::{Deserialize, Serialize};

/// Root configuration struct for the quiz room orchestrator.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            game: GameConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
