//! Configuration schema for the storyreef server.
//!
//! All structs use `serde(default)` so partial configs work correctly.

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReefConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub game: GameConfig,
}

/// Listener settings for the RPC WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Connection settings for the conversational-AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// API key. Usually left empty here and supplied via the
    /// `REEF_AGENT_API_KEY` environment variable.
    pub api_key: String,
    pub model: String,
    pub voice: String,
    /// Seconds to wait for the session WebSocket to open.
    pub connect_timeout_secs: u64,
    /// Fixed backoff before a reconnect attempt after an abnormal close.
    pub reconnect_backoff_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice: "Aoede".into(),
            connect_timeout_secs: 10,
            reconnect_backoff_secs: 2,
        }
    }
}

/// Gameplay limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Wall-clock limit of one game; triggers the wrap-up announcement.
    pub time_limit_secs: u64,
    pub room_players_limit: usize,
    /// Per-room event history retained for reconnect replay.
    pub event_history_capacity: usize,
    /// Optional path of a TOML story catalog replacing the built-ins.
    pub stories_path: Option<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: 600,
            room_players_limit: 8,
            event_history_capacity: 100,
            stories_path: None,
        }
    }
}
