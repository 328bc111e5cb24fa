use std::path::PathBuf;

use crate::id::RoomId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// Failures surfaced to player-facing mutations. Mid-game
/// infrastructure failures are reported as `GameEnded` room events
/// instead, so every player sees the same outcome.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("no game room with id {0}")]
    RoomNotFound(RoomId),

    #[error("no story with id {0}")]
    StoryNotFound(u32),

    #[error("no story selected for room {0}")]
    NoStorySelected(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("no players connected in room {0}")]
    NoPlayersConnected(RoomId),

    #[error("game already started for room {0}")]
    GameAlreadyStarted(RoomId),

    #[error("no active game in room {0}")]
    GameNotActive(RoomId),

    #[error("agent error: {0}")]
    Agent(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
