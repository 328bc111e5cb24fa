//! Shared types for the storyreef game server.
//!
//! Ids, the room event model, and the error taxonomy used across the
//! config, agent, game, and server crates.

pub mod errors;
pub mod events;
pub mod id;

pub use errors::{ConfigError, GameError};
pub use events::{now_ms, EventLogEntry, RoomEvent};
pub use id::{PeerId, RoomId};
