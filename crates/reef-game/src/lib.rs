//! Real-time coordination core of the storyreef server.
//!
//! A room's life: players join, someone selects a story, the game
//! starts. From then on the [`floor::FloorArbiter`] decides whose
//! voice the AI narrator hears, the [`session::AgentSessionManager`]
//! keeps the narrator's session alive, and every observable change is
//! appended to the [`eventlog::EventLog`] that clients tail over RPC.

pub mod eventlog;
pub mod floor;
pub mod registry;
pub mod session;
pub mod stories;

pub use eventlog::EventLog;
pub use floor::{AgentInput, FloorArbiter, RoomOutput, VoiceActivitySegment};
pub use registry::{GameRoom, RoomRegistry, RoomSettings, END_GAME_TOOL};
pub use session::{AgentSessionManager, MuteSource, SessionEnd, SessionState};
pub use stories::{Story, StoryCatalog, StorySummary};
