//! Conversational-AI backend boundary.
//!
//! The game core never talks to a vendor SDK directly. It depends on
//! the small closed message sets defined here: a session is opened
//! through [`AgentApi`] and then driven entirely by [`ClientCommand`]s
//! going out and [`ServerEvent`]s coming in. The production
//! implementation is [`LiveAgentApi`], a WebSocket client for a
//! Gemini-Live-style realtime API; tests substitute their own fakes.

pub mod live;
pub mod wire;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use live::{LiveAgentApi, LiveConfig};

/// Declaration of the one tool the agent may invoke to end the game.
#[derive(Debug, Clone)]
pub struct EndGameTool {
    pub name: String,
    pub description: String,
}

/// Parameters for opening one conversation session.
#[derive(Debug, Clone)]
pub struct AgentSessionConfig {
    /// System instructions describing the mystery (both sides).
    pub instructions: String,
    /// Introductory turn, sent only on a fresh session.
    pub first_message: String,
    pub end_game_tool: EndGameTool,
    /// Advisory limit forwarded to the backend.
    pub time_limit_secs: u64,
    /// Continuation handle from a previous session. When set, the
    /// backend resumes the prior conversation and the caller must not
    /// resend the introductory turn.
    pub resumption_token: Option<String>,
}

/// Commands the game sends into an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Raw PCM16 mono 16 kHz from the current floor holder.
    Audio(Vec<u8>),
    /// A text turn (introduction, continue prompt, wrap-up instruction).
    Text(String),
    /// The floor holder stopped speaking; the agent may respond now.
    EndUserTurn,
    /// Acknowledge a tool invocation.
    ToolResponse { id: String, result: String },
    /// Graceful close.
    Close,
}

/// Messages an open session emits toward the game.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Streamed transcript fragment of the agent's current turn.
    Transcript(String),
    /// The agent finished its turn.
    TurnComplete,
    /// Raw PCM16 agent speech.
    Audio(Vec<u8>),
    /// The agent's own speech was interrupted by user activity.
    Interrupted,
    /// The agent invoked a declared tool.
    ToolCall { id: String, name: String },
    /// Fresh continuation handle for resuming after a drop.
    ResumptionToken(String),
    /// The connection ended. 1000 is a normal close.
    Closed { code: u16, reason: String },
}

/// A live connection to the backend: commands in, events out.
///
/// Dropping `commands` (or sending [`ClientCommand::Close`]) tears the
/// connection down; `events` then yields [`ServerEvent::Closed`] last.
#[derive(Debug)]
pub struct AgentConnection {
    pub commands: mpsc::Sender<ClientCommand>,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Factory for conversation sessions.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn open(&self, config: AgentSessionConfig) -> Result<AgentConnection, AgentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session closed")]
    SessionClosed,

    #[error("missing credential: {0}")]
    MissingCredential(String),
}
