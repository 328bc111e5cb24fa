//! AI session lifecycle for one room.
//!
//! [`AgentSessionManager`] owns the conversation with the backend:
//! it opens the session, pumps floor-holder audio in, fans server
//! events out to the floor arbiter and the event log, rides out a
//! transient connection drop via the backend's resumption token, and
//! tears everything down exactly once no matter how many paths ask
//! for a stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reef_agent::{
    AgentApi, AgentSessionConfig, ClientCommand, ServerEvent,
};
use reef_common::{GameError, RoomEvent, RoomId};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::eventlog::EventLog;
use crate::floor::{AgentInput, FloorArbiter, BYTES_PER_SECOND, OUTPUT_FRAME_BYTES};

/// RFC 6455 normal closure; anything else is treated as a drop.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Extra wait on top of queued playback time before closing.
const DRAIN_MARGIN: Duration = Duration::from_millis(500);
/// Hard ceiling on the drain wait.
const DRAIN_CAP: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Sent after a resumed session so the agent picks the story back up
/// without replaying its introduction.
pub const CONTINUE_PROMPT: &str = "continue";

/// Sent when the game timer fires.
pub const TIME_EXPIRED_PROMPT: &str = "The game's time limit has been reached. Reveal the full \
     solution to the mystery, thank the players, and then finish the game with your tool.";

/// Acknowledgement payload for any tool invocation.
const TOOL_ACK: &str = "ok";

/// Lifecycle of the conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Opening,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

/// Who asked for the agent to be muted. The two sources are tracked
/// independently and OR-ed into the effective mute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteSource {
    /// A player toggled the mute control.
    Manual,
    /// The game itself silenced input, e.g. during teardown.
    System,
}

/// Why the session ended on its own, reported to the room so it can
/// finish the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The agent invoked its end-game tool.
    ToolCall,
    /// The connection dropped and could not be resumed.
    ConnectionLost,
}

#[derive(Default)]
struct MuteFlags {
    manual: bool,
    system: bool,
}

impl MuteFlags {
    fn effective(&self) -> bool {
        self.manual || self.system
    }
}

struct ManagerInner {
    room_id: RoomId,
    log: Arc<EventLog>,
    arbiter: FloorArbiter,
    api: Arc<dyn AgentApi>,
    reconnect_backoff: Duration,
    state: Mutex<SessionState>,
    /// Command sender of the currently open connection, swapped on
    /// reconnect, cleared on teardown.
    commands: Mutex<Option<mpsc::Sender<ClientCommand>>>,
    resumption_token: Mutex<Option<String>>,
    mute: Mutex<MuteFlags>,
    stopping: AtomicBool,
    end_signalled: AtomicBool,
    ended_tx: mpsc::UnboundedSender<SessionEnd>,
    cancel: CancellationToken,
}

impl ManagerInner {
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().expect("session state poisoned");
        debug!(room = %self.room_id, from = ?*state, to = ?next, "session state");
        *state = next;
    }

    fn current_commands(&self) -> Option<mpsc::Sender<ClientCommand>> {
        self.commands.lock().expect("session state poisoned").clone()
    }

    fn signal_end(&self, end: SessionEnd) {
        if !self.end_signalled.swap(true, Ordering::SeqCst) {
            let _ = self.ended_tx.send(end);
        }
    }
}

/// Drives one conversation session per started game.
#[derive(Clone)]
pub struct AgentSessionManager {
    inner: Arc<ManagerInner>,
}

impl AgentSessionManager {
    /// Create the manager and spawn the input pump consuming
    /// `agent_rx` from the floor arbiter. The session itself is not
    /// opened until [`start`](Self::start).
    pub fn new(
        room_id: RoomId,
        log: Arc<EventLog>,
        arbiter: FloorArbiter,
        api: Arc<dyn AgentApi>,
        agent_rx: mpsc::UnboundedReceiver<AgentInput>,
        reconnect_backoff: Duration,
        ended_tx: mpsc::UnboundedSender<SessionEnd>,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            room_id,
            log,
            arbiter,
            api,
            reconnect_backoff,
            state: Mutex::new(SessionState::NotStarted),
            commands: Mutex::new(None),
            resumption_token: Mutex::new(None),
            mute: Mutex::new(MuteFlags::default()),
            stopping: AtomicBool::new(false),
            end_signalled: AtomicBool::new(false),
            ended_tx,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(input_pump(Arc::clone(&inner), agent_rx));

        Self { inner }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().expect("session state poisoned")
    }

    /// Open the session and send the introductory turn. On failure the
    /// manager ends up [`SessionState::Closed`] and the error is
    /// surfaced to the caller so game start can be rejected.
    pub async fn start(&self, config: AgentSessionConfig) -> Result<(), GameError> {
        self.inner.set_state(SessionState::Opening);

        let mut fresh = config.clone();
        fresh.resumption_token = None;

        let connection = match self.inner.api.open(fresh).await {
            Ok(connection) => connection,
            Err(err) => {
                self.inner.cancel.cancel();
                self.inner.set_state(SessionState::Closed);
                return Err(GameError::Agent(err.to_string()));
            }
        };

        *self.inner.commands.lock().expect("session state poisoned") =
            Some(connection.commands.clone());
        self.inner.set_state(SessionState::Open);
        info!(room = %self.inner.room_id, "agent session open");

        let _ = connection
            .commands
            .send(ClientCommand::Text(config.first_message.clone()))
            .await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_session(inner, connection.events, config).await;
        });

        Ok(())
    }

    /// Ask the agent to wrap the story up. A no-op unless the session
    /// is currently open.
    pub async fn announce_time_expired(&self) {
        if self.state() != SessionState::Open {
            return;
        }
        if let Some(commands) = self.inner.current_commands() {
            let _ = commands
                .send(ClientCommand::Text(TIME_EXPIRED_PROMPT.to_string()))
                .await;
        }
    }

    /// Tear the session down. Idempotent: only the first caller does
    /// any work. With `wait` set, queued agent audio is given time to
    /// play out before the connection closes.
    pub async fn stop(&self, wait: bool) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.set_state(SessionState::Closing);

        if wait {
            self.drain().await;
        }

        let commands = self
            .inner
            .commands
            .lock()
            .expect("session state poisoned")
            .take();
        if let Some(commands) = commands {
            let _ = commands.send(ClientCommand::Close).await;
        }

        self.inner.cancel.cancel();
        self.inner.set_state(SessionState::Closed);
        info!(room = %self.inner.room_id, "agent session closed");
    }

    /// Update one mute source. The effective mute is the OR of both
    /// sources; the gate and the mute event fire only when the
    /// effective value actually changes. Returns the effective mute.
    pub fn set_muted(&self, muted: bool, source: MuteSource) -> bool {
        let (before, after) = {
            let mut flags = self.inner.mute.lock().expect("session state poisoned");
            let before = flags.effective();
            match source {
                MuteSource::Manual => flags.manual = muted,
                MuteSource::System => flags.system = muted,
            }
            (before, flags.effective())
        };

        if before != after {
            self.inner.arbiter.set_muted(after);
            self.inner
                .log
                .append(&self.inner.room_id, RoomEvent::agent_mute_changed(after));
            debug!(room = %self.inner.room_id, muted = after, source = ?source, "agent mute changed");
        }
        after
    }

    pub fn is_muted(&self) -> bool {
        self.inner
            .mute
            .lock()
            .expect("session state poisoned")
            .effective()
    }

    /// Wait for queued agent audio to pace out, bounded by its
    /// playback time plus a margin and capped hard.
    async fn drain(&self) {
        let queued = self.inner.arbiter.queued_audio_bytes();
        if queued < OUTPUT_FRAME_BYTES {
            return;
        }
        let playback =
            Duration::from_secs_f64(queued as f64 / BYTES_PER_SECOND as f64) + DRAIN_MARGIN;
        let deadline = Instant::now() + playback.min(DRAIN_CAP);
        debug!(room = %self.inner.room_id, queued, wait_ms = playback.min(DRAIN_CAP).as_millis() as u64, "draining agent audio");

        while Instant::now() < deadline {
            // A trailing partial frame never pages out on its own.
            if self.inner.arbiter.queued_audio_bytes() < OUTPUT_FRAME_BYTES {
                return;
            }
            sleep(DRAIN_POLL).await;
        }
    }
}

/// Forwards floor-holder input to whichever connection is currently
/// open. Survives reconnects because it re-reads the command sender
/// per message.
async fn input_pump(inner: Arc<ManagerInner>, mut agent_rx: mpsc::UnboundedReceiver<AgentInput>) {
    loop {
        let input = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            input = agent_rx.recv() => match input {
                Some(input) => input,
                None => return,
            },
        };
        let Some(commands) = inner.current_commands() else {
            continue;
        };
        let command = match input {
            AgentInput::Audio(audio) => ClientCommand::Audio(audio),
            AgentInput::EndUserTurn => ClientCommand::EndUserTurn,
        };
        if commands.send(command).await.is_err() {
            debug!(room = %inner.room_id, "dropping input, no open session");
        }
    }
}

/// Consumes server events until the session is over, resuming once per
/// drop when the backend has handed out a token.
async fn run_session(
    inner: Arc<ManagerInner>,
    mut events: mpsc::Receiver<ServerEvent>,
    base_config: AgentSessionConfig,
) {
    let end_tool = base_config.end_game_tool.name.clone();
    let mut transcript = String::new();

    loop {
        let (code, reason) = drive(&inner, &mut events, &end_tool, &mut transcript).await;

        if inner.stopping.load(Ordering::SeqCst) || code == NORMAL_CLOSE_CODE {
            return;
        }

        let token = inner
            .resumption_token
            .lock()
            .expect("session state poisoned")
            .clone();
        let Some(token) = token else {
            warn!(room = %inner.room_id, code, reason = %reason, "session lost with no resumption token");
            break;
        };

        inner.set_state(SessionState::Reconnecting);
        warn!(room = %inner.room_id, code, reason = %reason, "session dropped, resuming");
        sleep(inner.reconnect_backoff).await;

        let mut resumed = base_config.clone();
        resumed.resumption_token = Some(token);
        match inner.api.open(resumed).await {
            Ok(connection) => {
                *inner.commands.lock().expect("session state poisoned") =
                    Some(connection.commands.clone());
                inner.set_state(SessionState::Open);
                info!(room = %inner.room_id, "agent session resumed");
                let _ = connection
                    .commands
                    .send(ClientCommand::Text(CONTINUE_PROMPT.to_string()))
                    .await;
                events = connection.events;
            }
            Err(err) => {
                warn!(room = %inner.room_id, error = %err, "resume failed");
                break;
            }
        }
    }

    // Unrecoverable drop: the game cannot continue without the agent.
    inner
        .commands
        .lock()
        .expect("session state poisoned")
        .take();
    inner.set_state(SessionState::Closed);
    inner.signal_end(SessionEnd::ConnectionLost);
}

/// Dispatch server events until the connection ends. Returns the close
/// code and reason; a silently dropped channel counts as abnormal.
async fn drive(
    inner: &ManagerInner,
    events: &mut mpsc::Receiver<ServerEvent>,
    end_tool: &str,
    transcript: &mut String,
) -> (u16, String) {
    loop {
        let event = tokio::select! {
            _ = inner.cancel.cancelled() => {
                return (NORMAL_CLOSE_CODE, "cancelled".to_string());
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => return (1006, "connection dropped".to_string()),
            },
        };

        match event {
            ServerEvent::Transcript(text) => transcript.push_str(&text),
            ServerEvent::TurnComplete => {
                if !transcript.is_empty() {
                    inner.log.append(
                        &inner.room_id,
                        RoomEvent::transcription(std::mem::take(transcript)),
                    );
                }
            }
            ServerEvent::Audio(chunk) => inner.arbiter.on_agent_audio(chunk),
            ServerEvent::Interrupted => {
                inner.arbiter.on_agent_interruption();
                // The cut-off turn was never fully heard; drop its text.
                transcript.clear();
            }
            ServerEvent::ToolCall { id, name } => {
                if let Some(commands) = inner.current_commands() {
                    let _ = commands
                        .send(ClientCommand::ToolResponse {
                            id,
                            result: TOOL_ACK.to_string(),
                        })
                        .await;
                }
                if name == end_tool {
                    info!(room = %inner.room_id, "agent requested game end");
                    inner.signal_end(SessionEnd::ToolCall);
                } else {
                    warn!(room = %inner.room_id, tool = %name, "unknown tool invoked");
                }
            }
            ServerEvent::ResumptionToken(token) => {
                *inner
                    .resumption_token
                    .lock()
                    .expect("session state poisoned") = Some(token);
            }
            ServerEvent::Closed { code, reason } => return (code, reason),
        }
    }
}
