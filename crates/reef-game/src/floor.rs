//! Voice floor arbitration.
//!
//! N peers talk into one AI conversation that is tuned for a single
//! speaker, so exactly one peer may hold the floor at a time: the first
//! to start speaking while the floor is free holds it until their own
//! speech ends or they disconnect. Only the holder's audio is forwarded
//! to the agent, and only while the agent is not muted.
//!
//! The arbiter also carries agent speech the other way: inbound chunks
//! are buffered and emitted to the room transport in fixed-duration
//! frames paced to real playback time, so downstream peers never
//! receive a faster-than-real-time burst they would truncate. An
//! interruption from the backend flushes the buffer and opens a short
//! cooldown during which late chunks of the interrupted utterance are
//! discarded.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reef_common::{PeerId, RoomEvent, RoomId};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::eventlog::EventLog;

/// PCM16 mono.
pub const SAMPLE_RATE: u32 = 16_000;
pub const BYTES_PER_SECOND: usize = 32_000;
/// Outbound frame: 1000 samples, 62.5 ms of playback.
pub const OUTPUT_FRAME_BYTES: usize = 2_000;
pub const OUTPUT_FRAME_INTERVAL: Duration = Duration::from_micros(62_500);
/// Window after an interruption during which stale agent audio is
/// still arriving from the backend and must be dropped.
pub const INTERRUPT_COOLDOWN: Duration = Duration::from_millis(250);

/// One span of classified audio from a peer, produced by the
/// transport-side voice activity detector.
#[derive(Debug, Clone)]
pub struct VoiceActivitySegment {
    pub peer_id: PeerId,
    pub is_speech_active: bool,
    pub audio: Vec<u8>,
    pub duration_ms: u32,
}

/// Arbiter output toward the agent session.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInput {
    /// Floor holder audio to forward to the backend.
    Audio(Vec<u8>),
    /// The floor holder stopped speaking.
    EndUserTurn,
}

/// Arbiter output toward the room transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomOutput {
    /// One paced frame of agent speech.
    Frame(Vec<u8>),
    /// Stop whatever agent audio is currently playing.
    Interrupt,
}

struct FloorState {
    peers: HashSet<PeerId>,
    current_speaker: Option<PeerId>,
    muted: bool,
    out_buffer: VecDeque<u8>,
    cooldown_until: Option<Instant>,
}

struct ArbiterInner {
    room_id: RoomId,
    log: Arc<EventLog>,
    agent_tx: mpsc::UnboundedSender<AgentInput>,
    room_tx: broadcast::Sender<RoomOutput>,
    state: Mutex<FloorState>,
}

/// Single-speaker floor arbiter for one room.
#[derive(Clone)]
pub struct FloorArbiter {
    inner: Arc<ArbiterInner>,
}

impl FloorArbiter {
    /// Create the arbiter and spawn its pacing task; the task stops
    /// when `cancel` fires.
    pub fn new(
        room_id: RoomId,
        log: Arc<EventLog>,
        agent_tx: mpsc::UnboundedSender<AgentInput>,
        room_tx: broadcast::Sender<RoomOutput>,
        cancel: CancellationToken,
    ) -> Self {
        let arbiter = Self {
            inner: Arc::new(ArbiterInner {
                room_id,
                log,
                agent_tx,
                room_tx,
                state: Mutex::new(FloorState {
                    peers: HashSet::new(),
                    current_speaker: None,
                    muted: false,
                    out_buffer: VecDeque::new(),
                    cooldown_until: None,
                }),
            }),
        };

        let pacer = arbiter.clone();
        tokio::spawn(async move {
            pacer.pacing_loop(cancel).await;
        });

        arbiter
    }

    /// Register a peer's activity stream.
    pub fn add_peer(&self, peer_id: PeerId) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        if state.peers.insert(peer_id.clone()) {
            debug!(room = %self.inner.room_id, peer = %peer_id, "peer added to floor");
        }
    }

    /// Deregister a peer; a disconnecting floor holder releases the
    /// floor immediately.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        state.peers.remove(peer_id);
        if state.current_speaker.as_ref() == Some(peer_id) {
            state.current_speaker = None;
            self.inner
                .log
                .append(&self.inner.room_id, RoomEvent::floor_changed(None));
            debug!(room = %self.inner.room_id, peer = %peer_id, "floor released on disconnect");
        }
    }

    /// Handle one voice-activity segment from a registered peer.
    pub fn on_voice_activity(&self, segment: VoiceActivitySegment) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        if !state.peers.contains(&segment.peer_id) {
            return;
        }

        if segment.is_speech_active && state.current_speaker.is_none() {
            state.current_speaker = Some(segment.peer_id.clone());
            self.inner.log.append(
                &self.inner.room_id,
                RoomEvent::floor_changed(Some(segment.peer_id.clone())),
            );
            debug!(room = %self.inner.room_id, peer = %segment.peer_id, "floor acquired");
        }

        let holds_floor = state.current_speaker.as_ref() == Some(&segment.peer_id);

        // The segment that carries speech-end still holds the tail of
        // the utterance; forward it before signalling end-of-turn so
        // the agent hears the last word inside the turn.
        if holds_floor && !state.muted && !segment.audio.is_empty() {
            let _ = self.inner.agent_tx.send(AgentInput::Audio(segment.audio));
        }

        if !segment.is_speech_active && holds_floor {
            state.current_speaker = None;
            self.inner
                .log
                .append(&self.inner.room_id, RoomEvent::floor_changed(None));
            let _ = self.inner.agent_tx.send(AgentInput::EndUserTurn);
            debug!(room = %self.inner.room_id, peer = %segment.peer_id, "floor released");
        }
    }

    /// Gate audio forwarding. Muting while a peer holds the floor does
    /// not release the floor.
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        state.muted = muted;
    }

    /// Buffer agent speech for paced emission. Chunks arriving inside
    /// the post-interruption cooldown belong to the interrupted
    /// utterance and are dropped.
    pub fn on_agent_audio(&self, chunk: Vec<u8>) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                trace!(room = %self.inner.room_id, len = chunk.len(), "discarding post-interrupt chunk");
                return;
            }
            state.cooldown_until = None;
        }
        state.out_buffer.extend(chunk);
    }

    /// The backend reported its speech was interrupted: flush queued
    /// output, tell the transport to cut playback, and start the
    /// cooldown window.
    pub fn on_agent_interruption(&self) {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        state.out_buffer.clear();
        state.cooldown_until = Some(Instant::now() + INTERRUPT_COOLDOWN);
        let _ = self.inner.room_tx.send(RoomOutput::Interrupt);
        debug!(room = %self.inner.room_id, "agent interrupted, output flushed");
    }

    /// Current floor holder, if any.
    pub fn current_speaker(&self) -> Option<PeerId> {
        self.inner
            .state
            .lock()
            .expect("floor state poisoned")
            .current_speaker
            .clone()
    }

    /// Agent audio queued but not yet emitted, used to size the drain
    /// wait before teardown.
    pub fn queued_audio_bytes(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("floor state poisoned")
            .out_buffer
            .len()
    }

    /// Pop one full output frame if enough audio is buffered. A
    /// trailing partial frame stays queued until more audio arrives.
    fn take_frame(&self) -> Option<Vec<u8>> {
        let mut state = self.inner.state.lock().expect("floor state poisoned");
        if state.out_buffer.len() < OUTPUT_FRAME_BYTES {
            return None;
        }
        Some(state.out_buffer.drain(..OUTPUT_FRAME_BYTES).collect())
    }

    /// Emits at most one frame per interval so the room never receives
    /// audio faster than real playback time.
    async fn pacing_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(OUTPUT_FRAME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(room = %self.inner.room_id, "pacing stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Some(frame) = self.take_frame() {
                        let _ = self.inner.room_tx.send(RoomOutput::Frame(frame));
                    }
                }
            }
        }
    }
}
