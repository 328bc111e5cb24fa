//! Client-facing wire protocol, JSON text frames plus raw binary audio.
//!
//! The first message on a connection must be `joinRoom`; everything
//! else is rejected until the client has an identity. Agent speech
//! travels as binary frames (PCM16 mono 16 kHz) once the client has
//! sent `subscribeAudio`.

use reef_common::EventLogEntry;
use reef_game::StorySummary;
use serde::{Deserialize, Serialize};

/// Messages a client sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join (and lazily create) a room. Must come first.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, name: String },

    /// List the story catalog. Fronts only, never solutions.
    GetStories,

    /// Pick the story for the next game.
    #[serde(rename_all = "camelCase")]
    SelectStory { story_id: u32 },

    StartGame,

    StopGame,

    /// Toggle the narrator's player-facing mute.
    MuteAgent { muted: bool },

    /// Replay room events after `last_event_id` and stream new ones.
    #[serde(rename_all = "camelCase")]
    Subscribe { last_event_id: Option<u64> },

    /// Start receiving the narrator's audio as binary frames.
    SubscribeAudio,

    /// One voice-activity segment from this client's capture pipeline.
    #[serde(rename_all = "camelCase")]
    VoiceActivity {
        is_speech_active: bool,
        /// Base64 PCM16 mono 16 kHz.
        #[serde(default)]
        audio: String,
        #[serde(default)]
        duration_ms: u32,
    },
}

/// Messages the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Joined { room_id: String, peer_id: String },

    Stories { stories: Vec<StorySummary> },

    /// One event log entry, replayed or live.
    Event { id: u64, event: reef_common::RoomEvent },

    /// Playback of the narrator's current utterance must stop now.
    AgentInterrupted,

    Ack { message: String },

    Error { message: String },
}

impl ServerMessage {
    pub fn event(entry: EventLogEntry) -> Self {
        Self::Event {
            id: entry.id,
            event: entry.event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"joinRoom","roomId":"r1","name":"alice"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::JoinRoom { room_id, name } if room_id == "r1" && name == "alice"
        ));
    }

    #[test]
    fn subscribe_without_cursor_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Subscribe { last_event_id: None }
        ));
    }

    #[test]
    fn voice_activity_defaults_optional_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"voiceActivity","isSpeechActive":true}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::VoiceActivity { is_speech_active: true, ref audio, duration_ms: 0 }
                if audio.is_empty()
        ));
    }

    #[test]
    fn event_serializes_with_camel_case_tag() {
        let msg = ServerMessage::event(EventLogEntry {
            id: 3,
            event: reef_common::RoomEvent::game_started(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["id"], 3);
        assert_eq!(json["event"]["type"], "gameStarted");
    }

    #[test]
    fn unknown_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"formatDisk"}"#).is_err());
    }
}
