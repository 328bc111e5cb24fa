//! Room event model: everything players can observe about a game,
//! tagged for JSON delivery to web clients.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::id::PeerId;

/// Milliseconds since the Unix epoch, the timestamp carried by every event.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A game event observable by every player in a room.
///
/// Immutable once appended to the event log. The `type` tag and field
/// names match what the web client consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    PlayerJoined {
        name: String,
        timestamp: u64,
    },
    PlayerLeft {
        name: String,
        timestamp: u64,
    },
    GameStarted {
        timestamp: u64,
    },
    GameEnded {
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    StorySelected {
        story_id: u32,
        story_title: String,
        user_name: String,
        timestamp: u64,
    },
    Transcription {
        text: String,
        timestamp: u64,
    },
    AgentMuteChanged {
        muted: bool,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    FloorChanged {
        peer_id: Option<PeerId>,
        timestamp: u64,
    },
}

impl RoomEvent {
    pub fn player_joined(name: impl Into<String>) -> Self {
        Self::PlayerJoined {
            name: name.into(),
            timestamp: now_ms(),
        }
    }

    pub fn player_left(name: impl Into<String>) -> Self {
        Self::PlayerLeft {
            name: name.into(),
            timestamp: now_ms(),
        }
    }

    pub fn game_started() -> Self {
        Self::GameStarted { timestamp: now_ms() }
    }

    pub fn game_ended() -> Self {
        Self::GameEnded { timestamp: now_ms() }
    }

    pub fn story_selected(
        story_id: u32,
        story_title: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self::StorySelected {
            story_id,
            story_title: story_title.into(),
            user_name: user_name.into(),
            timestamp: now_ms(),
        }
    }

    pub fn transcription(text: impl Into<String>) -> Self {
        Self::Transcription {
            text: text.into(),
            timestamp: now_ms(),
        }
    }

    pub fn agent_mute_changed(muted: bool) -> Self {
        Self::AgentMuteChanged {
            muted,
            timestamp: now_ms(),
        }
    }

    pub fn floor_changed(peer_id: Option<PeerId>) -> Self {
        Self::FloorChanged {
            peer_id,
            timestamp: now_ms(),
        }
    }
}

/// One entry of a room's event log. Ids are strictly increasing per
/// room starting at 1 and are exposed to clients so a reconnecting
/// subscriber can resume from its last-seen id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: u64,
    pub event: RoomEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = RoomEvent::player_joined("alice");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "playerJoined");
        assert_eq!(json["name"], "alice");
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn story_selected_uses_camel_case_fields() {
        let event = RoomEvent::story_selected(3, "The Lighthouse", "bob");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "storySelected");
        assert_eq!(json["storyId"], 3);
        assert_eq!(json["storyTitle"], "The Lighthouse");
        assert_eq!(json["userName"], "bob");
    }

    #[test]
    fn floor_changed_with_no_holder_is_null() {
        let event = RoomEvent::floor_changed(None);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["peerId"].is_null());
    }

    #[test]
    fn entry_round_trips() {
        let entry = EventLogEntry {
            id: 7,
            event: RoomEvent::agent_mute_changed(true),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
