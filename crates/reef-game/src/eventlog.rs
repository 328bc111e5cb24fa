//! Per-room, append-only, bounded event log with live fan-out.
//!
//! Producers append synchronously; id assignment, history storage, and
//! subscriber notification happen under one lock so a subscriber that
//! replays history and then tails the live stream sees every event
//! exactly once and in order. History is bounded: once a room exceeds
//! the capacity the oldest entries are silently dropped (accepted
//! data-loss policy for long-gone clients, not an error).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use reef_common::{EventLogEntry, RoomEvent, RoomId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default retained entries per room.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

struct Subscriber {
    tx: mpsc::UnboundedSender<EventLogEntry>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RoomLog {
    next_id: u64,
    entries: VecDeque<EventLogEntry>,
    subscribers: Vec<Subscriber>,
}

/// Ordered, replayable record of what happened in each room.
///
/// One log per room, created lazily on first append or subscription and
/// kept for the life of the process.
pub struct EventLog {
    capacity: usize,
    rooms: Mutex<HashMap<RoomId, RoomLog>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Append an event, returning its id (strictly increasing per room,
    /// starting at 1). Live subscribers of the room are notified before
    /// this returns, in append order.
    pub fn append(&self, room_id: &RoomId, event: RoomEvent) -> u64 {
        let mut rooms = self.rooms.lock().expect("event log poisoned");
        let room = rooms.entry(room_id.clone()).or_default();

        room.next_id += 1;
        let entry = EventLogEntry {
            id: room.next_id,
            event,
        };

        room.entries.push_back(entry.clone());
        if room.entries.len() > self.capacity {
            room.entries.pop_front();
        }

        debug!(room = %room_id, id = entry.id, "event appended");

        room.subscribers
            .retain(|sub| !sub.cancel.is_cancelled() && sub.tx.send(entry.clone()).is_ok());

        entry.id
    }

    /// Retained entries with id greater than `since` (all retained
    /// entries when `since` is `None`), ascending. Empty for unknown
    /// rooms.
    pub fn history(&self, room_id: &RoomId, since: Option<u64>) -> Vec<EventLogEntry> {
        let rooms = self.rooms.lock().expect("event log poisoned");
        let Some(room) = rooms.get(room_id) else {
            return Vec::new();
        };
        match since {
            None => room.entries.iter().cloned().collect(),
            Some(since) => room
                .entries
                .iter()
                .filter(|e| e.id > since)
                .cloned()
                .collect(),
        }
    }

    /// Live stream of future appends for one room. Delivery stops when
    /// `cancel` fires or the receiver is dropped.
    pub fn subscribe(
        &self,
        room_id: &RoomId,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<EventLogEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock().expect("event log poisoned");
        rooms
            .entry(room_id.clone())
            .or_default()
            .subscribers
            .push(Subscriber { tx, cancel });
        rx
    }

    /// History replay plus live subscription in one atomic step: no
    /// event appended between the two can be missed or duplicated.
    /// This is the reconnect/catch-up entry point for the RPC surface.
    pub fn tail(
        &self,
        room_id: &RoomId,
        since: Option<u64>,
        cancel: CancellationToken,
    ) -> (Vec<EventLogEntry>, mpsc::UnboundedReceiver<EventLogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock().expect("event log poisoned");
        let room = rooms.entry(room_id.clone()).or_default();

        let history: Vec<EventLogEntry> = match since {
            None => room.entries.iter().cloned().collect(),
            Some(since) => room
                .entries
                .iter()
                .filter(|e| e.id > since)
                .cloned()
                .collect(),
        };

        room.subscribers.push(Subscriber { tx, cancel });
        (history, rx)
    }

    /// Drop a room's log and disconnect its subscribers. Called when
    /// the room itself is removed; ids restart at 1 if the same room
    /// name is ever reused.
    pub fn remove_room(&self, room_id: &RoomId) {
        let mut rooms = self.rooms.lock().expect("event log poisoned");
        rooms.remove(room_id);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
