//! Canonical session state.
//!
//! One mutex guards every field. Each mutating call takes the lock once and
//! finishes before releasing it, and `snapshot` clones the whole state under
//! the same lock, so a snapshot never mixes pre- and post-mutation values.
//! Serialization and disk I/O happen on the clone, outside the lock.
//!
//! Merge policy per field category:
//! - room metadata, slot identity, data package: replaced wholesale
//! - checked locations: set union, never shrinks
//! - item events: append-only, delivery order
//! - retrieved values: last write wins per key

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomMetadata {
    pub room_name: String,
    pub seed: String,
    pub server_version: String,
    pub generator_version: String,
    pub hint_points: i64,
    pub hint_cost_percent: i64,
    pub hint_cost_points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotIdentity {
    pub slot_name: String,
    pub game: String,
    pub slot_id: i64,
    pub team_id: i64,
    pub player_number: i64,
    pub team_number: i64,
}

impl Default for SlotIdentity {
    fn default() -> Self {
        Self {
            slot_name: String::new(),
            game: String::new(),
            slot_id: -1,
            team_id: -1,
            player_number: -1,
            team_number: -1,
        }
    }
}

/// Identity fields as read from a slot-connected notification. Fields the
/// payload did not carry are `None` and get defaults when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotConnection {
    pub slot_name: String,
    pub game: Option<String>,
    pub slot_id: Option<i64>,
    pub team_id: Option<i64>,
    pub player_number: i64,
    pub team_number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ItemEvent {
    pub index: i64,
    pub item: i64,
    pub location: i64,
    pub player: i64,
    pub flags: u32,
    /// Unix seconds at which the batch carrying this item was received.
    pub time: i64,
}

/// An item as delivered by the session, before it is stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedItem {
    pub index: i64,
    pub item: i64,
    pub location: i64,
    pub player: i64,
    pub flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetcherState {
    pub room: RoomMetadata,
    pub me: SlotIdentity,
    pub checked_locations: BTreeSet<i64>,
    pub items: Vec<ItemEvent>,
    pub data_package: Option<Value>,
    pub retrieved: Map<String, Value>,
    /// Raw slot-connected payload, kept verbatim.
    pub slot_data: Option<Value>,
}

/// Point-in-time copy of the full state. Owned, so nothing the store does
/// afterwards can change it.
pub type Snapshot = FetcherState;

pub struct StateStore {
    target_game: String,
    state: Mutex<FetcherState>,
}

impl StateStore {
    /// `target_game` is the configured game, used when a slot payload does
    /// not name one.
    pub fn new(target_game: impl Into<String>) -> Self {
        Self {
            target_game: target_game.into(),
            state: Mutex::new(FetcherState::default()),
        }
    }

    // Every mutation is a single assignment or collection op, so a poisoned
    // lock still guards a whole state.
    fn lock(&self) -> MutexGuard<'_, FetcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply_room_info(&self, room: RoomMetadata) {
        self.lock().room = room;
    }

    pub fn apply_slot_connected(&self, connection: SlotConnection, raw_payload: Value) {
        let identity = SlotIdentity {
            slot_name: connection.slot_name,
            game: connection
                .game
                .unwrap_or_else(|| self.target_game.clone()),
            slot_id: connection.slot_id.unwrap_or(-1),
            team_id: connection.team_id.unwrap_or(-1),
            player_number: connection.player_number,
            team_number: connection.team_number,
        };

        let mut state = self.lock();
        state.me = identity;
        state.slot_data = Some(raw_payload);
    }

    pub fn apply_data_package(&self, payload: Value) {
        self.lock().data_package = Some(payload);
    }

    /// Returns how many ids were not already present.
    pub fn record_checked_locations(&self, ids: &[i64]) -> usize {
        let mut state = self.lock();
        ids.iter()
            .filter(|id| state.checked_locations.insert(**id))
            .count()
    }

    /// Appends the batch in order, every event stamped with `receipt_time`.
    pub fn record_item_events(&self, items: &[ReceivedItem], receipt_time: i64) {
        let events = items.iter().map(|item| ItemEvent {
            index: item.index,
            item: item.item,
            location: item.location,
            player: item.player,
            flags: item.flags,
            time: receipt_time,
        });
        self.lock().items.extend(events);
    }

    pub fn record_retrieved_values(&self, values: Map<String, Value>) {
        let mut state = self.lock();
        for (key, value) in values {
            state.retrieved.insert(key, value);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }
}
