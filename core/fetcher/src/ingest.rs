//! Maps session notifications onto state mutations.
//!
//! Each notification produces at most one `StateStore` call. Rare, high-value
//! transitions (room, slot, catalog, retrieved values) ask for an immediate
//! persist; high-volume ones (location checks, items) leave it to the
//! periodic cadence so a resync flood does not turn into a write per packet.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ArchipelagoConfig;
use crate::session::{Notification, SessionClient, SlotRequest};
use crate::state::{ReceivedItem, RoomMetadata, SlotConnection, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    /// Flush as soon as the current drain finishes.
    Now,
    /// Leave it to the periodic flush.
    Deferred,
}

pub struct EventIngestor {
    store: Arc<StateStore>,
    config: ArchipelagoConfig,
}

impl EventIngestor {
    pub fn new(store: Arc<StateStore>, config: ArchipelagoConfig) -> Self {
        Self { store, config }
    }

    pub fn handle<C: SessionClient + ?Sized>(
        &self,
        client: &mut C,
        notification: Notification,
    ) -> Persist {
        match notification {
            Notification::SocketConnected => {
                info!("Socket connected");
                Persist::Deferred
            }
            Notification::SocketError(err) => {
                warn!(error = %err, "Socket error");
                Persist::Deferred
            }
            Notification::SocketDisconnected => {
                info!("Socket disconnected");
                Persist::Deferred
            }
            Notification::RoomInfo => self.on_room_info(client),
            Notification::SlotConnected(payload) => self.on_slot_connected(client, payload),
            Notification::SlotRefused(errors) => {
                warn!(errors = ?errors, "Slot connection refused");
                Persist::Deferred
            }
            Notification::SlotDisconnected => {
                info!("Slot disconnected");
                Persist::Deferred
            }
            Notification::DataPackageChanged(payload) => self.on_data_package(payload),
            Notification::LocationsChecked(ids) => self.on_locations_checked(&ids),
            Notification::ItemsReceived(items) => self.on_items_received(&items),
            Notification::PrintMessage(text) => {
                info!(message = %text, "Server message");
                Persist::Deferred
            }
            Notification::Retrieved(values) => self.on_retrieved(values),
        }
    }

    fn on_room_info<C: SessionClient + ?Sized>(&self, client: &mut C) -> Persist {
        let room = RoomMetadata {
            room_name: String::new(),
            seed: client.seed(),
            server_version: client.server_version().to_string(),
            generator_version: client.generator_version().to_string(),
            hint_points: client.hint_points(),
            hint_cost_percent: client.hint_cost_percent(),
            hint_cost_points: 0,
        };
        info!(
            seed = %room.seed,
            server_version = %room.server_version,
            generator_version = %room.generator_version,
            "Room info received"
        );
        self.store.apply_room_info(room);

        // Both requests are fire-and-forget. A reconnect re-delivers room info,
        // which runs this sequence again.
        let games = vec![self.config.game.clone()];
        match client.request_data_package(&games) {
            Ok(()) => info!(games = ?games, "Data package requested"),
            Err(err) => warn!(error = %err, "Data package request rejected"),
        }

        let request = SlotRequest {
            name: self.config.slot_name.clone(),
            password: self.config.password.clone(),
            items_handling: self.config.items_handling,
            tags: self.config.tags.clone(),
            version: ap_protocol::CLIENT_VERSION,
        };
        match client.connect_slot(&request) {
            Ok(()) => info!(slot = %request.name, "Slot connection requested"),
            Err(err) => warn!(error = %err, slot = %request.name, "Slot connection rejected"),
        }

        Persist::Now
    }

    fn on_slot_connected<C: SessionClient + ?Sized>(
        &self,
        client: &mut C,
        payload: Value,
    ) -> Persist {
        let player_number = client.player_number();
        let team_number = client.team_number();
        let connection = SlotConnection {
            slot_name: client.slot_name(),
            game: payload
                .get("game")
                .and_then(Value::as_str)
                .map(str::to_string),
            slot_id: payload.get("slot").and_then(Value::as_i64),
            team_id: payload.get("team").and_then(Value::as_i64),
            player_number,
            team_number,
        };
        info!(
            slot = %connection.slot_name,
            game = ?connection.game,
            player_number,
            team_number,
            "Slot connected"
        );
        self.store.apply_slot_connected(connection, payload);
        Persist::Now
    }

    fn on_data_package(&self, payload: Value) -> Persist {
        let games = payload
            .get("games")
            .and_then(Value::as_object)
            .map(Map::len)
            .unwrap_or(0);
        info!(games, "Data package changed");
        self.store.apply_data_package(payload);
        Persist::Now
    }

    fn on_locations_checked(&self, ids: &[i64]) -> Persist {
        let added = self.store.record_checked_locations(ids);
        debug!(received = ids.len(), added, "Locations checked");
        Persist::Deferred
    }

    fn on_items_received(&self, items: &[ReceivedItem]) -> Persist {
        let receipt_time = Utc::now().timestamp();
        self.store.record_item_events(items, receipt_time);
        debug!(count = items.len(), receipt_time, "Items received");
        Persist::Deferred
    }

    fn on_retrieved(&self, values: Map<String, Value>) -> Persist {
        debug!(keys = values.len(), "Retrieved values");
        self.store.record_retrieved_values(values);
        Persist::Now
    }
}
