//! Durable snapshot file.
//!
//! `flush` copies the state under the store lock, then renders and writes the
//! copy with the lock released. Writes go to a sibling temp file followed by a
//! rename, so a reader polling the file sees either the previous snapshot or
//! the new one. Failures are logged and swallowed: a bad disk never stops the
//! fetcher.
//!
//! # File Format
//!
//! ```json
//! {
//!   "room": { "seed": "...", "location_count": 42, ... },
//!   "me": { "slot_name": "...", "game": "...", ... },
//!   "checked_locations": [5, 7, 9],
//!   "items": [{ "index": 1, "item": 100, "location": 5, "player": 2, "flags": 0, "time": 1700000000 }],
//!   "data_storage": { "data_package": {...}, "retrieved": {...}, "slot_data": {...} },
//!   "archipelago": { ...config section verbatim... }
//! }
//! ```

use fs_err as fs;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{FetcherError, Result};
use crate::state::{ItemEvent, RoomMetadata, SlotIdentity, Snapshot, StateStore};

#[derive(Debug, Serialize)]
pub struct SnapshotDocument<'a> {
    pub room: RoomSection<'a>,
    pub me: &'a SlotIdentity,
    pub checked_locations: &'a BTreeSet<i64>,
    pub items: &'a [ItemEvent],
    pub data_storage: DataStorage<'a>,
    #[serde(skip_serializing_if = "is_null")]
    pub archipelago: &'a Value,
}

fn is_null(value: &&Value) -> bool {
    value.is_null()
}

#[derive(Debug, Serialize)]
pub struct RoomSection<'a> {
    pub room_name: &'a str,
    pub seed: &'a str,
    pub server_version: &'a str,
    pub generator_version: &'a str,
    pub hint_points: i64,
    pub hint_cost_percent: i64,
    pub hint_cost_points: i64,
    pub location_count: usize,
}

/// Only keys that have been set are written.
#[derive(Debug, Serialize)]
pub struct DataStorage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_package: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_data: Option<&'a Value>,
}

pub fn render<'a>(snapshot: &'a Snapshot, archipelago: &'a Value) -> SnapshotDocument<'a> {
    let location_count = location_count(snapshot.data_package.as_ref(), &snapshot.me.game);
    SnapshotDocument {
        room: room_section(&snapshot.room, location_count),
        me: &snapshot.me,
        checked_locations: &snapshot.checked_locations,
        items: &snapshot.items,
        data_storage: DataStorage {
            data_package: snapshot.data_package.as_ref(),
            retrieved: (!snapshot.retrieved.is_empty()).then_some(&snapshot.retrieved),
            slot_data: snapshot.slot_data.as_ref(),
        },
        archipelago,
    }
}

fn room_section(room: &RoomMetadata, location_count: usize) -> RoomSection<'_> {
    RoomSection {
        room_name: &room.room_name,
        seed: &room.seed,
        server_version: &room.server_version,
        generator_version: &room.generator_version,
        hint_points: room.hint_points,
        hint_cost_percent: room.hint_cost_percent,
        hint_cost_points: hint_cost_points(room, location_count),
        location_count,
    }
}

/// Number of locations in the catalog of `game`, or 0 when the catalog is
/// missing. Catalogs keyed by `location_name_to_id` count the same way.
pub fn location_count(data_package: Option<&Value>, game: &str) -> usize {
    let Some(catalog) = data_package
        .and_then(|package| package.get("games"))
        .and_then(|games| games.get(game))
    else {
        return 0;
    };

    catalog
        .get("locations")
        .or_else(|| catalog.get("location_name_to_id"))
        .and_then(Value::as_object)
        .map(Map::len)
        .unwrap_or(0)
}

fn hint_cost_points(room: &RoomMetadata, location_count: usize) -> i64 {
    if room.hint_cost_percent <= 0 || location_count == 0 {
        return room.hint_cost_points;
    }
    let count = i64::try_from(location_count).unwrap_or(i64::MAX);
    (count.saturating_mul(room.hint_cost_percent) / 100).max(1)
}

pub struct SnapshotPersister {
    store: Arc<StateStore>,
    path: Option<PathBuf>,
    archipelago: Value,
}

impl SnapshotPersister {
    /// `path: None` disables persistence; `flush` then does nothing.
    pub fn new(store: Arc<StateStore>, path: Option<PathBuf>, archipelago: Value) -> Self {
        Self {
            store,
            path,
            archipelago,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns whether a snapshot was written.
    pub fn flush(&self) -> bool {
        let Some(path) = self.path.as_deref() else {
            debug!("No state file configured; skipping flush");
            return false;
        };

        let snapshot = self.store.snapshot();
        match write_snapshot(path, &render(&snapshot, &self.archipelago)) {
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    items = snapshot.items.len(),
                    checked = snapshot.checked_locations.len(),
                    "Snapshot written"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to write snapshot");
                false
            }
        }
    }
}

fn write_snapshot(path: &Path, document: &SnapshotDocument<'_>) -> Result<()> {
    let payload = serde_json::to_vec_pretty(document).map_err(|source| FetcherError::Json {
        context: "Failed to serialize snapshot".to_string(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| FetcherError::Io {
            context: "Failed to create state directory".to_string(),
            source,
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).map_err(|source| FetcherError::Io {
        context: "Failed to write temp snapshot".to_string(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| FetcherError::Io {
        context: "Failed to commit snapshot".to_string(),
        source,
    })
}

/// Periodic flush cadence, measured from the end of the previous flush so a
/// slow write cannot trigger a catch-up burst.
#[derive(Debug, Clone, Copy)]
pub struct FlushSchedule {
    interval: Duration,
    last_flush: Instant,
}

impl FlushSchedule {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_flush: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.interval
    }

    pub fn mark(&mut self, finished_at: Instant) {
        self.last_flush = finished_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ReceivedItem, SlotConnection};
    use serde_json::json;

    fn document_value(snapshot: &Snapshot) -> Value {
        serde_json::to_value(render(snapshot, &Value::Null)).expect("serialize")
    }

    fn store_for(game: &str) -> StateStore {
        let store = StateStore::new(game);
        store.apply_slot_connected(
            SlotConnection {
                slot_name: "Player".to_string(),
                game: Some(game.to_string()),
                ..SlotConnection::default()
            },
            json!({}),
        );
        store
    }

    #[test]
    fn room_fields_reach_the_document() {
        let store = StateStore::new("TestGame");
        store.apply_room_info(RoomMetadata {
            seed: "abc123".to_string(),
            server_version: "0.5.1".to_string(),
            hint_points: 10,
            ..RoomMetadata::default()
        });

        let value = document_value(&store.snapshot());
        assert_eq!(value["room"]["seed"], "abc123");
        assert_eq!(value["room"]["server_version"], "0.5.1");
        assert_eq!(value["room"]["hint_points"], 10);
        assert_eq!(value["room"]["room_name"], "");
    }

    #[test]
    fn items_keep_delivery_order_and_batch_time() {
        let store = StateStore::new("TestGame");
        store.record_item_events(
            &[
                ReceivedItem {
                    index: 1,
                    item: 100,
                    location: 5,
                    player: 2,
                    flags: 0,
                },
                ReceivedItem {
                    index: 2,
                    item: 101,
                    location: 6,
                    player: 2,
                    flags: 1,
                },
            ],
            1_700_000_000,
        );

        let value = document_value(&store.snapshot());
        let items = value["items"].as_array().expect("items array");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            json!({"index": 1, "item": 100, "location": 5, "player": 2, "flags": 0, "time": 1_700_000_000})
        );
        assert_eq!(items[1]["item"], 101);
        assert_eq!(items[1]["time"], 1_700_000_000);
    }

    #[test]
    fn checked_locations_are_deduplicated() {
        let store = StateStore::new("TestGame");
        store.record_checked_locations(&[5, 5, 7]);
        store.record_checked_locations(&[7, 9]);

        let value = document_value(&store.snapshot());
        let mut checked: Vec<i64> = value["checked_locations"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(Value::as_i64)
            .collect();
        checked.sort_unstable();
        assert_eq!(checked, vec![5, 7, 9]);
    }

    #[test]
    fn location_count_follows_current_game() {
        let locations: Map<String, Value> = (0..42)
            .map(|n| (format!("Location {}", n), json!(n)))
            .collect();
        let store = store_for("TestGame");
        store.apply_data_package(json!({"games": {"TestGame": {"locations": locations}}}));

        let value = document_value(&store.snapshot());
        assert_eq!(value["room"]["location_count"], 42);

        let other = store_for("TestGame");
        other.apply_data_package(json!({"games": {"OtherGame": {"locations": {"a": 1}}}}));
        let value = document_value(&other.snapshot());
        assert_eq!(value["room"]["location_count"], 0);
    }

    #[test]
    fn location_count_reads_name_to_id_catalogs() {
        let package = json!({"games": {"TestGame": {"location_name_to_id": {"a": 1, "b": 2}}}});
        assert_eq!(location_count(Some(&package), "TestGame"), 2);
        assert_eq!(location_count(None, "TestGame"), 0);
        assert_eq!(location_count(Some(&json!("garbage")), "TestGame"), 0);
    }

    #[test]
    fn hint_cost_points_derive_from_percent() {
        let room = RoomMetadata {
            hint_cost_percent: 10,
            ..RoomMetadata::default()
        };
        assert_eq!(hint_cost_points(&room, 42), 4);
        assert_eq!(hint_cost_points(&room, 3), 1);
        assert_eq!(hint_cost_points(&room, 0), 0);
    }

    #[test]
    fn data_storage_only_carries_set_keys() {
        let store = StateStore::new("TestGame");
        let value = document_value(&store.snapshot());
        assert_eq!(value["data_storage"], json!({}));
        assert!(value.get("archipelago").is_none());

        store.apply_data_package(json!({"games": {}}));
        let value = document_value(&store.snapshot());
        assert_eq!(value["data_storage"], json!({"data_package": {"games": {}}}));
    }

    #[test]
    fn flush_writes_snapshot_with_config_section() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("nested").join("state.json");
        let store = Arc::new(StateStore::new("TestGame"));
        store.record_checked_locations(&[1]);
        let persister = SnapshotPersister::new(
            Arc::clone(&store),
            Some(path.clone()),
            json!({"game": "TestGame"}),
        );

        assert!(persister.flush());

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["checked_locations"], json!([1]));
        assert_eq!(written["archipelago"], json!({"game": "TestGame"}));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn flush_failure_is_swallowed() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let persister = SnapshotPersister::new(
            Arc::new(StateStore::new("TestGame")),
            Some(blocker.join("state.json")),
            Value::Null,
        );

        assert!(!persister.flush());
    }

    #[test]
    fn flush_without_path_is_a_no_op() {
        let persister =
            SnapshotPersister::new(Arc::new(StateStore::new("TestGame")), None, Value::Null);
        assert!(!persister.flush());
        assert!(persister.path().is_none());
    }

    #[test]
    fn schedule_measures_from_end_of_last_flush() {
        let start = Instant::now();
        let mut schedule = FlushSchedule::new(Duration::from_secs(2), start);

        assert!(!schedule.is_due(start + Duration::from_secs(1)));
        assert!(schedule.is_due(start + Duration::from_secs(2)));

        // A flush that took three seconds pushes the next deadline out from its end.
        schedule.mark(start + Duration::from_secs(5));
        assert!(!schedule.is_due(start + Duration::from_secs(6)));
        assert!(schedule.is_due(start + Duration::from_secs(7)));
    }
}
