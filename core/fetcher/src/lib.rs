//! # ap-fetcher
//!
//! Keeps a durable JSON mirror of one multiworld session for an external
//! consumer: room metadata, slot identity, item/location catalogs, checked
//! locations, and received items.
//!
//! ## Design Principles
//!
//! - **Single driving thread**: the session is polled, notifications applied,
//!   and snapshots flushed from one loop. No async runtime.
//! - **One shared aggregate**: `StateStore` is the only shared state; every
//!   mutation and every snapshot copy is atomic under one lock.
//! - **I/O outside the lock**: snapshots are serialized and written from an
//!   owned copy.
//! - **Opaque passthrough**: server-owned payloads (slot data, catalogs,
//!   retrieved values) are stored verbatim, never validated.
//! - **Failures are logged, not fatal**: only startup (config) can stop the
//!   process.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod persist;
pub mod runner;
pub mod session;
pub mod state;

pub use client::ArchipelagoClient;
pub use config::{load_config, ArchipelagoConfig, FetcherConfig, PathsConfig};
pub use error::{FetcherError, Result};
pub use ingest::{EventIngestor, Persist};
pub use persist::{FlushSchedule, SnapshotPersister};
pub use runner::{IterationReport, Runner};
pub use session::{Notification, SessionClient, SlotRequest};
pub use state::{
    ItemEvent, ReceivedItem, RoomMetadata, SlotConnection, SlotIdentity, Snapshot, StateStore,
};
