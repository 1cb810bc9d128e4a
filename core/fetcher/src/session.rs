//! Contract between the fetcher and a live multiworld session.
//!
//! Notifications are drained synchronously: `poll` returns everything that
//! arrived since the previous call, in delivery order, and the caller handles
//! each one on its own thread before polling again. Requests never block;
//! an `Err` means the request was not sent.

use ap_protocol::NetworkVersion;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::state::ReceivedItem;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SocketConnected,
    SocketError(String),
    SocketDisconnected,
    /// Room info arrived; details are read through the client accessors.
    RoomInfo,
    /// Slot connection accepted. Carries the raw slot payload.
    SlotConnected(Value),
    SlotRefused(Vec<String>),
    SlotDisconnected,
    DataPackageChanged(Value),
    LocationsChecked(Vec<i64>),
    ItemsReceived(Vec<ReceivedItem>),
    PrintMessage(String),
    Retrieved(Map<String, Value>),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SocketConnected => "socket_connected",
            Notification::SocketError(_) => "socket_error",
            Notification::SocketDisconnected => "socket_disconnected",
            Notification::RoomInfo => "room_info",
            Notification::SlotConnected(_) => "slot_connected",
            Notification::SlotRefused(_) => "slot_refused",
            Notification::SlotDisconnected => "slot_disconnected",
            Notification::DataPackageChanged(_) => "data_package_changed",
            Notification::LocationsChecked(_) => "locations_checked",
            Notification::ItemsReceived(_) => "items_received",
            Notification::PrintMessage(_) => "print_message",
            Notification::Retrieved(_) => "retrieved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub name: String,
    pub password: String,
    pub items_handling: u32,
    pub tags: Vec<String>,
    pub version: NetworkVersion,
}

pub trait SessionClient {
    fn poll(&mut self) -> Vec<Notification>;

    fn seed(&self) -> String;
    fn server_version(&self) -> NetworkVersion;
    fn generator_version(&self) -> NetworkVersion;
    fn hint_points(&self) -> i64;
    fn hint_cost_percent(&self) -> i64;
    fn slot_name(&self) -> String;
    fn player_number(&self) -> i64;
    fn team_number(&self) -> i64;

    fn request_data_package(&mut self, games: &[String]) -> Result<()>;
    fn connect_slot(&mut self, request: &SlotRequest) -> Result<()>;
}
