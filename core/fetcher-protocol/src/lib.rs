//! Wire types for the multiworld server protocol spoken by ap-fetcher.
//!
//! This crate is shared by the fetcher and its tests to prevent schema drift.
//! Only the fields the fetcher reads are typed; anything else the server sends
//! is ignored on decode. Payloads whose schema belongs to the server (slot data,
//! catalogs, data storage values) stay as opaque `serde_json::Value` trees.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol version announced in `Connect`.
pub const CLIENT_VERSION: NetworkVersion = NetworkVersion {
    major: 0,
    minor: 5,
    build: 1,
};

/// Receive items from other worlds, from our own world, and our starting inventory.
pub const ITEMS_HANDLING_ALL: u32 = 0b111;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkVersion {
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub build: u32,
}

// The server expects the class marker on every version object it receives.
impl Serialize for NetworkVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Version", 4)?;
        state.serialize_field("major", &self.major)?;
        state.serialize_field("minor", &self.minor)?;
        state.serialize_field("build", &self.build)?;
        state.serialize_field("class", "Version")?;
        state.end()
    }
}

impl fmt::Display for NetworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkItem {
    pub item: i64,
    pub location: i64,
    pub player: i64,
    #[serde(default)]
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd")]
pub enum ClientCommand {
    Connect {
        password: String,
        game: String,
        name: String,
        uuid: String,
        version: NetworkVersion,
        items_handling: u32,
        tags: Vec<String>,
        slot_data: bool,
    },
    GetDataPackage {
        games: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd")]
pub enum ServerPacket {
    RoomInfo(RoomInfo),
    Connected(Connected),
    ConnectionRefused {
        #[serde(default)]
        errors: Vec<String>,
    },
    ReceivedItems {
        index: i64,
        #[serde(default)]
        items: Vec<NetworkItem>,
    },
    DataPackage {
        data: DataPackageData,
    },
    RoomUpdate(RoomUpdate),
    #[serde(rename = "PrintJSON")]
    PrintJson {
        #[serde(default)]
        data: Vec<MessagePart>,
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
    Retrieved {
        #[serde(default)]
        keys: Map<String, Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub version: NetworkVersion,
    #[serde(default)]
    pub generator_version: NetworkVersion,
    #[serde(default)]
    pub seed_name: String,
    /// Percentage of the slot's locations a hint costs.
    #[serde(default)]
    pub hint_cost: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Connected {
    pub team: i64,
    pub slot: i64,
    #[serde(default)]
    pub checked_locations: Vec<i64>,
    #[serde(default)]
    pub hint_points: Option<i64>,
    #[serde(default)]
    pub slot_data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomUpdate {
    #[serde(default)]
    pub checked_locations: Option<Vec<i64>>,
    #[serde(default)]
    pub hint_points: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPackageData {
    /// Game name -> catalog object, kept opaque.
    #[serde(default)]
    pub games: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePart {
    #[serde(default)]
    pub text: String,
}

/// One decoded frame: every packet is decoded on its own so a single
/// malformed packet does not take the rest of the frame down with it.
pub type DecodedFrame = Vec<Result<ServerPacket, serde_json::Error>>;

/// Decodes a text frame. The outer error means the frame was not a JSON array.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, serde_json::Error> {
    let raw: Vec<Value> = serde_json::from_str(text)?;
    Ok(raw.into_iter().map(serde_json::from_value).collect())
}

pub fn encode_frame(commands: &[ClientCommand]) -> Result<String, serde_json::Error> {
    serde_json::to_string(commands)
}

/// Joins the text parts of a `PrintJSON` message.
pub fn message_text(parts: &[MessagePart]) -> String {
    parts.iter().map(|part| part.text.as_str()).collect()
}
