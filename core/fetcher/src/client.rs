//! Websocket session client.
//!
//! Connecting (DNS, TCP connect, websocket handshake) runs on a short-lived
//! helper thread and hands the socket back over a channel; once connected the
//! socket is non-blocking, so `poll` only ever drains what has already arrived. Packets are turned into
//! notifications in arrival order and handed back from `poll`.
//!
//! A lost connection resets per-socket state and schedules a reconnect through
//! `ReconnectBackoff`. The server sends room info on every new socket, which
//! re-drives the catalog request and slot connection upstream.

use ap_protocol::{
    decode_frame, encode_frame, message_text, ClientCommand, NetworkVersion, RoomInfo,
    ServerPacket,
};
use serde_json::{json, Map, Value};
use std::io::ErrorKind;
use std::mem;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tungstenite::{Message, WebSocket};

use crate::backoff::ReconnectBackoff;
use crate::config::ArchipelagoConfig;
use crate::error::{FetcherError, Result};
use crate::session::{Notification, SessionClient, SlotRequest};
use crate::state::ReceivedItem;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocket<TcpStream>;

#[derive(Debug, Clone, Copy)]
struct SlotInfo {
    slot: i64,
    team: i64,
}

pub struct ArchipelagoClient {
    host: String,
    port: u16,
    url: String,
    game: String,
    uuid: String,
    socket: Option<Socket>,
    /// In-flight connection attempt running on a helper thread.
    connecting: Option<Receiver<Result<Socket>>>,
    backoff: ReconnectBackoff,
    room: Option<RoomInfo>,
    slot: Option<SlotInfo>,
    slot_name: String,
    hint_points: i64,
    /// Per-game catalogs merged across data package replies.
    catalogs: Map<String, Value>,
    pending: Vec<Notification>,
}

impl ArchipelagoClient {
    pub fn new(config: &ArchipelagoConfig, uuid: String) -> Result<Self> {
        let (host, url) = endpoint(&config.host, config.port)?;
        Ok(Self {
            host,
            port: config.port,
            url,
            game: config.game.clone(),
            uuid,
            socket: None,
            connecting: None,
            backoff: ReconnectBackoff::new(),
            room: None,
            slot: None,
            slot_name: String::new(),
            hint_points: 0,
            catalogs: Map::new(),
            pending: Vec::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Starts a connection attempt on a helper thread once the backoff allows
    /// it, and picks up the finished socket on a later call.
    fn try_connect(&mut self) {
        if let Some(attempt) = self.connecting.as_ref() {
            let outcome = match attempt.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => Err(FetcherError::Socket(
                    "Connection attempt ended without a result".to_string(),
                )),
            };
            self.connecting = None;
            self.finish_connect(outcome);
            return;
        }

        if !self.backoff.ready(Instant::now()) {
            return;
        }

        let (sender, receiver) = mpsc::channel();
        let host = self.host.clone();
        let port = self.port;
        let url = self.url.clone();
        let spawned = thread::Builder::new()
            .name("ap-connect".to_string())
            .spawn(move || {
                // The client may have been dropped while connecting.
                let _ = sender.send(open_socket(&host, port, &url));
            });

        match spawned {
            Ok(_) => {
                debug!(url = %self.url, "Connection attempt started");
                self.connecting = Some(receiver);
            }
            Err(source) => self.finish_connect(Err(FetcherError::Io {
                context: "Failed to start connection thread".to_string(),
                source,
            })),
        }
    }

    fn finish_connect(&mut self, outcome: Result<Socket>) {
        match outcome {
            Ok(socket) => {
                info!(url = %self.url, "Websocket handshake complete");
                self.socket = Some(socket);
                self.backoff.reset();
                self.pending.push(Notification::SocketConnected);
            }
            Err(err) => {
                let delay = self.backoff.record_failure(Instant::now());
                debug!(
                    url = %self.url,
                    failures = self.backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Connection attempt failed"
                );
                self.pending.push(Notification::SocketError(err.to_string()));
            }
        }
    }

    fn read_available(&mut self) {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                return;
            };
            match socket.read() {
                Ok(Message::Text(text)) => self.handle_frame(&text),
                Ok(_) => {}
                Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => break,
                Err(tungstenite::Error::ConnectionClosed) => {
                    self.drop_socket(None);
                    return;
                }
                Err(err) => {
                    self.drop_socket(Some(err.to_string()));
                    return;
                }
            }
        }

        // Pongs and queued sends go out here.
        if let Some(socket) = self.socket.as_mut() {
            match socket.flush() {
                Ok(()) => {}
                Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => self.drop_socket(Some(err.to_string())),
            }
        }
    }

    fn drop_socket(&mut self, error: Option<String>) {
        self.socket = None;
        self.room = None;
        if let Some(error) = error {
            self.pending.push(Notification::SocketError(error));
        }
        if self.slot.take().is_some() {
            self.pending.push(Notification::SlotDisconnected);
        }
        self.pending.push(Notification::SocketDisconnected);

        let delay = self.backoff.record_failure(Instant::now());
        info!(
            url = %self.url,
            retry_in_ms = delay.as_millis() as u64,
            "Connection lost; reconnect scheduled"
        );
    }

    fn handle_frame(&mut self, text: &str) {
        let packets = match decode_frame(text) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(error = %err, "Ignoring frame that is not a packet array");
                return;
            }
        };

        for packet in packets {
            match packet {
                Ok(packet) => self.handle_packet(packet),
                Err(err) => warn!(error = %err, "Skipping malformed packet"),
            }
        }
    }

    fn handle_packet(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::RoomInfo(info) => {
                self.room = Some(info);
                self.pending.push(Notification::RoomInfo);
            }
            ServerPacket::Connected(connected) => {
                self.slot = Some(SlotInfo {
                    slot: connected.slot,
                    team: connected.team,
                });
                if let Some(points) = connected.hint_points {
                    self.hint_points = points;
                }
                self.pending
                    .push(Notification::SlotConnected(connected.slot_data));
                if !connected.checked_locations.is_empty() {
                    self.pending.push(Notification::LocationsChecked(
                        connected.checked_locations,
                    ));
                }
            }
            ServerPacket::ConnectionRefused { errors } => {
                self.pending.push(Notification::SlotRefused(errors));
            }
            ServerPacket::ReceivedItems { index, items } => {
                let batch = items
                    .iter()
                    .enumerate()
                    .map(|(offset, item)| ReceivedItem {
                        index: index + offset as i64,
                        item: item.item,
                        location: item.location,
                        player: item.player,
                        flags: item.flags,
                    })
                    .collect();
                self.pending.push(Notification::ItemsReceived(batch));
            }
            ServerPacket::DataPackage { data } => {
                for (game, catalog) in data.games {
                    self.catalogs.insert(game, catalog);
                }
                self.pending.push(Notification::DataPackageChanged(
                    json!({ "games": Value::Object(self.catalogs.clone()) }),
                ));
            }
            ServerPacket::RoomUpdate(update) => {
                if let Some(points) = update.hint_points {
                    self.hint_points = points;
                }
                if let Some(ids) = update.checked_locations {
                    self.pending.push(Notification::LocationsChecked(ids));
                }
            }
            ServerPacket::PrintJson { data, .. } => {
                self.pending
                    .push(Notification::PrintMessage(message_text(&data)));
            }
            ServerPacket::Retrieved { keys } => {
                self.pending.push(Notification::Retrieved(keys));
            }
            ServerPacket::Unknown => debug!("Ignoring unhandled packet"),
        }
    }

    fn send(&mut self, command: ClientCommand) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(FetcherError::NotConnected)?;
        let frame = encode_frame(&[command]).map_err(|source| FetcherError::Json {
            context: "Failed to encode command".to_string(),
            source,
        })?;

        match socket.send(Message::Text(frame)) {
            Ok(()) => Ok(()),
            // Queued; the next poll flushes it.
            Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(FetcherError::Socket(err.to_string())),
        }
    }
}

impl SessionClient for ArchipelagoClient {
    fn poll(&mut self) -> Vec<Notification> {
        if self.socket.is_none() {
            self.try_connect();
        }
        self.read_available();
        mem::take(&mut self.pending)
    }

    fn seed(&self) -> String {
        self.room
            .as_ref()
            .map(|room| room.seed_name.clone())
            .unwrap_or_default()
    }

    fn server_version(&self) -> NetworkVersion {
        self.room
            .as_ref()
            .map(|room| room.version)
            .unwrap_or_default()
    }

    fn generator_version(&self) -> NetworkVersion {
        self.room
            .as_ref()
            .map(|room| room.generator_version)
            .unwrap_or_default()
    }

    fn hint_points(&self) -> i64 {
        self.hint_points
    }

    fn hint_cost_percent(&self) -> i64 {
        self.room.as_ref().map(|room| room.hint_cost).unwrap_or(0)
    }

    fn slot_name(&self) -> String {
        self.slot_name.clone()
    }

    fn player_number(&self) -> i64 {
        self.slot.map(|slot| slot.slot).unwrap_or(-1)
    }

    fn team_number(&self) -> i64 {
        self.slot.map(|slot| slot.team).unwrap_or(-1)
    }

    fn request_data_package(&mut self, games: &[String]) -> Result<()> {
        self.send(ClientCommand::GetDataPackage {
            games: games.to_vec(),
        })
    }

    fn connect_slot(&mut self, request: &SlotRequest) -> Result<()> {
        if self.socket.is_none() {
            return Err(FetcherError::NotConnected);
        }
        if self.room.is_none() {
            return Err(FetcherError::RequestRejected(
                "room info not received yet".to_string(),
            ));
        }

        self.slot_name = request.name.clone();
        self.send(ClientCommand::Connect {
            password: request.password.clone(),
            game: self.game.clone(),
            name: request.name.clone(),
            uuid: self.uuid.clone(),
            version: request.version,
            items_handling: request.items_handling,
            tags: request.tags.clone(),
            slot_data: true,
        })
    }
}

/// Resolves, connects, and completes the handshake with blocking calls bounded
/// by timeouts, then switches the socket to non-blocking.
fn open_socket(host: &str, port: u16, url: &str) -> Result<Socket> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| FetcherError::Socket(format!("Failed to resolve {}: {}", host, err)))?;

    let mut last_error = None;
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(connected) => {
                stream = Some(connected);
                break;
            }
            Err(err) => last_error = Some(err),
        }
    }
    let stream = stream.ok_or_else(|| {
        FetcherError::Socket(match last_error {
            Some(err) => format!("Failed to connect to {}: {}", url, err),
            None => format!("No addresses found for {}", host),
        })
    })?;

    let io_error = |source: std::io::Error| FetcherError::Io {
        context: "Failed to configure socket".to_string(),
        source,
    };
    stream.set_nodelay(true).map_err(io_error)?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(io_error)?;
    stream
        .set_write_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(io_error)?;

    let (socket, _response) = tungstenite::client(url, stream)
        .map_err(|err| FetcherError::Socket(format!("Websocket handshake failed: {}", err)))?;
    socket.get_ref().set_nonblocking(true).map_err(io_error)?;
    Ok(socket)
}

/// Splits a configured host into the bare host name and the websocket URL.
/// Bare hosts and `ws://` are accepted; TLS endpoints are not.
fn endpoint(host: &str, port: u16) -> Result<(String, String)> {
    let bare = match host.split_once("://") {
        None => host,
        Some(("ws", rest)) => rest,
        Some((scheme, _)) => return Err(FetcherError::UnsupportedScheme(scheme.to_string())),
    };
    let bare = bare.trim_end_matches('/');
    Ok((bare.to_string(), format!("ws://{}:{}", bare, port)))
}
