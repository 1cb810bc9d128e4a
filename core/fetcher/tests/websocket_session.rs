use ap_fetcher::{
    ArchipelagoClient, ArchipelagoConfig, EventIngestor, Runner, SessionClient,
    SnapshotPersister, StateStore,
};
use serde_json::{json, Value};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tungstenite::{Message, WebSocket};

const ROOM_INFO: &str = r#"[{"cmd":"RoomInfo",
    "version":{"major":0,"minor":5,"build":1,"class":"Version"},
    "generator_version":{"major":0,"minor":5,"build":0,"class":"Version"},
    "seed_name":"abc123","hint_cost":10,"location_check_points":1,
    "password":false,"tags":["AP"],"games":["TestGame"]}]"#;

const SESSION: &str = r#"[
    {"cmd":"DataPackage","data":{"games":{"TestGame":{"location_name_to_id":{"a":1,"b":2,"c":3}}}}},
    {"cmd":"Connected","team":0,"slot":1,"players":[],"missing_locations":[3],
     "checked_locations":[1,2],"slot_data":{"goal":0},"hint_points":6},
    {"cmd":"ReceivedItems","index":0,"items":[
        {"item":100,"location":1,"player":1,"flags":0,"class":"NetworkItem"},
        {"item":101,"location":2,"player":1,"flags":1,"class":"NetworkItem"}]}
]"#;

const CONNECTED: &str = r#"[{"cmd":"Connected","team":0,"slot":1,
    "checked_locations":[1],"slot_data":{"goal":0}}]"#;

/// Accepts a socket, sends room info, and collects the two commands the
/// client answers with.
fn open_session(listener: &TcpListener) -> (WebSocket<TcpStream>, Vec<Value>) {
    let (stream, _) = listener.accept().expect("accept");
    let mut socket = tungstenite::accept(stream).expect("websocket accept");
    socket
        .send(Message::Text(ROOM_INFO.to_string()))
        .expect("send room info");

    let mut commands = Vec::new();
    while commands.len() < 2 {
        if let Message::Text(text) = socket.read().expect("read command") {
            let frame: Vec<Value> = serde_json::from_str(&text).expect("command frame");
            commands.extend(frame);
        }
    }
    (socket, commands)
}

/// Serves one client, then plays back a short session.
fn spawn_server(listener: TcpListener) -> thread::JoinHandle<Vec<Value>> {
    thread::spawn(move || {
        let (mut socket, commands) = open_session(&listener);
        socket
            .send(Message::Text(SESSION.to_string()))
            .expect("send session");
        commands
    })
}

/// Closes the first socket right after the slot connects, then serves a
/// second one. Returns the commands received on each socket.
fn spawn_closing_server(listener: TcpListener) -> thread::JoinHandle<Vec<Vec<Value>>> {
    thread::spawn(move || {
        let (mut socket, first) = open_session(&listener);
        socket
            .send(Message::Text(CONNECTED.to_string()))
            .expect("send connected");
        socket.close(None).expect("close");
        while socket.read().is_ok() {}
        drop(socket);

        let (_socket, second) = open_session(&listener);
        vec![first, second]
    })
}

fn session_runner(
    port: u16,
    state_path: &Path,
) -> (Arc<StateStore>, Runner<ArchipelagoClient>) {
    let config = ArchipelagoConfig {
        host: "127.0.0.1".to_string(),
        port,
        game: "TestGame".to_string(),
        slot_name: "Player".to_string(),
        ..ArchipelagoConfig::default()
    };

    let client = ArchipelagoClient::new(&config, "test-uuid".to_string()).expect("client");
    let store = Arc::new(StateStore::new(config.game.clone()));
    let ingestor = EventIngestor::new(Arc::clone(&store), config);
    let persister = SnapshotPersister::new(
        Arc::clone(&store),
        Some(state_path.to_path_buf()),
        json!({"game": "TestGame"}),
    );
    let runner = Runner::new(client, ingestor, persister, Duration::from_secs(3600));
    (store, runner)
}

#[test]
fn live_session_reaches_the_state_file() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let server = spawn_server(listener);

    let temp_dir = TempDir::new().expect("temp dir");
    let state_path = temp_dir.path().join("state.json");
    let (store, mut runner) = session_runner(port, &state_path);

    let deadline = Instant::now() + Duration::from_secs(10);
    while store.snapshot().items.len() < 2 {
        assert!(Instant::now() < deadline, "timed out waiting for session");
        runner.run_iteration();
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(runner.client().hint_points(), 6);

    let commands = server.join().expect("server thread");
    assert_eq!(commands[0]["cmd"], "GetDataPackage");
    assert_eq!(commands[0]["games"], json!(["TestGame"]));
    assert_eq!(commands[1]["cmd"], "Connect");
    assert_eq!(commands[1]["name"], "Player");
    assert_eq!(commands[1]["uuid"], "test-uuid");
    assert_eq!(commands[1]["items_handling"], 7);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.room.seed, "abc123");
    assert_eq!(snapshot.room.server_version, "0.5.1");
    assert_eq!(snapshot.me.player_number, 1);
    assert_eq!(snapshot.me.slot_id, -1);
    assert_eq!(snapshot.me.game, "TestGame");
    assert_eq!(snapshot.checked_locations.len(), 2);
    assert_eq!(snapshot.items[0].index, 0);
    assert_eq!(snapshot.items[1].index, 1);

    // Slot connection and catalog flushed on demand.
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&state_path).expect("state file"))
            .expect("json");
    assert_eq!(written["room"]["location_count"], 3);
    assert_eq!(written["me"]["slot_name"], "Player");
}

#[test]
fn lost_socket_reconnects_and_repeats_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let server = spawn_closing_server(listener);

    let temp_dir = TempDir::new().expect("temp dir");
    let (store, mut runner) = session_runner(port, &temp_dir.path().join("state.json"));

    // The first reconnect waits out one backoff step.
    let deadline = Instant::now() + Duration::from_secs(20);
    while !server.is_finished() {
        assert!(Instant::now() < deadline, "timed out waiting for reconnect");
        runner.run_iteration();
        thread::sleep(Duration::from_millis(10));
    }

    let sessions = server.join().expect("server thread");
    assert_eq!(sessions.len(), 2);
    for commands in &sessions {
        assert_eq!(commands[0]["cmd"], "GetDataPackage");
        assert_eq!(commands[1]["cmd"], "Connect");
        assert_eq!(commands[1]["name"], "Player");
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.room.seed, "abc123");
    assert_eq!(snapshot.me.player_number, 1);
    assert_eq!(snapshot.me.slot_id, -1);
    assert!(snapshot.checked_locations.contains(&1));
}

#[test]
fn unreachable_server_reports_socket_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let config = ArchipelagoConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ArchipelagoConfig::default()
    };
    let mut client = ArchipelagoClient::new(&config, String::new()).expect("client");

    // The attempt runs off the polling thread; poll until it reports back.
    let deadline = Instant::now() + Duration::from_secs(10);
    let notifications = loop {
        let notifications = client.poll();
        if !notifications.is_empty() {
            break notifications;
        }
        assert!(Instant::now() < deadline, "timed out waiting for attempt");
        thread::sleep(Duration::from_millis(10));
    };
    assert!(matches!(
        notifications.as_slice(),
        [ap_fetcher::Notification::SocketError(_)]
    ));
    assert!(!client.is_connected());

    // Backoff holds the next attempt back.
    assert!(client.poll().is_empty());
}
