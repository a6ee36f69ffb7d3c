use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use typerace_core::protocol::{RaceLogEntry, RoomStatus};
use typerace_core::{DnfXpPolicy, PromptPool, RaceRules};
use typerace_server::config::{RoomConfig, ServerConfig};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

const PROMPT: &str = "the quick brown fox jumps over the lazy dog";

/// Short timers so a full race cycle fits in a test.
fn fast_room() -> RoomConfig {
    RoomConfig {
        rules: RaceRules::default(),
        tick_interval: Duration::from_millis(20),
        race_timeout: Some(Duration::from_secs(30)),
        settle_delay: Duration::from_millis(300),
        disconnect_grace: None,
    }
}

/// Spin up a test server on a random port, return the base URL.
async fn start_server(room: RoomConfig) -> String {
    // In-memory SQLite so tests don't clash.
    let config = ServerConfig {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        room,
        prompts: PromptPool::from_lines(PROMPT),
        ..ServerConfig::default()
    };
    let (app, _state) = typerace_server::build_app(config).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{}", port)
}

fn ws_url(base: &str, player_id: &str) -> String {
    format!(
        "{}/ws?player_id={}&name={}",
        base.replace("http://", "ws://"),
        player_id,
        player_id
    )
}

/// Connect a WebSocket client, return the split stream.
async fn ws_connect(base: &str, player_id: &str) -> (WsSink, WsSource) {
    let (stream, _) = tokio_tungstenite::connect_async(ws_url(base, player_id))
        .await
        .unwrap();
    stream.split()
}

/// Send a JSON message over the WebSocket.
async fn ws_send(sink: &mut WsSink, msg: serde_json::Value) {
    sink.send(Message::Text(msg.to_string().into()))
        .await
        .unwrap();
}

/// Receive messages until one satisfies `pick`.
async fn ws_recv_where(
    stream: &mut WsSource,
    what: &str,
    mut pick: impl FnMut(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!("Timed out waiting for {}", what);
        }
        let msg = tokio::time::timeout(remaining, stream.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", what))
            .unwrap()
            .unwrap();

        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if pick(&parsed) {
                return parsed;
            }
        }
    }
}

/// Receive messages until we get one matching the expected type.
async fn ws_recv_type(stream: &mut WsSource, msg_type: &str) -> serde_json::Value {
    ws_recv_where(stream, msg_type, |m| m["type"].as_str() == Some(msg_type)).await
}

/// Wait for the player list to show the room in `phase`.
async fn ws_recv_phase(stream: &mut WsSource, phase: &str) -> serde_json::Value {
    ws_recv_where(stream, phase, |m| {
        m["type"].as_str() == Some("PlayerListUpdate") && m["phase"].as_str() == Some(phase)
    })
    .await
}

async fn join(sink: &mut WsSink, stream: &mut WsSource, room_id: &str) {
    ws_send(sink, json!({"type": "Join", "room_id": room_id})).await;
    let _ = ws_recv_type(stream, "PlayerListUpdate").await;
}

async fn get_rooms(base: &str) -> Vec<RoomStatus> {
    reqwest::get(format!("{}/rooms", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let base = start_server(fast_room()).await;
    let resp = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp, "ok");
}

#[tokio::test]
async fn test_ping_pong() {
    let base = start_server(fast_room()).await;
    let (mut sink, mut stream) = ws_connect(&base, "p1").await;

    ws_send(&mut sink, json!({"type": "Ping"})).await;
    let _ = ws_recv_type(&mut stream, "Pong").await;
}

#[tokio::test]
async fn test_invalid_json_returns_error() {
    let base = start_server(fast_room()).await;
    let (mut sink, mut stream) = ws_connect(&base, "p1").await;

    sink.send(Message::Text("not json".into())).await.unwrap();
    let err = ws_recv_type(&mut stream, "Error").await;
    assert_eq!(err["code"].as_str().unwrap(), "INVALID_MESSAGE");
}

#[tokio::test]
async fn test_command_before_join_is_rejected() {
    let base = start_server(fast_room()).await;
    let (mut sink, mut stream) = ws_connect(&base, "p1").await;

    ws_send(&mut sink, json!({"type": "SetReady", "is_ready": true})).await;
    let err = ws_recv_type(&mut stream, "Error").await;
    assert_eq!(err["code"].as_str().unwrap(), "NOT_IN_ROOM");
}

#[tokio::test]
async fn test_duplicate_connection_is_refused() {
    let base = start_server(fast_room()).await;
    let (_sink, _stream) = ws_connect(&base, "p1").await;
    // Let the first connection register.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio_tungstenite::connect_async(ws_url(&base, "p1")).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn test_rooms_endpoint_lists_live_rooms() {
    let base = start_server(fast_room()).await;
    assert!(get_rooms(&base).await.is_empty());

    let (mut sink, mut stream) = ws_connect(&base, "p1").await;
    join(&mut sink, &mut stream, "lobby").await;

    let mut rooms = get_rooms(&base).await;
    for _ in 0..20 {
        if rooms.first().map(|r| r.members) == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        rooms = get_rooms(&base).await;
    }
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, "lobby");
    assert_eq!(rooms[0].members, 1);

    // The last player leaving retires the room.
    ws_send(&mut sink, json!({"type": "Leave"})).await;
    for _ in 0..20 {
        if get_rooms(&base).await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room was not retired");
}

#[tokio::test]
async fn test_start_needs_quorum() {
    let base = start_server(fast_room()).await;
    let (mut sink, mut stream) = ws_connect(&base, "p1").await;
    join(&mut sink, &mut stream, "solo").await;

    ws_send(&mut sink, json!({"type": "SetReady", "is_ready": true})).await;
    ws_send(&mut sink, json!({"type": "StartRace"})).await;
    let err = ws_recv_type(&mut stream, "Error").await;
    assert_eq!(err["code"].as_str().unwrap(), "CANNOT_START");
}

#[tokio::test]
async fn test_two_player_race_end_to_end() {
    let base = start_server(fast_room()).await;
    let (mut sink_a, mut stream_a) = ws_connect(&base, "a").await;
    let (mut sink_b, mut stream_b) = ws_connect(&base, "b").await;

    join(&mut sink_a, &mut stream_a, "R1").await;
    join(&mut sink_b, &mut stream_b, "R1").await;

    ws_send(&mut sink_a, json!({"type": "SetReady", "is_ready": true})).await;
    ws_send(&mut sink_b, json!({"type": "SetReady", "is_ready": true})).await;
    ws_recv_where(&mut stream_a, "both ready", |m| m["ready_count"] == 2).await;

    ws_send(&mut sink_a, json!({"type": "StartRace"})).await;

    // Exactly three ticks, then the race starts.
    let mut ticks = Vec::new();
    let started = loop {
        let msg = ws_recv_where(&mut stream_a, "countdown", |m| {
            matches!(m["type"].as_str(), Some("CountdownTick") | Some("RaceStarted"))
        })
        .await;
        if msg["type"] == "RaceStarted" {
            break msg;
        }
        ticks.push(msg["remaining"].as_u64().unwrap());
    };
    assert_eq!(ticks, vec![3, 2, 1]);
    assert_eq!(started["prompt"].as_str().unwrap(), PROMPT);
    let _ = ws_recv_type(&mut stream_b, "RaceStarted").await;

    ws_send(
        &mut sink_b,
        json!({"type": "Progress", "progress": 40.0, "wpm": 55, "accuracy": 96.0}),
    )
    .await;
    let progress = ws_recv_type(&mut stream_a, "PlayerProgress").await;
    assert_eq!(progress["player_id"], "b");

    // A finishes strictly before B.
    ws_send(&mut sink_a, json!({"type": "Finish", "wpm": 90, "accuracy": 99.0})).await;
    let finished = ws_recv_type(&mut stream_a, "PlayerFinished").await;
    assert_eq!(finished["player_id"], "a");
    ws_send(&mut sink_b, json!({"type": "Finish", "wpm": 60, "accuracy": 95.0})).await;

    let complete = ws_recv_type(&mut stream_b, "RaceComplete").await;
    let results = complete["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["player_id"], "a");
    assert_eq!(results[0]["placement"], 1);
    assert_eq!(results[1]["player_id"], "b");
    assert_eq!(results[1]["placement"], 2);
    assert!(results[0]["xp_awarded"].as_u64() >= results[1]["xp_awarded"].as_u64());

    // The race log picks up the summary.
    let mut logged: Vec<RaceLogEntry> = Vec::new();
    for _ in 0..50 {
        logged = reqwest::get(format!("{}/races/recent?limit=5", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !logged.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].room_id, "R1");
    assert_eq!(logged[0].race_number, 1);
    assert_eq!(logged[0].results[0].player_id, "a");

    // After the settle delay the room is back to Waiting with fresh state.
    let waiting = ws_recv_phase(&mut stream_a, "Waiting").await;
    assert_eq!(waiting["ready_count"], 0);

    // A finish left over from the last race is rejected.
    ws_send(&mut sink_b, json!({"type": "Finish", "wpm": 60, "accuracy": 95.0})).await;
    let err = ws_recv_type(&mut stream_b, "Error").await;
    assert_eq!(err["code"].as_str().unwrap(), "INVALID_PHASE");

    ws_send(&mut sink_a, json!({"type": "SetReady", "is_ready": true})).await;
    ws_recv_where(&mut stream_a, "ready again", |m| m["ready_count"] == 1).await;
}

#[tokio::test]
async fn test_join_mid_countdown_is_queued() {
    let mut room = fast_room();
    room.tick_interval = Duration::from_millis(500);
    let base = start_server(room).await;

    let (mut sink_a, mut stream_a) = ws_connect(&base, "a").await;
    let (mut sink_b, mut stream_b) = ws_connect(&base, "b").await;
    let (mut sink_c, mut stream_c) = ws_connect(&base, "c").await;

    join(&mut sink_a, &mut stream_a, "R2").await;
    join(&mut sink_b, &mut stream_b, "R2").await;
    ws_send(&mut sink_a, json!({"type": "SetReady", "is_ready": true})).await;
    ws_send(&mut sink_b, json!({"type": "SetReady", "is_ready": true})).await;
    ws_recv_where(&mut stream_a, "both ready", |m| m["ready_count"] == 2).await;
    ws_send(&mut sink_a, json!({"type": "StartRace"})).await;
    let _ = ws_recv_type(&mut stream_a, "CountdownTick").await;

    ws_send(&mut sink_c, json!({"type": "Join", "room_id": "R2"})).await;
    let list = ws_recv_type(&mut stream_c, "PlayerListUpdate").await;
    let me = list["players"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["player_id"] == "c")
        .unwrap()
        .clone();
    assert_eq!(me["queued"], true);

    // Queued players cannot take part in the countdown.
    ws_send(&mut sink_c, json!({"type": "SetReady", "is_ready": true})).await;
    let err = ws_recv_type(&mut stream_c, "Error").await;
    assert_eq!(err["code"].as_str().unwrap(), "INVALID_PHASE");
}

#[tokio::test]
async fn test_disconnect_counts_as_leave() {
    let base = start_server(fast_room()).await;
    let (mut sink_a, mut stream_a) = ws_connect(&base, "a").await;
    let (mut sink_b, mut stream_b) = ws_connect(&base, "b").await;
    join(&mut sink_a, &mut stream_a, "R3").await;
    join(&mut sink_b, &mut stream_b, "R3").await;

    drop(sink_b);
    drop(stream_b);

    let list = ws_recv_where(&mut stream_a, "b gone", |m| {
        m["type"] == "PlayerListUpdate" && m["players"].as_array().map(|p| p.len()) == Some(1)
    })
    .await;
    assert_eq!(list["players"][0]["player_id"], "a");
}

/// Ready both players, start, and wait until the race is on for both.
async fn start_race(
    a: (&mut WsSink, &mut WsSource),
    b: (&mut WsSink, &mut WsSource),
) {
    ws_send(a.0, json!({"type": "SetReady", "is_ready": true})).await;
    ws_send(b.0, json!({"type": "SetReady", "is_ready": true})).await;
    ws_recv_where(a.1, "both ready", |m| m["ready_count"] == 2).await;
    ws_send(a.0, json!({"type": "StartRace"})).await;
    let _ = ws_recv_type(a.1, "RaceStarted").await;
    let _ = ws_recv_type(b.1, "RaceStarted").await;
}

#[tokio::test]
async fn test_campaign_race_awards_bonus_xp() {
    let base = start_server(fast_room()).await;
    let (mut sink_a, mut stream_a) = ws_connect(&base, "a").await;
    let (mut sink_b, mut stream_b) = ws_connect(&base, "b").await;

    // The creating join fixes the campaign race number.
    ws_send(&mut sink_a, json!({"type": "Join", "room_id": "C1", "campaign_race": 2})).await;
    let _ = ws_recv_type(&mut stream_a, "PlayerListUpdate").await;
    join(&mut sink_b, &mut stream_b, "C1").await;
    start_race((&mut sink_a, &mut stream_a), (&mut sink_b, &mut stream_b)).await;

    ws_send(&mut sink_a, json!({"type": "Finish", "wpm": 90, "accuracy": 99.0})).await;
    let _ = ws_recv_type(&mut stream_a, "PlayerFinished").await;
    ws_send(&mut sink_b, json!({"type": "Finish", "wpm": 60, "accuracy": 95.0})).await;

    let complete = ws_recv_type(&mut stream_a, "RaceComplete").await;
    let results = complete["results"].as_array().unwrap();
    let chars = PROMPT.chars().count() as u64;
    // 8 base + characters at the placement multiplier + 25 + 10 * 2.
    assert_eq!(results[0]["characters_typed"], chars);
    assert_eq!(results[0]["xp_awarded"], 8 + chars + 45);
    assert_eq!(results[1]["xp_awarded"], 8 + chars / 2 + 45);
}

#[tokio::test]
async fn test_partial_dnf_xp_on_timeout() {
    let mut room = fast_room();
    room.rules.dnf_xp = DnfXpPolicy::Partial;
    room.race_timeout = Some(Duration::from_millis(1_000));
    let base = start_server(room).await;

    let (mut sink_a, mut stream_a) = ws_connect(&base, "a").await;
    let (mut sink_b, mut stream_b) = ws_connect(&base, "b").await;
    join(&mut sink_a, &mut stream_a, "D1").await;
    join(&mut sink_b, &mut stream_b, "D1").await;
    start_race((&mut sink_a, &mut stream_a), (&mut sink_b, &mut stream_b)).await;

    ws_send(
        &mut sink_b,
        json!({"type": "Progress", "progress": 50.0, "wpm": 40, "accuracy": 92.0}),
    )
    .await;
    let _ = ws_recv_type(&mut stream_a, "PlayerProgress").await;
    ws_send(&mut sink_a, json!({"type": "Finish", "wpm": 90, "accuracy": 99.0})).await;

    // B never finishes; the race timeout closes it out.
    let complete = ws_recv_type(&mut stream_b, "RaceComplete").await;
    let results = complete["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["player_id"], "a");
    assert_eq!(results[1]["player_id"], "b");
    assert!(results[1]["placement"].is_null());
    let typed = PROMPT.chars().count() as u64 / 2;
    assert_eq!(results[1]["characters_typed"], typed);
    assert_eq!(results[1]["xp_awarded"], 8 + typed / 4);
}
