//! End-to-end sessions against a running server over TCP and WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use doncey_kong::game::events::EndReason;
use doncey_kong::game::tick::MatchConfig;
use doncey_kong::network::protocol::{ClientRole, ErrorCode, ServerMessage};
use doncey_kong::network::{GameServer, GameServerError, NetworkConfig, SessionRegistry};
use doncey_kong::room::{RoomConfig, RoomManager};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    tcp: SocketAddr,
    ws: SocketAddr,
    server: Arc<GameServer>,
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    task: JoinHandle<Result<(), GameServerError>>,
}

impl TestServer {
    async fn start(room_config: RoomConfig) -> Self {
        Self::start_with(room_config, NetworkConfig::default().idle_timeout).await
    }

    async fn start_with(room_config: RoomConfig, idle_timeout: Duration) -> Self {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_addr = tcp.local_addr().unwrap();
        let ws_addr = ws.local_addr().unwrap();

        let registry = Arc::new(SessionRegistry::new(16));
        let rooms = RoomManager::new(room_config, registry.clone());
        let config = NetworkConfig {
            tcp_addr,
            ws_addr: Some(ws_addr),
            tick_rate: 50,
            idle_timeout,
            ..NetworkConfig::default()
        };
        let server = Arc::new(GameServer::new(config, registry.clone(), rooms.clone()));

        let running = server.clone();
        let task = tokio::spawn(async move { running.run_with_listeners(tcp, Some(ws)).await });

        Self { tcp: tcp_addr, ws: ws_addr, server, registry, rooms, task }
    }

    async fn stop(self) {
        self.rooms.shutdown().await;
        self.server.shutdown();
        let result = timeout(WAIT, self.task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

fn fast_rooms() -> RoomConfig {
    RoomConfig {
        match_config: MatchConfig::for_tick_rate(50),
        ..RoomConfig::default()
    }
}

struct TcpClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TcpClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self { lines: BufReader::new(read).lines(), writer }
    }

    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        let line = timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for server")
            .unwrap()
            .expect("connection closed");
        ServerMessage::from_json(&line).unwrap()
    }

    /// Skip messages until one matches.
    async fn recv_until<F>(&mut self, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn welcome(&mut self) -> (String, Option<String>, ClientRole) {
        match self.recv_until(|m| matches!(m, ServerMessage::Welcome(_) | ServerMessage::Error(_))).await {
            ServerMessage::Welcome(info) => (info.session_id, info.match_id, info.role),
            other => panic!("expected WELCOME, got {:?}", other),
        }
    }

    async fn error_code(&mut self) -> ErrorCode {
        match self.recv_until(|m| matches!(m, ServerMessage::Error(_))).await {
            ServerMessage::Error(e) => e.code,
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_player_session_over_tcp() {
    let server = TestServer::start(fast_rooms()).await;
    let mut client = TcpClient::connect(server.tcp).await;

    client.send(r#"{"type":"CONNECT","playerId":"alice","clientType":"PLAYER"}"#).await;
    let (_, match_id, role) = client.welcome().await;
    let match_id = match_id.expect("player placed in a match");
    assert_eq!(role, ClientRole::Player);

    let snapshot = match client.recv_until(|m| matches!(m, ServerMessage::State { .. })).await {
        ServerMessage::State { data } => data,
        _ => unreachable!(),
    };
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(snapshot.state_hash.len(), 64);

    client.send(r#"{"type":"INPUT","action":"RIGHT"}"#).await;
    client.send(r#"{"type":"PING","timestamp":42}"#).await;
    match client.recv_until(|m| matches!(m, ServerMessage::Pong { .. })).await {
        ServerMessage::Pong { timestamp, server_time } => {
            assert_eq!(timestamp, 42);
            assert!(server_time > 0);
        }
        _ => unreachable!(),
    }

    // Bad input is reported and the connection stays usable
    client.send("this is not json").await;
    assert_eq!(client.error_code().await, ErrorCode::InvalidMessage);

    client.send(r#"{"type":"LIST_MATCHES"}"#).await;
    match client.recv_until(|m| matches!(m, ServerMessage::MatchList { .. })).await {
        ServerMessage::MatchList { matches } => {
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].match_id, match_id);
            assert_eq!(matches[0].players, 1);
        }
        _ => unreachable!(),
    }

    client.send(r#"{"type":"LEAVE_MATCH"}"#).await;
    match client.recv_until(|m| matches!(m, ServerMessage::LeftMatch { .. })).await {
        ServerMessage::LeftMatch { match_id: left } => assert_eq!(left, match_id),
        _ => unreachable!(),
    }

    // Last participant gone, so the match is gone too
    client.send(r#"{"type":"LIST_MATCHES"}"#).await;
    match client.recv_until(|m| matches!(m, ServerMessage::MatchList { .. })).await {
        ServerMessage::MatchList { matches } => assert!(matches.is_empty()),
        _ => unreachable!(),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_welcome_is_first_reply() {
    let server = TestServer::start(fast_rooms()).await;

    for name in ["fay", "gus", "hal"] {
        let mut client = TcpClient::connect(server.tcp).await;
        client.send(&format!(r#"{{"type":"CONNECT","playerId":"{}"}}"#, name)).await;
        match client.recv().await {
            ServerMessage::Welcome(info) => assert_eq!(info.tick_rate, 50),
            other => panic!("expected WELCOME first, got {:?}", other),
        }
        assert!(matches!(client.recv().await, ServerMessage::State { .. }));
    }

    let mut creator = TcpClient::connect(server.tcp).await;
    creator.send(r#"{"type":"CREATE_MATCH"}"#).await;
    assert!(matches!(creator.recv().await, ServerMessage::Welcome(_)));

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_player_id_in_match_rejected() {
    let server = TestServer::start(fast_rooms()).await;

    let mut first = TcpClient::connect(server.tcp).await;
    first.send(r#"{"type":"CONNECT","playerId":"ivy"}"#).await;
    let (_, match_id, _) = first.welcome().await;
    let match_id = match_id.unwrap();

    let mut second = TcpClient::connect(server.tcp).await;
    second
        .send(&format!(r#"{{"type":"CONNECT","playerId":"ivy","matchId":"{}"}}"#, match_id))
        .await;
    assert_eq!(second.error_code().await, ErrorCode::AlreadyInMatch);

    // A different name takes the free slot
    second
        .send(&format!(r#"{{"type":"CONNECT","playerId":"jay","matchId":"{}"}}"#, match_id))
        .await;
    let (_, joined, _) = second.welcome().await;
    assert_eq!(joined, Some(match_id));

    server.stop().await;
}

#[tokio::test]
async fn test_silent_clients_receiving_state_are_not_timed_out() {
    let idle_timeout = Duration::from_secs(1);
    let server = TestServer::start_with(fast_rooms(), idle_timeout).await;

    let mut player = TcpClient::connect(server.tcp).await;
    player.send(r#"{"type":"CONNECT","playerId":"kim"}"#).await;
    player.welcome().await;

    let mut watcher = TcpClient::connect(server.tcp).await;
    watcher.send(r#"{"type":"CONNECT","clientType":"SPECTATOR"}"#).await;
    watcher.welcome().await;

    // Never says anything and is never sent anything
    let mut lurker = TcpClient::connect(server.tcp).await;

    let quiet_until = tokio::time::Instant::now() + idle_timeout * 3;
    while tokio::time::Instant::now() < quiet_until {
        let msg = watcher.recv().await;
        assert!(!matches!(msg, ServerMessage::Error(_) | ServerMessage::MatchEnd(_)), "got {:?}", msg);
        while let Ok(Ok(Some(_))) = timeout(Duration::from_millis(1), player.lines.next_line()).await {}
    }

    assert!(matches!(
        watcher.recv_until(|m| matches!(m, ServerMessage::State { .. } | ServerMessage::Delta { .. })).await,
        ServerMessage::State { .. } | ServerMessage::Delta { .. }
    ));
    assert_eq!(server.registry.count().await, 2);

    let closed = timeout(WAIT, lurker.lines.next_line()).await.unwrap();
    assert!(matches!(closed, Ok(None) | Err(_)));

    server.stop().await;
}

#[tokio::test]
async fn test_acknowledged_client_receives_deltas() {
    let server = TestServer::start(fast_rooms()).await;
    let mut client = TcpClient::connect(server.tcp).await;

    client.send(r#"{"type":"CONNECT","playerId":"bob"}"#).await;
    client.welcome().await;

    let tick = match client.recv_until(|m| matches!(m, ServerMessage::State { .. })).await {
        ServerMessage::State { data } => data.tick,
        _ => unreachable!(),
    };
    client.send(&format!(r#"{{"type":"ACK","tick":{}}}"#, tick)).await;

    match client.recv_until(|m| matches!(m, ServerMessage::Delta { .. })).await {
        ServerMessage::Delta { data } => assert!(data.tick > tick),
        _ => unreachable!(),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_spectator_joins_running_match() {
    let server = TestServer::start(fast_rooms()).await;

    let mut watcher = TcpClient::connect(server.tcp).await;
    watcher.send(r#"{"type":"CONNECT","clientType":"SPECTATOR"}"#).await;
    assert_eq!(watcher.error_code().await, ErrorCode::MatchNotFound);

    let mut player = TcpClient::connect(server.tcp).await;
    player.send(r#"{"type":"CONNECT","playerId":"carol"}"#).await;
    let (_, match_id, _) = player.welcome().await;

    watcher.send(r#"{"type":"CONNECT","clientType":"SPECTATOR"}"#).await;
    let (_, watched, role) = watcher.welcome().await;
    assert_eq!(role, ClientRole::Spectator);
    assert_eq!(watched, match_id);

    // Spectators watch but cannot play
    watcher.recv_until(|m| matches!(m, ServerMessage::State { .. })).await;
    watcher.send(r#"{"type":"INPUT","action":"JUMP"}"#).await;
    assert_eq!(watcher.error_code().await, ErrorCode::SpectatorNotAllowed);

    server.stop().await;
}

#[tokio::test]
async fn test_match_limit_rejects_create() {
    let rooms = RoomConfig { max_matches: 1, max_players_per_match: 1, ..fast_rooms() };
    let server = TestServer::start(rooms).await;

    let mut first = TcpClient::connect(server.tcp).await;
    first.send(r#"{"type":"CREATE_MATCH"}"#).await;
    first.welcome().await;

    let mut second = TcpClient::connect(server.tcp).await;
    second.send(r#"{"type":"CREATE_MATCH"}"#).await;
    assert_eq!(second.error_code().await, ErrorCode::CapacityExceeded);

    // Already seated players cannot create another match
    first.send(r#"{"type":"CREATE_MATCH"}"#).await;
    assert_eq!(first.error_code().await, ErrorCode::AlreadyInMatch);

    server.stop().await;
}

#[tokio::test]
async fn test_input_outside_match_is_refused() {
    let server = TestServer::start(fast_rooms()).await;
    let mut client = TcpClient::connect(server.tcp).await;

    client.send(r#"{"type":"INPUT","action":"UP"}"#).await;
    assert_eq!(client.error_code().await, ErrorCode::NotInMatch);

    client.send(r#"{"type":"LEAVE_MATCH"}"#).await;
    assert_eq!(client.error_code().await, ErrorCode::NotInMatch);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_notifies_clients() {
    let server = TestServer::start(fast_rooms()).await;
    let mut client = TcpClient::connect(server.tcp).await;

    client.send(r#"{"type":"CONNECT","playerId":"dave"}"#).await;
    client.welcome().await;

    server.rooms.shutdown().await;
    match client.recv_until(|m| matches!(m, ServerMessage::MatchEnd(_))).await {
        ServerMessage::MatchEnd(info) => assert_eq!(info.reason, EndReason::Shutdown),
        _ => unreachable!(),
    }

    server.server.shutdown();
    client.recv_until(|m| matches!(m, ServerMessage::Shutdown { .. })).await;

    let result = timeout(WAIT, server.task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_player_session_over_websocket() {
    let server = TestServer::start(fast_rooms()).await;

    let url = format!("ws://{}", server.ws);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws.send(Message::Text(r#"{"type":"CONNECT","playerId":"erin"}"#.to_string()))
        .await
        .unwrap();

    let mut saw_welcome = false;
    let mut saw_state = false;
    while !(saw_welcome && saw_state) {
        let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        let text = match frame {
            Message::Text(text) => text,
            _ => continue,
        };
        match ServerMessage::from_json(&text).unwrap() {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.role, ClientRole::Player);
                assert_eq!(info.tick_rate, 50);
                saw_welcome = true;
            }
            ServerMessage::State { data } => {
                assert_eq!(data.players.len(), 1);
                saw_state = true;
            }
            _ => {}
        }
    }

    ws.send(Message::Text(r#"{"type":"DISCONNECT"}"#.to_string())).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let server = TestServer::start(fast_rooms()).await;
    let mut client = TcpClient::connect(server.tcp).await;

    client.send(&"x".repeat(20 * 1024)).await;
    assert_eq!(client.error_code().await, ErrorCode::InvalidMessage);

    let closed = timeout(WAIT, client.lines.next_line()).await.unwrap();
    assert!(matches!(closed, Ok(None) | Err(_)));

    server.stop().await;
}
