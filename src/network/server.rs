//! Game Server
//!
//! Accepts client connections over TCP (newline-delimited JSON) and,
//! optionally, WebSocket (one JSON message per text frame). Both transports
//! share the same message handling; only framing differs.
//!
//! Each connection gets a writer task draining its outbound queue, and a
//! reader loop that dispatches client messages to the session registry and
//! the room manager.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::{
    ClientMessage, ClientRole, ConnectRequest, ErrorCode, ServerMessage, MAX_LINE_BYTES,
};
use crate::network::session::{
    ConnectionHandle, DisconnectReason, SessionId, SessionRegistry, Transport, OUTBOUND_QUEUE_CAPACITY,
};
use crate::room::{Greeting, MatchId, RoomError, RoomManager};

/// How long a closing connection may keep flushing queued messages.
const WRITER_GRACE: Duration = Duration::from_millis(250);

/// Listener and connection settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP bind address.
    pub tcp_addr: SocketAddr,
    /// WebSocket bind address, if enabled.
    pub ws_addr: Option<SocketAddr>,
    /// Sessions silent this long are disconnected. Zero disables the sweep.
    pub idle_timeout: Duration,
    /// Tick rate announced in `WELCOME`.
    pub tick_rate: u32,
    /// Server version string.
    pub version: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT)),
            ws_addr: None,
            idle_timeout: Duration::from_secs(120),
            tick_rate: crate::DEFAULT_TICK_RATE,
            version: crate::VERSION.to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// What the reader loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Result of reading one TCP line.
enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Everything a connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: Arc<NetworkConfig>,
    /// Connected sessions.
    registry: Arc<SessionRegistry>,
    /// Matches.
    rooms: Arc<RoomManager>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: NetworkConfig, registry: Arc<SessionRegistry>, rooms: Arc<RoomManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        rooms.set_greeting(Greeting {
            tick_rate: config.tick_rate,
            server_version: config.version.clone(),
        });

        Self {
            config: Arc::new(config),
            registry,
            rooms,
            shutdown_tx,
        }
    }

    /// Bind the configured addresses and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let tcp = TcpListener::bind(self.config.tcp_addr).await?;
        let ws = match self.config.ws_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.run_with_listeners(tcp, ws).await
    }

    /// Serve on already bound listeners until shutdown.
    pub async fn run_with_listeners(
        &self,
        tcp: TcpListener,
        ws: Option<TcpListener>,
    ) -> Result<(), GameServerError> {
        info!("Game server listening on {} (tcp)", tcp.local_addr()?);
        if let Some(ws) = &ws {
            info!("Game server listening on {} (websocket)", ws.local_addr()?);
        }

        let sweep_handle = (!self.config.idle_timeout.is_zero()).then(|| {
            tokio::spawn(run_idle_sweep(self.registry.clone(), self.config.idle_timeout))
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = tcp.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New tcp connection from {}", addr);
                            tokio::spawn(serve_tcp(self.context(), stream, addr, self.shutdown_tx.subscribe()));
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                result = accept_optional(&ws) => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New websocket connection from {}", addr);
                            tokio::spawn(serve_websocket(self.context(), stream, addr, self.shutdown_tx.subscribe()));
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(handle) = sweep_handle {
            handle.abort();
        }

        Ok(())
    }

    /// Tell every connection and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            rooms: self.rooms.clone(),
        }
    }
}

async fn accept_optional(listener: &Option<TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// TRANSPORTS
// =============================================================================

async fn serve_tcp(
    ctx: ConnectionContext,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);
    let handle = ConnectionHandle::new(peer, Transport::Tcp, msg_tx);
    let activity = handle.activity();

    let writer = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let mut line = match msg.to_json() {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            activity.mark();
        }
    });

    let session = match ctx.register(&handle).await {
        Some(session) => session,
        None => {
            finish_writer(handle, writer).await;
            return;
        }
    };

    let mut reader = BufReader::new(read_half);
    let reason = loop {
        tokio::select! {
            read = read_bounded_line(&mut reader) => {
                match read {
                    Ok(LineRead::Line(text)) => {
                        if ctx.dispatch(session, &handle, &text).await == Flow::Close {
                            break DisconnectReason::Requested;
                        }
                    }
                    Ok(LineRead::TooLong) => {
                        debug!(session = %session, "Oversized line, closing");
                        handle.try_send(ServerMessage::error(
                            ErrorCode::InvalidMessage,
                            format!("message exceeds {} bytes", MAX_LINE_BYTES),
                        ));
                        break DisconnectReason::Closed;
                    }
                    Ok(LineRead::Eof) => break DisconnectReason::Closed,
                    Err(e) => {
                        debug!(session = %session, "Read error: {}", e);
                        break DisconnectReason::Closed;
                    }
                }
            }
            _ = handle.closed() => break DisconnectReason::Unreachable,
            _ = shutdown_rx.recv() => {
                handle.try_send(ServerMessage::Shutdown { reason: "Server shutting down".to_string() });
                break DisconnectReason::Shutdown;
            }
        }
    };

    ctx.registry.unregister(&session, reason).await;
    finish_writer(handle, writer).await;
    info!("Client {} cleaned up", peer);
}

async fn serve_websocket(
    ctx: ConnectionContext,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", peer, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);
    let handle = ConnectionHandle::new(peer, Transport::WebSocket, msg_tx);
    let activity = handle.activity();

    let writer = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
            activity.mark();
        }
        let _ = ws_sender.close().await;
    });

    let session = match ctx.register(&handle).await {
        Some(session) => session,
        None => {
            finish_writer(handle, writer).await;
            return;
        }
    };

    let reason = loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if ctx.dispatch(session, &handle, &text).await == Flow::Close {
                            break DisconnectReason::Requested;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data);
                        if ctx.dispatch(session, &handle, &text).await == Flow::Close {
                            break DisconnectReason::Requested;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break DisconnectReason::Closed,
                    Some(Err(e)) => {
                        debug!(session = %session, "WebSocket error: {}", e);
                        break DisconnectReason::Closed;
                    }
                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }
            _ = handle.closed() => break DisconnectReason::Unreachable,
            _ = shutdown_rx.recv() => {
                handle.try_send(ServerMessage::Shutdown { reason: "Server shutting down".to_string() });
                break DisconnectReason::Shutdown;
            }
        }
    };

    ctx.registry.unregister(&session, reason).await;
    finish_writer(handle, writer).await;
    info!("Client {} cleaned up", peer);
}

/// Read one `\n`-terminated line of at most [`MAX_LINE_BYTES`].
///
/// Longer lines are consumed up to their newline and reported as too long;
/// the connection is then closed.
async fn read_bounded_line<R>(reader: &mut R) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_LINE_BYTES as u64 + 1;
    let mut buf = Vec::new();

    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= MAX_LINE_BYTES {
        return Ok(LineRead::Line(String::from_utf8_lossy(&buf).into_owned()));
    }

    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Let the writer flush what is queued, then stop it.
async fn finish_writer(handle: ConnectionHandle, mut writer: JoinHandle<()>) {
    drop(handle);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

// =============================================================================
// MESSAGE HANDLING
// =============================================================================

impl ConnectionContext {
    /// Register a connection, turning it away when the server is full.
    async fn register(&self, handle: &ConnectionHandle) -> Option<SessionId> {
        match self.registry.register(handle.clone()).await {
            Ok(session) => {
                info!(session = %session, peer = %handle.peer, transport = ?handle.transport, "Client connected");
                Some(session)
            }
            Err(e) => {
                warn!("Rejecting {}: {}", handle.peer, e);
                handle.try_send(ServerMessage::error(ErrorCode::ServerFull, e.to_string()));
                None
            }
        }
    }

    /// Handle one raw message from a client.
    async fn dispatch(&self, session: SessionId, handle: &ConnectionHandle, raw: &str) -> Flow {
        self.registry.touch(&session).await;

        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(session = %session, "Invalid message: {}", e);
                handle.try_send(ServerMessage::error(ErrorCode::InvalidMessage, e.to_string()));
                return Flow::Continue;
            }
        };

        match self.handle_message(session, handle, message).await {
            Ok(flow) => flow,
            Err(e) => {
                debug!(session = %session, "Request refused: {}", e);
                handle.try_send(e.to_message());
                Flow::Continue
            }
        }
    }

    async fn handle_message(
        &self,
        session: SessionId,
        handle: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<Flow, RoomError> {
        match message {
            ClientMessage::Connect(request) => {
                let (match_id, role) = self.handle_connect(session, request).await?;
                debug!(session = %session, match_id = %match_id, ?role, "Connected");
            }
            ClientMessage::Input(input) => {
                self.rooms.send_input(&session, input.action, input.seq).await?;
            }
            ClientMessage::Ack { tick } => {
                self.rooms.acknowledge(&session, tick).await?;
            }
            ClientMessage::Ping { timestamp } => {
                handle.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: Utc::now().timestamp_millis(),
                });
            }
            ClientMessage::CreateMatch => {
                let match_id = self.rooms.create_match(&[session]).await?;
                debug!(session = %session, match_id = %match_id, "Created match");
            }
            ClientMessage::LeaveMatch => {
                let match_id = self.rooms.leave_match(&session).await?;
                handle.try_send(ServerMessage::LeftMatch { match_id: match_id.to_string() });
            }
            ClientMessage::ListMatches => {
                let matches = self.rooms.list_matches().await;
                handle.try_send(ServerMessage::MatchList { matches });
            }
            ClientMessage::Disconnect => return Ok(Flow::Close),
        }
        Ok(Flow::Continue)
    }

    /// Record the client's identity and place it in a match.
    ///
    /// The room manager queues the `WELCOME` as the session is placed.
    async fn handle_connect(
        &self,
        session: SessionId,
        request: ConnectRequest,
    ) -> Result<(MatchId, ClientRole), RoomError> {
        if self.rooms.match_of(&session).await.is_some() {
            return Err(RoomError::AlreadyInMatch(session));
        }

        let target = match request.match_id.as_deref() {
            Some(raw) => Some(MatchId::parse(raw).ok_or_else(|| RoomError::MatchNotFound(raw.to_string()))?),
            None => None,
        };

        let role = request.client_type;
        self.registry.set_identity(&session, request.player_id, role).await?;

        let match_id = match (role, target) {
            (ClientRole::Player, Some(match_id)) => {
                self.rooms.join_match(session, match_id, ClientRole::Player).await?;
                match_id
            }
            (ClientRole::Player, None) => self.rooms.quick_join(session).await?,
            (ClientRole::Spectator, target) => self.rooms.spectate(session, target).await?,
        };

        Ok((match_id, role))
    }
}

// =============================================================================
// BACKGROUND TASKS
// =============================================================================

/// Periodically disconnect sessions with no traffic either way.
async fn run_idle_sweep(registry: Arc<SessionRegistry>, idle_timeout: Duration) {
    let period = (idle_timeout / 4).max(Duration::from_secs(1));
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;

        let removed = registry.sweep_idle(idle_timeout).await;
        if !removed.is_empty() {
            info!("Removed {} idle sessions", removed.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;

    #[test]
    fn test_server_config_default() {
        let config = NetworkConfig::default();
        assert_eq!(config.tick_rate, crate::DEFAULT_TICK_RATE);
        assert_eq!(config.tcp_addr.port(), crate::DEFAULT_PORT);
        assert!(config.ws_addr.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let registry = Arc::new(SessionRegistry::default());
        let rooms = RoomManager::new(RoomConfig::default(), registry.clone());
        let server = GameServer::new(NetworkConfig::default(), registry, rooms);

        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bounded_line_reader() {
        let long = "x".repeat(MAX_LINE_BYTES + 10);
        let input = format!("{{\"type\":\"PING\",\"timestamp\":1}}\n{}\nshort\n", long);
        let mut reader = BufReader::new(input.as_bytes());

        match read_bounded_line(&mut reader).await.unwrap() {
            LineRead::Line(line) => assert!(line.contains("PING")),
            _ => panic!("expected a line"),
        }
        assert!(matches!(read_bounded_line(&mut reader).await.unwrap(), LineRead::TooLong));
        match read_bounded_line(&mut reader).await.unwrap() {
            LineRead::Line(line) => assert_eq!(line.trim(), "short"),
            _ => panic!("expected a line"),
        }
        assert!(matches!(read_bounded_line(&mut reader).await.unwrap(), LineRead::Eof));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let registry = Arc::new(SessionRegistry::default());
        let rooms = RoomManager::new(RoomConfig::default(), registry.clone());
        let server = Arc::new(GameServer::new(NetworkConfig::default(), registry, rooms));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let task = tokio::spawn(async move { running.run_with_listeners(listener, None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
