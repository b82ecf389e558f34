//! WebSocket connection gateway.
//!
//! Architecture:
//! ```text
//! ws://host/groups/{id}/ws?token=…
//!        │
//!        ▼  handshake: parse room + token (400 / 401 on failure)
//!  authenticate ── Directory
//!        │
//!  register ── RoomBroker          ┌──────── RoomSubscription ◀── broadcast
//!        │  existing membership required (policy close otherwise)
//!  join     ── PresenceTracker     │
//!  snapshot ──▶ this client only   ▼
//!  presence/join ──▶ room     select! { inbound frame | room event | ping | idle }
//!        │
//!        ▼  every exit path
//!  unregister + leave (exactly once) ──▶ presence/leave
//! ```
//!
//! One task per connection. Each connection drains its own subscription,
//! so a slow client lags on its own buffer without holding up the room. A
//! connection that falls further behind than the buffer is closed with
//! 1013 and reconnects for a fresh snapshot.
//!
//! Leaving or being removed publishes an eviction for that user; every one
//! of their connections in the room closes with 1008. The heartbeat also
//! re-checks membership.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use studyhall_core::{ClientFrame, GroupError, GroupId, Member, ServerFrame, Viewer};

use crate::broker::{ConnectionId, RoomSubscription};
use crate::config::GatewayConfig;
use crate::hub::RoomHub;
use crate::messenger::Messenger;

type BoxError = Box<dyn Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Where a connection wants to go and who it claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTarget {
    pub room: GroupId,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// Path is not `/groups/{id}/ws`.
    BadPath,
    MissingToken,
}

impl RoomTarget {
    /// Parse `/groups/{id}/ws` with the token from `?token=` or a bearer header.
    pub fn parse(
        path: &str,
        query: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Self, TargetError> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let room = match segments.as_slice() {
            ["groups", id, "ws"] => id
                .parse::<u64>()
                .map(GroupId)
                .map_err(|_| TargetError::BadPath)?,
            _ => return Err(TargetError::BadPath),
        };

        let from_query = query.and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(k, _)| *k == "token")
                .map(|(_, v)| v.to_string())
        });
        let from_header = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        let token = from_query
            .or(from_header)
            .filter(|t| !t.is_empty())
            .ok_or(TargetError::MissingToken)?;
        Ok(Self { room, token })
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// The connection gateway.
pub struct Gateway {
    config: GatewayConfig,
    messenger: Arc<Messenger>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, messenger: Arc<Messenger>) -> Self {
        Self { config, messenger }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Room gateway listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let config = self.config.clone();
            let messenger = self.messenger.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, config, messenger).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: GatewayConfig,
    messenger: Arc<Messenger>,
) -> Result<(), BoxError> {
    let mut target = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match RoomTarget::parse(req.uri().path(), req.uri().query(), authorization) {
            Ok(parsed) => {
                target = Some(parsed);
                Ok(resp)
            }
            Err(TargetError::BadPath) => Err(reject(
                StatusCode::BAD_REQUEST,
                "expected /groups/{id}/ws",
            )),
            Err(TargetError::MissingToken) => {
                Err(reject(StatusCode::UNAUTHORIZED, "missing token"))
            }
        }
    })
    .await?;
    let Some(RoomTarget { room, token }) = target else {
        return Ok(());
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    log::info!("WebSocket connection established from {addr} for room {room}");

    let groups = messenger.groups();
    let Some(viewer) = groups.directory().authenticate(&token).await else {
        log::info!("Refusing {addr}: unknown token");
        close_with(&mut ws_tx, CloseCode::Policy, "authentication required").await;
        return Ok(());
    };

    let hub = messenger.hub().clone();
    let member = viewer.as_member();
    let conn = ConnectionId::new();
    let mut session = Session::new(room, conn, member.clone(), hub.clone());

    // Registered before the membership check so a removal racing this
    // handshake still reaches the subscription as an eviction.
    let mut subscription = hub.broker().register(room, conn).await?;
    session.registered = true;

    match groups.is_member(room, viewer.id) {
        Ok(true) => {}
        Ok(false) => {
            log::info!("Refusing {addr}: user {} is not a member of group {room}", viewer.id);
            close_with(&mut ws_tx, CloseCode::Policy, NOT_A_MEMBER).await;
            session.close().await;
            return Ok(());
        }
        Err(e) => {
            log::error!("Membership check for user {} in group {room} failed: {e}", viewer.id);
            close_with(&mut ws_tx, CloseCode::Error, "membership check failed").await;
            session.close().await;
            return Ok(());
        }
    }

    let first = match hub.presence().join(room, &member).await {
        Ok(first) => first,
        Err(e) => {
            log::error!("Presence join failed for user {} in room {room}: {e}", member.id);
            close_with(&mut ws_tx, CloseCode::Error, "presence unavailable").await;
            session.close().await;
            return Ok(());
        }
    };
    session.present = true;

    let connection = RoomConnection {
        conn,
        room,
        viewer,
        messenger: messenger.clone(),
        config,
    };
    let result = connection
        .greet(&mut ws_tx, first)
        .await;
    let result = match result {
        Ok(()) => connection
            .pump(&mut ws_tx, &mut ws_rx, &mut subscription)
            .await,
        Err(e) => Err(e),
    };

    session.close().await;
    log::info!(
        "Connection closed from {addr} (user {}, room {room})",
        member.id
    );
    result
}

async fn close_with(ws_tx: &mut WsSink, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
    let _ = ws_tx.close().await;
}

async fn send_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), BoxError> {
    ws_tx.send(Message::text(frame.encode()?)).await?;
    Ok(())
}

const NOT_A_MEMBER: &str = "not a member of this group";

enum Step {
    Continue,
    Close(CloseCode, &'static str),
}

/// A live, admitted connection.
struct RoomConnection {
    conn: ConnectionId,
    room: GroupId,
    viewer: Viewer,
    messenger: Arc<Messenger>,
    config: GatewayConfig,
}

impl RoomConnection {
    /// Private snapshot first, then announce ourselves to the room.
    async fn greet(&self, ws_tx: &mut WsSink, first_connection: bool) -> Result<(), BoxError> {
        let hub = self.messenger.hub();
        let users = hub.presence().snapshot(self.room).await?;
        send_frame(ws_tx, &ServerFrame::Snapshot { users }).await?;
        if first_connection {
            hub.publish(self.room, None, &ServerFrame::join(self.viewer.as_member()))
                .await;
        }
        Ok(())
    }

    async fn pump(
        &self,
        ws_tx: &mut WsSink,
        ws_rx: &mut WsSource,
        subscription: &mut RoomSubscription,
    ) -> Result<(), BoxError> {
        let idle = Duration::from_secs(self.config.idle_timeout_secs.max(1));
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut deadline = Instant::now() + idle;

        loop {
            tokio::select! {
                inbound = ws_rx.next() => {
                    deadline = Instant::now() + idle;
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > self.config.max_frame_bytes {
                                close_with(ws_tx, CloseCode::Size, "frame too large").await;
                                return Ok(());
                            }
                            let frame = match ClientFrame::decode(text.as_str()) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Malformed frame from user {}: {e}", self.viewer.id);
                                    close_with(ws_tx, CloseCode::Invalid, "malformed frame").await;
                                    return Ok(());
                                }
                            };
                            if let Step::Close(code, reason) = self.handle_frame(frame, ws_tx).await? {
                                close_with(ws_tx, code, reason).await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            close_with(ws_tx, CloseCode::Unsupported, "binary frames are not supported").await;
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_tx.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error for user {}: {e}", self.viewer.id);
                            return Ok(());
                        }
                    }
                }

                event = subscription.recv() => {
                    match event {
                        Ok(event) => {
                            if let Some(user) = event.evict {
                                if user == self.viewer.id {
                                    log::info!(
                                        "User {} removed from group {}; closing connection {}",
                                        user,
                                        self.room,
                                        self.conn
                                    );
                                    close_with(ws_tx, CloseCode::Policy, "removed from group").await;
                                    return Ok(());
                                }
                                continue;
                            }
                            if event.is_echo_for(self.conn) {
                                continue;
                            }
                            ws_tx.send(Message::text(event.payload.to_string())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            // Missed events may include presence changes, so the
                            // client's view can no longer be trusted.
                            log::warn!(
                                "Connection {} in room {} lagged by {n} events; closing",
                                self.conn,
                                self.room
                            );
                            close_with(ws_tx, CloseCode::Again, "fell behind; reconnect for a fresh snapshot").await;
                            return Ok(());
                        }
                        Err(RecvError::Closed) => return Ok(()),
                    }
                }

                _ = heartbeat.tick() => {
                    if let Step::Close(code, reason) = self.recheck_membership() {
                        close_with(ws_tx, code, reason).await;
                        return Ok(());
                    }
                    ws_tx.send(Message::Ping(Default::default())).await?;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    log::info!(
                        "Connection {} of user {} idle for {}s; closing",
                        self.conn,
                        self.viewer.id,
                        idle.as_secs()
                    );
                    close_with(ws_tx, CloseCode::Away, "idle timeout").await;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_frame(&self, frame: ClientFrame, ws_tx: &mut WsSink) -> Result<Step, BoxError> {
        let result = match frame {
            ClientFrame::Chat { body, reply_to } => {
                if body.trim().is_empty() {
                    return Ok(Step::Continue);
                }
                self.messenger
                    .send_chat(self.room, &self.viewer, &body, reply_to)
                    .await
                    .map(|_| ())
            }
            ClientFrame::Typing { is_typing } => {
                self.messenger
                    .typing(self.room, self.conn, &self.viewer, is_typing)
                    .await
            }
        };
        match result {
            Ok(()) => Ok(Step::Continue),
            Err(GroupError::Forbidden) | Err(GroupError::NotFound("group")) => Ok(self.membership_lost()),
            Err(e) => {
                if e.is_transient() {
                    log::error!("Frame from user {} in room {} failed: {e}", self.viewer.id, self.room);
                }
                let error = ServerFrame::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                };
                send_frame(ws_tx, &error).await?;
                Ok(Step::Continue)
            }
        }
    }

    /// Backstop for removals whose eviction this process never saw.
    fn recheck_membership(&self) -> Step {
        match self.messenger.groups().is_member(self.room, self.viewer.id) {
            Ok(true) => Step::Continue,
            Ok(false) => self.membership_lost(),
            Err(e) => {
                log::warn!(
                    "Membership re-check for user {} in group {} failed: {e}",
                    self.viewer.id,
                    self.room
                );
                Step::Continue
            }
        }
    }

    fn membership_lost(&self) -> Step {
        log::info!(
            "User {} is no longer a member of group {}; closing",
            self.viewer.id,
            self.room
        );
        Step::Close(CloseCode::Policy, NOT_A_MEMBER)
    }
}

/// Room registration and presence of one connection.
///
/// `close` undoes both at most once. If the task is dropped before `close`
/// ran (panic, runtime shutdown), `Drop` schedules it instead.
struct Session {
    room: GroupId,
    conn: ConnectionId,
    member: Member,
    hub: RoomHub,
    registered: bool,
    present: bool,
}

impl Session {
    fn new(room: GroupId, conn: ConnectionId, member: Member, hub: RoomHub) -> Self {
        Self {
            room,
            conn,
            member,
            hub,
            registered: false,
            present: false,
        }
    }

    async fn close(&mut self) {
        if std::mem::take(&mut self.registered) {
            self.hub.broker().unregister(self.room, self.conn).await;
        }
        if std::mem::take(&mut self.present) {
            match self.hub.presence().leave(self.room, &self.member).await {
                Ok(true) => {
                    self.hub
                        .publish(self.room, None, &ServerFrame::leave(self.member.clone()))
                        .await;
                }
                Ok(false) => {}
                Err(e) => log::warn!(
                    "Presence leave failed for user {} in room {}: {e}",
                    self.member.id,
                    self.room
                ),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.registered && !self.present {
            return;
        }
        let mut pending = Session {
            room: self.room,
            conn: self.conn,
            member: self.member.clone(),
            hub: self.hub.clone(),
            registered: std::mem::take(&mut self.registered),
            present: std::mem::take(&mut self.present),
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { pending.close().await });
        }
    }
}
