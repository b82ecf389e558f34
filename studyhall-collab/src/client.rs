//! WebSocket client for a group room.
//!
//! Used by the integration tests and by anything that wants to sit in a
//! room from Rust: connect, send chat or typing frames, read events from
//! a channel.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use studyhall_core::{ClientFrame, GroupId, MessageId, ProtocolError, ServerFrame};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the room client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A frame from the server.
    Frame(ServerFrame),
    /// The server closed the connection (or it dropped).
    Closed { code: Option<u16>, reason: String },
}

/// A connection to one group room.
pub struct RoomClient {
    server_url: String,
    room: GroupId,
    token: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl RoomClient {
    /// `server_url` is the gateway base, e.g. `ws://127.0.0.1:9090`.
    pub fn new(server_url: impl Into<String>, room: GroupId, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            room,
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Full room URL including the token.
    pub fn url(&self) -> String {
        format!(
            "{}/groups/{}/ws?token={}",
            self.server_url.trim_end_matches('/'),
            self.room,
            self.token
        )
    }

    pub fn room(&self) -> GroupId {
        self.room
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader and writer tasks.
    ///
    /// A refused handshake comes back as [`ProtocolError::Rejected`] with
    /// the HTTP status.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.url()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(match e {
                    tungstenite::Error::Http(response) => {
                        ProtocolError::Rejected(response.status().to_string())
                    }
                    _ => ProtocolError::ConnectionClosed,
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_writer.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut closed = ClientEvent::Closed {
                code: None,
                reason: String::new(),
            };
            while let Some(message) = ws_reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match ServerFrame::decode(text.as_str()) {
                        Ok(frame) => {
                            let _ = event_tx.send(ClientEvent::Frame(frame)).await;
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            closed = ClientEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            };
                        }
                        break;
                    }
                    Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(closed).await;
        });

        Ok(())
    }

    /// Send a chat message.
    pub async fn send_chat(
        &self,
        body: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::Chat {
            body: body.into(),
            reply_to,
        })
        .await
    }

    /// Send a typing indicator.
    pub async fn send_typing(&self, is_typing: bool) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::Typing { is_typing }).await
    }

    /// Send a raw text frame as is.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.send_message(Message::text(text.into())).await
    }

    /// Close the connection from our side.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.send_message(Message::Close(None)).await;
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
        result
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ProtocolError> {
        self.send_message(Message::text(frame.encode()?)).await
    }

    async fn send_message(&self, message: Message) -> Result<(), ProtocolError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
