/// Duplex message transports between a client and its session
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::{CollaborationError, Permissions, Result, SessionHandle, SyncMessage, User, UserId};

/// What a transport yields to its reader
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(SyncMessage),
    Disconnected(String),
}

/// Any duplex channel that can carry `SyncMessage`s
#[async_trait]
pub trait Transport: Send {
    fn send(&mut self, message: SyncMessage) -> Result<()>;

    /// Next inbound message; `Disconnected` once the link is gone
    async fn recv(&mut self) -> TransportEvent;
}

/// In-process transport talking straight to a session actor
pub struct ChannelTransport {
    user_id: UserId,
    session: SessionHandle,
    rx: mpsc::UnboundedReceiver<SyncMessage>,
    closed: bool,
}

impl ChannelTransport {
    /// Join `session` as `user`; the `connected` reply is the first message
    pub fn connect(session: &SessionHandle, user: User, permissions: Permissions) -> Result<Self> {
        let user_id = user.id;
        let rx = session.join(user, permissions)?;
        Ok(Self {
            user_id,
            session: session.clone(),
            rx,
            closed: false,
        })
    }

    /// Leave the session, as a dropped connection would
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rx.close();
        self.session.leave(self.user_id)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn send(&mut self, message: SyncMessage) -> Result<()> {
        if self.closed {
            return Err(CollaborationError::NetworkError("transport closed".into()));
        }
        // Connect is implied by `ChannelTransport::connect`
        if matches!(message, SyncMessage::Connect { .. }) {
            return Ok(());
        }
        self.session.send(self.user_id, message)
    }

    async fn recv(&mut self) -> TransportEvent {
        match self.rx.recv().await {
            Some(message) => TransportEvent::Message(message),
            None => TransportEvent::Disconnected("session closed".into()),
        }
    }
}

/// WebSocket client transport (JSON text frames)
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| CollaborationError::NetworkError(e.to_string()))?;
        debug!("Connected to {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        // Task to send messages to the server
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Task to decode messages from the server
        let pong_tx = outbound.clone();
        tokio::spawn(async move {
            let reason = loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(TransportEvent::Message(msg)).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable message: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break "connection closed".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                }
            };
            let _ = inbound_tx.send(TransportEvent::Disconnected(reason));
        });

        Ok(Self { outbound, inbound })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn send(&mut self, message: SyncMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|e| CollaborationError::NetworkError(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Disconnected("connection closed".into()))
    }
}
