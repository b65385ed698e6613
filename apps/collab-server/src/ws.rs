use collaboration::{SessionHandle, SessionManager, SyncMessage, UserId};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

type Tx = mpsc::UnboundedSender<Message>;

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, manager: Arc<SessionManager>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("WebSocket connection established: {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send message to WebSocket: {}", e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // The first text frame must be `connect`
    let mut joined: Option<(SessionHandle, UserId)> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message from {}: {}", addr, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let message: SyncMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Undecodable message from {}: {}", addr, e);
                        send(&tx, &SyncMessage::error(format!("invalid message: {}", e)));
                        continue;
                    }
                };

                match &joined {
                    Some((session, user_id)) => {
                        if session.send(*user_id, message).is_err() {
                            warn!("Session for {} is gone", addr);
                            break;
                        }
                    }
                    None => match join(message, &manager, &tx).await {
                        Ok(pair) => joined = Some(pair),
                        Err(e) => {
                            warn!("Rejected connection from {}: {}", addr, e);
                            send(&tx, &SyncMessage::error(e.to_string()));
                        }
                    },
                }
            }
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data));
            }
            Message::Close(_) => {
                info!("Client requested close");
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    if let Some((session, user_id)) = joined {
        if let Err(e) = manager.leave(session.id(), user_id).await {
            warn!("Failed to leave session {}: {}", session.id(), e);
        }
    }

    drop(tx);
    let _ = send_task.await;
    info!("Connection closed: {}", addr);
}

/// Attach the socket to the session named in a `connect` message
async fn join(
    message: SyncMessage,
    manager: &SessionManager,
    tx: &Tx,
) -> anyhow::Result<(SessionHandle, UserId)> {
    let name = message.name();
    let SyncMessage::Connect {
        session_id,
        user,
        permissions,
    } = message
    else {
        anyhow::bail!("expected connect, got {}", name);
    };

    info!("User {} connecting to session {}", user.name, session_id);
    let user_id = user.id;
    let (session, mut rx) = manager.join(session_id, user, permissions).await?;

    // Task to forward session traffic to this socket
    let tx = tx.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if !send(&tx, &message) {
                break;
            }
        }
    });

    Ok((session, user_id))
}

fn send(tx: &Tx, message: &SyncMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => tx.send(Message::Text(json)).is_ok(),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            false
        }
    }
}
