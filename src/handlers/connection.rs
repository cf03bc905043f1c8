use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::message::ServerMessage;

pub type WebSocketStreamType = WebSocketStream<TcpStream>;

/// Per-connection send half plus the transport-authenticated peer key.
pub struct ConnectionHandler {
    ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
    peer_key: String,
    addr: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(
        ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
        peer_key: String,
        addr: SocketAddr,
    ) -> Self {
        Self {
            ws_sender,
            peer_key,
            addr,
        }
    }

    /// Public key of the client speaking on this connection.
    pub fn peer_key(&self) -> &str {
        &self.peer_key
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send_json(&mut self, msg: &ServerMessage) -> Result<(), String> {
        let text = serde_json::to_string(msg)
            .map_err(|e| format!("failed to serialize message: {e}"))?;

        self.ws_sender
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| format!("failed to send message: {e}"))?;

        Ok(())
    }

    /// Sends the single terminal message of an interaction and closes the
    /// connection. A send failure only means the peer is already gone; the
    /// result is discarded either way.
    pub async fn terminal(&mut self, msg: &ServerMessage) {
        if let Err(e) = self.send_json(msg).await {
            tracing::debug!(addr = %self.addr, error = %e, "failed to deliver terminal message");
        }
        let _ = self.ws_sender.send(WsMessage::Close(None)).await;
    }

    pub async fn send_pong(&mut self, data: Vec<u8>) {
        let _ = self.ws_sender.send(WsMessage::Pong(data)).await;
    }
}
