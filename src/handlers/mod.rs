pub mod connection;
pub mod dispatch;
mod phonebook;
mod signup;

use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{CLIENT_KEY_HEADER, MAX_WEBSOCKET_MESSAGE_SIZE};
use crate::context::AppContext;
use crate::crypto::verifying_key_from_b64;
use crate::message::ClientMessage;
use crate::metrics;
use connection::ConnectionHandler;
use dispatch::HandlerKind;

/// Accepts a WebSocket connection and runs its protocol loop.
///
/// The connecting client's public key rides the upgrade request as the
/// `x-transit-client-key` header, the transport layer's authenticated
/// client identity. An upgrade without a parseable key is rejected outright.
pub async fn handle_websocket(stream: TcpStream, addr: SocketAddr, ctx: AppContext) {
    metrics::CONNECTIONS_TOTAL.inc();

    let mut peer_key: Option<String> = None;
    let callback = |req: &Request, response: Response| {
        let presented = req
            .headers()
            .get(CLIENT_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match presented {
            Some(key) if verifying_key_from_b64(&key).is_ok() => {
                peer_key = Some(key);
                Ok(response)
            }
            _ => {
                let mut resp = ErrorResponse::new(Some("missing or invalid client key".into()));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                Err(resp)
            }
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(addr = %addr, error = %e, "WebSocket upgrade rejected");
            return;
        }
    };
    let Some(peer_key) = peer_key else {
        return;
    };

    let span = tracing::info_span!("connection", addr = %addr, conn = %Uuid::new_v4());
    connection_loop(ws_stream, addr, peer_key, ctx)
        .instrument(span)
        .await;
}

async fn connection_loop(
    ws_stream: connection::WebSocketStreamType,
    addr: SocketAddr,
    peer_key: String,
    ctx: AppContext,
) {
    tracing::info!("new connection");

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let mut handler = ConnectionHandler::new(ws_sender, peer_key, addr);
    let mut state = dispatch::INITIAL_STATE;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if text.len() > MAX_WEBSOCKET_MESSAGE_SIZE {
                    tracing::warn!(bytes = text.len(), "oversized frame, closing");
                    break;
                }

                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(error = %e, "unparseable frame, closing");
                        break;
                    }
                };

                let Some(route) = ctx.dispatch.lookup(state, client_msg.verb()) else {
                    tracing::warn!(
                        verb = client_msg.verb(),
                        state = ?state,
                        "no route for message, closing"
                    );
                    break;
                };

                match (route.handler, client_msg) {
                    (HandlerKind::Signup, ClientMessage::Signup(bundle)) => {
                        signup::handle_signup(&mut handler, &ctx, bundle).await;
                    }
                    (HandlerKind::ListPeeps, ClientMessage::ListPeeps) => {
                        phonebook::handle_list_peeps(&mut handler, &ctx).await;
                    }
                    (kind, msg) => {
                        tracing::error!(handler = ?kind, verb = msg.verb(), "route/message mismatch");
                        break;
                    }
                }

                state = route.next;
                if route.terminal {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                tracing::debug!("connection closed by peer");
                break;
            }
            Ok(WsMessage::Ping(data)) => {
                handler.send_pong(data.to_vec()).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    tracing::info!("connection closed");
}
