//! Live-update channel over WebSocket.
//!
//! `GET /ws` is upgraded in place on the API listener. Each connection gets
//! its own broadcaster subscription and forwards queued frames as text
//! messages until either side goes away.

use crate::app::AppState;
use crate::audit;
use crate::broadcast::Subscription;
use futures::{SinkExt, StreamExt};
use hyper::header::{HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::upgrade::Upgraded;
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const LIVE_PATH: &str = "/ws";

fn header_contains(req: &Request<Body>, name: hyper::header::HeaderName, token: &str) -> bool {
    req.headers()
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(token))
}

/// True for a WebSocket handshake request.
pub fn is_upgrade_request(req: &Request<Body>) -> bool {
    header_contains(req, CONNECTION, "upgrade") && header_contains(req, UPGRADE, "websocket")
}

fn bad_request(message: &'static str) -> Response<Body> {
    let mut res = Response::new(Body::from(message));
    *res.status_mut() = StatusCode::BAD_REQUEST;
    res
}

/// Answer the handshake and spawn the connection task.
pub fn handle_upgrade(mut req: Request<Body>, state: Arc<AppState>, peer: SocketAddr) -> Response<Body> {
    if !is_upgrade_request(&req) {
        return bad_request("expected a WebSocket upgrade\n");
    }
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return bad_request("missing Sec-WebSocket-Key\n");
    };
    let accept = derive_accept_key(key.as_bytes());
    let Ok(accept) = HeaderValue::from_str(&accept) else {
        return bad_request("invalid Sec-WebSocket-Key\n");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                let subscription = state.broadcaster.subscribe();
                serve_connection(socket, subscription, &state, peer).await;
            }
            Err(e) => tracing::warn!(peer = %peer, "WebSocket upgrade failed: {}", e),
        }
    });

    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = res.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    res
}

async fn serve_connection(
    socket: WebSocketStream<Upgraded>,
    subscription: Subscription,
    state: &AppState,
    peer: SocketAddr,
) {
    let Subscription { id, mut receiver } = subscription;
    audit::live_connected(id, &peer.to_string());
    tracing::info!(subscriber = id, total = state.broadcaster.subscriber_count(), "Client connected");

    let (mut sink, mut stream) = socket.split();
    let reason = loop {
        tokio::select! {
            frame = receiver.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                        tracing::debug!(subscriber = id, "Send failed: {}", e);
                        break "send_failed";
                    }
                }
                // Sender side removed by the broadcaster.
                None => break "pruned",
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break "closed",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(subscriber = id, "Receive failed: {}", e);
                    break "receive_failed";
                }
            },
        }
    };

    state.broadcaster.unsubscribe(id);
    let _ = sink.close().await;
    audit::live_disconnected(id, reason);
    tracing::info!(subscriber = id, total = state.broadcaster.subscriber_count(), "Client disconnected");
}
