//! Live channel over a real socket: clients connected to `/ws` receive the
//! transaction event and the alert raised by an ingest.

use chrono::{Duration, Utc};
use futures::StreamExt;
use hyper::{Body, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use txpulse_monitor::app::AppState;
use txpulse_monitor::config::MonitorConfig;
use txpulse_monitor::loader::Readiness;
use txpulse_monitor::server::{self, api::handle_api};
use txpulse_monitor::storage::memory::{InMemoryAlertStore, InMemoryMetricStore};

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(StdDuration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a live frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_ws_clients_receive_ingest_events() {
    let state = Arc::new(AppState::new(
        &MonitorConfig::default(),
        Arc::new(InMemoryMetricStore::new()),
        Arc::new(InMemoryAlertStore::new()),
        Arc::new(Readiness::ready()),
    ));
    let addr = free_addr();
    let cancel = CancellationToken::new();
    let server_task = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(server::serve_api(addr, state, async move {
            cancel.cancelled().await
        }))
    };

    let url = format!("ws://{}/ws", addr);
    let mut client = None;
    for _ in 0..50 {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                client = Some(socket);
                break;
            }
            Err(_) => tokio::time::sleep(StdDuration::from_millis(20)).await,
        }
    }
    let mut client = client.expect("server never accepted the WebSocket");

    for _ in 0..100 {
        if state.broadcaster.subscriber_count() == 1 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(state.broadcaster.subscriber_count(), 1);

    for (status, count) in [("approved", 40), ("denied", 10)] {
        let body = json!({
            "timestamp": (Utc::now() - Duration::minutes(1)).to_rfc3339(),
            "status": status,
            "count": count,
        });
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/transaction")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = handle_api(req, &state).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let first = next_json(&mut client).await;
    assert_eq!(first["type"], "transaction");
    assert_eq!(first["data"]["status"], "approved");

    // Denial rate 20% trips the critical threshold before the transaction is echoed.
    let alert = next_json(&mut client).await;
    assert_eq!(alert["type"], "alert");
    assert_eq!(alert["data"]["dimension"], "denial_rate");
    let echoed = next_json(&mut client).await;
    assert_eq!(echoed["type"], "transaction");
    assert_eq!(echoed["data"]["count"], 10);

    client.close(None).await.unwrap();
    for _ in 0..100 {
        if state.broadcaster.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(state.broadcaster.subscriber_count(), 0);

    cancel.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_plain_get_on_ws_path_is_rejected() {
    let state = Arc::new(AppState::new(
        &MonitorConfig::default(),
        Arc::new(InMemoryMetricStore::new()),
        Arc::new(InMemoryAlertStore::new()),
        Arc::new(Readiness::ready()),
    ));
    let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let res = server::route(req, state, "127.0.0.1:9".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
