//! HTTP surfaces: the public API with its live channel, and the admin server.

pub mod api;
pub mod auth;
pub mod http;
pub mod live;

use crate::app::AppState;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Route one API-port request: `/ws` upgrades, everything else is REST.
pub async fn route(
    req: Request<Body>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Result<Response<Body>, hyper::Error> {
    if req.uri().path() == live::LIVE_PATH {
        return Ok(live::handle_upgrade(req, state, peer));
    }
    api::handle_api(req, &state).await
}

/// Serve the REST API and live channel on `addr` until `shutdown` resolves.
pub async fn serve_api(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let peer = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                route(req, state.clone(), peer)
            }))
        }
    });

    tracing::info!("API server listening on {}", addr);
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}
