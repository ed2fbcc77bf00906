//! Admin HTTP server for health checks and metrics

use crate::audit;
use crate::loader::Readiness;
use crate::metrics;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Start the admin HTTP server serving /healthz, /readyz, and /metrics.
pub async fn serve_admin(
    addr: SocketAddr,
    readiness: Arc<Readiness>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let readiness = readiness.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let readiness = readiness.clone();
                async move { Ok::<_, hyper::Error>(handle(req, &readiness)) }
            }))
        }
    });

    tracing::info!("Admin HTTP server listening on {}", addr);
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = status;
    res
}

pub fn handle(req: Request<Body>, readiness: &Readiness) -> Response<Body> {
    let path = req.uri().path();
    let response = match path {
        "/healthz" => text(StatusCode::OK, "ok\n"),

        "/readyz" if readiness.is_ready() => text(StatusCode::OK, "ready\n"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "loading\n"),

        "/metrics" => {
            let mut res = Response::new(Body::from(metrics::encode_metrics()));
            res.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            res
        }

        _ => text(StatusCode::NOT_FOUND, "not found\n"),
    };

    if matches!(path, "/metrics" | "/readyz" | "/healthz") {
        audit::admin_http_request(path, response.status().as_u16());
    }
    response
}
