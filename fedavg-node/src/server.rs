//! HTTP surface of a client node
//!
//! | Route          | Effect                                   |
//! |----------------|------------------------------------------|
//! | `GET /start`   | schedule round 0                         |
//! | `POST /recv`   | hand an aggregate payload to the worker  |
//! | `GET /status`  | JSON [`NodeStatus`] snapshot             |
//!
//! Accepted requests answer `{"response":"ok"}` before any training happens.
//! `/recv` bodies are read in full even past the payload limit, so every
//! received byte is accounted for before an oversized one gets a 413.

use std::future::Future;
use std::io;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::coordinator::NodeStatus;
use crate::endpoint::TransportEndpoint;
use crate::error::Rejection;

#[derive(Clone)]
struct Surface {
    endpoint: TransportEndpoint,
    max_payload_bytes: usize,
}

/// Build the router for `endpoint`, accepting bodies up to `max_payload_bytes`
pub fn router(endpoint: TransportEndpoint, max_payload_bytes: usize) -> Router {
    Router::new()
        .route("/start", get(start))
        .route(fedavg_net::route::UPLOAD_PATH, post(recv))
        .route("/status", get(status))
        .with_state(Surface {
            endpoint,
            max_payload_bytes,
        })
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "client endpoint listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn start(State(surface): State<Surface>) -> Response {
    acknowledge(surface.endpoint.on_start())
}

async fn recv(State(surface): State<Surface>, body: Body) -> Response {
    let Surface {
        endpoint,
        max_payload_bytes: limit,
    } = surface;
    let mut chunks = body.into_data_stream();
    let mut payload = Vec::new();
    let mut seen = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("aggregate body failed: {e}");
                let rejection = endpoint.on_discarded_aggregate(seen, Rejection::Truncated);
                return acknowledge(Err(rejection));
            }
        };
        seen = seen.saturating_add(chunk.len());
        // Past the limit the rest is drained and counted, not kept.
        if seen <= limit {
            payload.extend_from_slice(&chunk);
        } else if !payload.is_empty() {
            payload = Vec::new();
        }
    }
    if seen > limit {
        let rejection = Rejection::TooLarge { limit };
        return acknowledge(Err(endpoint.on_discarded_aggregate(seen, rejection)));
    }
    acknowledge(endpoint.on_receive_aggregate(payload))
}

async fn status(State(surface): State<Surface>) -> Json<NodeStatus> {
    Json(surface.endpoint.status())
}

fn acknowledge(outcome: Result<(), Rejection>) -> Response {
    match outcome {
        Ok(()) => Json(json!({ "response": "ok" })).into_response(),
        Err(rejection) => {
            let code = match rejection {
                Rejection::AlreadyStarted => StatusCode::CONFLICT,
                Rejection::Busy | Rejection::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                Rejection::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                Rejection::Truncated => StatusCode::BAD_REQUEST,
            };
            let body = json!({ "response": "rejected", "reason": rejection.to_string() });
            (code, Json(body)).into_response()
        }
    }
}
