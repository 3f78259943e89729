// ===============================
// src/api.rs
// ===============================
//
// Stateless transaction endpoint: POST /api/transaction with an explicit
// userId instead of connection affinity. Semantics and broadcast side
// effects are identical to the ws TRANSACTION path; the hub does the work,
// this module only translates HTTP <-> commands.
//

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::domain::{ConnId, TradeOrder};
use crate::hub::Command;
use crate::wallet::TradeError;

#[derive(Debug, Deserialize)]
struct HttpTradeRequest {
    #[serde(rename = "userId")]
    user_id: ConnId,
    #[serde(flatten)]
    order: TradeOrder,
}

/// Bind and return the local address plus the serve future, so callers
/// (and tests, with port 0) know where the server actually listens.
pub fn serve(
    addr: SocketAddr,
    cmd_tx: mpsc::Sender<Command>,
) -> hyper::Result<(SocketAddr, impl Future<Output = hyper::Result<()>>)> {
    let make = make_service_fn(move |_| {
        let tx = cmd_tx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, tx.clone())))
        }
    });
    let server = Server::try_bind(&addr)?.serve(make);
    let local = server.local_addr();
    Ok((local, server))
}

async fn handle(
    req: Request<Body>,
    cmd_tx: mpsc::Sender<Command>,
) -> Result<Response<Body>, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({ "status": "ok" })),
        (&Method::POST, "/api/transaction") => transaction(req, cmd_tx).await,
        _ => json_response(StatusCode::NOT_FOUND, &json!({ "error": "not found" })),
    };
    Ok(resp)
}

async fn transaction(req: Request<Body>, cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            warn!(?e, "transaction body read failed");
            return json_response(StatusCode::BAD_REQUEST, &json!({ "error": "unreadable body" }));
        }
    };
    let parsed: HttpTradeRequest = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": format!("invalid transaction: {e}") }),
            )
        }
    };

    let (resp_tx, resp_rx) = oneshot::channel();
    let cmd = Command::HttpTrade { user_id: parsed.user_id, order: parsed.order, resp: resp_tx };
    if cmd_tx.send(cmd).await.is_err() {
        return json_response(StatusCode::SERVICE_UNAVAILABLE, &json!({ "error": "hub unavailable" }));
    }

    match resp_rx.await {
        Ok(Ok(outcome)) => json_response(StatusCode::OK, &outcome),
        Ok(Err(TradeError::UnknownUser)) => {
            json_response(StatusCode::NOT_FOUND, &json!({ "error": TradeError::UnknownUser.to_string() }))
        }
        Ok(Err(e)) => json_response(StatusCode::BAD_REQUEST, &json!({ "error": e.to_string() })),
        Err(_) => json_response(StatusCode::SERVICE_UNAVAILABLE, &json!({ "error": "hub unavailable" })),
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    // serialization of our own types cannot fail; fall back to empty object
    let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap_or_default()
}
