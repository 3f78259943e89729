// ===============================
// src/server.rs
// ===============================
//
// WebSocket transport: accept loop plus one task per connection. The
// connection task owns nothing but its socket; identity issuance happens
// here (id generation + name hint from the URL query), everything stateful
// goes through the hub's command channel. The Disconnect command is always
// the connection's last command, so no trade from this client is applied
// after it.
//

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::{ClientRequest, ConnId, ServerEvent};
use crate::hub::{Command, OUTBOUND_QUEUE};

pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

pub async fn run(listener: TcpListener, cmd_tx: mpsc::Sender<Command>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let tx = cmd_tx.clone();
                tokio::spawn(async move {
                    handle_conn(stream, tx, peer).await;
                });
            }
            Err(e) => error!(?e, "ws accept error"),
        }
    }
}

/// `userName` query parameter from the handshake URL, if any.
fn name_hint_from_path(path_and_query: &str) -> Option<String> {
    // tungstenite hands us a relative URI; anchor it to parse the query
    let anchored = format!("ws://localhost{path_and_query}");
    let parsed = Url::parse(&anchored).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "userName")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn new_conn_id() -> ConnId {
    format!(
        "U-{}-{}",
        Utc::now().timestamp_millis(),
        rand::thread_rng().gen::<u32>()
    )
}

async fn handle_conn(stream: TcpStream, cmd_tx: mpsc::Sender<Command>, peer: SocketAddr) {
    let mut name_hint: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        name_hint = req
            .uri()
            .path_and_query()
            .and_then(|pq| name_hint_from_path(pq.as_str()));
        Ok(resp)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(?e, %peer, "ws handshake failed");
            return;
        }
    };

    let conn_id = new_conn_id();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);
    if cmd_tx
        .send(Command::Connect { conn: conn_id.clone(), name_hint, outbound: out_tx })
        .await
        .is_err()
    {
        return;
    }
    info!(conn = %conn_id, %peer, "ws connected");

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            maybe_ev = out_rx.recv() => {
                let Some(ev) = maybe_ev else { break };
                match serde_json::to_string(&ev) {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(?e, "event serialize failed"),
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(m)) if m.is_text() => {
                        let txt = m.into_text().unwrap_or_default();
                        match serde_json::from_str::<ClientRequest>(&txt) {
                            Ok(req) => {
                                if dispatch(&cmd_tx, &conn_id, req).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(conn = %conn_id, %e, "bad request frame"),
                        }
                    }
                    Some(Ok(m)) if m.is_close() => break,
                    Some(Ok(_)) => {} // ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!(conn = %conn_id, ?e, "ws read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // disconnect is the only cancellation signal: room + wallet cleanup
    let _ = cmd_tx.send(Command::Disconnect { conn: conn_id.clone() }).await;
    info!(conn = %conn_id, "ws disconnected");
}

async fn dispatch(
    cmd_tx: &mpsc::Sender<Command>,
    conn_id: &str,
    req: ClientRequest,
) -> Result<(), mpsc::error::SendError<Command>> {
    let cmd = match req {
        ClientRequest::JoinStockRoom { stock_name } => {
            Command::Join { conn: conn_id.to_string(), symbol: stock_name }
        }
        ClientRequest::LeaveStockRoom => Command::Leave { conn: conn_id.to_string() },
        ClientRequest::Transaction(order) => {
            Command::Trade { conn: conn_id.to_string(), order }
        }
    };
    cmd_tx.send(cmd).await
}
