// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use relay_bus::SubscriptionHandle;
use relay_sdk::RelaySdk;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{Notification, Request, Response, PARSE_ERROR};

/// Runs the JSON-RPC server on `stdin`/`stdout`, one request per line in,
/// one response or notification per line out. Blocks until stdin closes.
///
/// Every `session/start` call subscribes a forwarding task to that
/// session's event-bus stream for the lifetime of the session; each event
/// becomes an `event` notification carrying `{session_id, event}`.
/// `session/delete` unsubscribes the forwarder for that session.
pub async fn serve_stdio(sdk: Arc<RelaySdk>) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let forwarders: Arc<Mutex<HashMap<String, SubscriptionHandle>>> = Arc::new(Mutex::new(HashMap::new()));

    let writer_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                match req.method.as_str() {
                    "session/start" => forward_events(&sdk, &req, &out_tx, &forwarders),
                    "session/delete" => stop_forwarding(&req, &forwarders, &sdk),
                    _ => {}
                }
                crate::dispatch::dispatch(&sdk, req).await
            }
            Err(e) => {
                warn!(error = %e, "failed to parse JSON-RPC request");
                Response::err(Value::Null, PARSE_ERROR, format!("parse error: {e}"))
            }
        };
        if let Ok(text) = serde_json::to_string(&response) {
            let _ = out_tx.send(text);
        }
    }

    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

/// Best-effort: reads `session_id` straight out of the raw params so the
/// forwarder can start before the request is actually dispatched. A
/// malformed `session/start` request fails in `dispatch` as normal; the
/// forwarder just never receives anything for a session that never
/// started.
fn forward_events(
    sdk: &Arc<RelaySdk>,
    req: &Request,
    out_tx: &mpsc::UnboundedSender<String>,
    forwarders: &Arc<Mutex<HashMap<String, SubscriptionHandle>>>,
) {
    let Some(session_id) = req.params.get("session_id").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let (handle, mut rx) = sdk.events_subscribe(session_id.clone());
    forwarders.lock().unwrap().insert(session_id.clone(), handle);

    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        while let Some((session_id, event)) = rx.recv().await {
            let notification = Notification::new("event", serde_json::json!({ "session_id": session_id, "event": event }));
            match serde_json::to_string(&notification) {
                Ok(text) => {
                    if out_tx.send(text).is_err() {
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "failed to serialize event notification"),
            }
        }
    });
}

fn stop_forwarding(req: &Request, forwarders: &Arc<Mutex<HashMap<String, SubscriptionHandle>>>, sdk: &Arc<RelaySdk>) {
    let Some(session_id) = req.params.get("session_id").and_then(Value::as_str) else {
        return;
    };
    if let Some(handle) = forwarders.lock().unwrap().remove(session_id) {
        sdk.events_unsubscribe(handle);
    }
}
