//! Per-connection plumbing: a reader task feeding a processor task feeding
//! a bounded writer queue. Requests are verified, routed through the
//! middleware chains, and answered with broker-signed frames. Handlers may
//! block on storage; the reader never does.

use std::{sync::Arc, time::Duration};

use actix_web::{web::Payload, HttpRequest, HttpResponse};
use actix_ws::{Message, Session};
use alloy_primitives::Address;
use serde_json::Value;
use tokio::sync::mpsc;

use clearhouse_common::{
    crypto::{recover_payload_signer, sign_payload},
    rpc::{RequestContext, RpcHandler, RpcPayload, RpcRequest, RpcResponse},
    task::spawn_task,
    time::get_current_time_in_millis,
};

use crate::{
    config::{OUTBOUND_QUEUE_SIZE, WS_WRITE_TIMEOUT_SECS},
    core::broker::Broker,
};

/// Outcome of processing one inbound frame.
pub struct ProcessOutcome {
    /// The signed response frame to write back.
    pub frame: String,
    /// Set when the request authenticated (or re-authenticated) the
    /// connection's user.
    pub authenticated: Option<Address>,
}

/// Upgrade an HTTP request into the three per-connection tasks.
pub async fn serve_connection(
    broker: Arc<Broker>,
    handler: Arc<RpcHandler>,
    request: &HttpRequest,
    body: Payload,
) -> actix_web::Result<HttpResponse> {
    let (response, session, mut stream) = actix_ws::handle(request, body)?;
    let connection_id = broker.hub().next_connection_id();
    debug!("WebSocket connection {} established", connection_id);

    let (out_tx, out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_SIZE);
    let (in_tx, mut in_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_SIZE);
    broker.hub().register(connection_id, out_tx.clone()).await;

    // Writer: drains the bounded outbound queue under a write deadline.
    let writer_session = session.clone();
    spawn_task("ws-writer", async move {
        writer_loop(writer_session, out_rx).await;
    });

    // Processor: strictly in receive order for this connection.
    let processor_broker = broker.clone();
    let processor_out = out_tx.clone();
    spawn_task("ws-processor", async move {
        while let Some(raw) = in_rx.recv().await {
            let previous_user = processor_broker.hub().user_of(connection_id).await;
            let outcome =
                process_message(&processor_broker, &handler, previous_user, &raw).await;
            if let Some(user) = outcome.authenticated {
                if previous_user != Some(user) {
                    processor_broker
                        .hub()
                        .associate_user(connection_id, user)
                        .await;
                    debug!("Connection {} authenticated as {}", connection_id, user);
                }
            }
            if processor_out.send(outcome.frame).await.is_err() {
                break;
            }
        }
    });

    // Reader: decouples the socket from request processing. Spawned via
    // actix's local-task spawn (not spawn_task) because `MessageStream` is
    // not `Send`.
    debug!("Spawning task 'ws-reader'");
    actix_web::rt::spawn(async move {
        let mut ping_session = session;
        while let Some(Ok(message)) = stream.recv().await {
            match message {
                Message::Text(text) => {
                    if in_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("Connection {}: non-UTF8 frame dropped", connection_id),
                },
                Message::Ping(payload) => {
                    if ping_session.pong(&payload).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        broker.hub().unregister(connection_id).await;
        debug!("WebSocket connection {} closed", connection_id);
        debug!("Task 'ws-reader' has exited");
    });

    Ok(response)
}

async fn writer_loop(mut session: Session, mut out_rx: mpsc::Receiver<String>) {
    let deadline = Duration::from_secs(WS_WRITE_TIMEOUT_SECS);
    while let Some(frame) = out_rx.recv().await {
        match tokio::time::timeout(deadline, session.text(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                warn!("WebSocket write deadline exceeded, closing connection");
                break;
            }
        }
    }
    let _ = session.close(None).await;
}

/// Verify, route and answer one frame. Always yields a signed response,
/// even for malformed input.
pub async fn process_message(
    broker: &Arc<Broker>,
    handler: &Arc<RpcHandler>,
    previous_user: Option<Address>,
    raw: &str,
) -> ProcessOutcome {
    let now = get_current_time_in_millis();

    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable frame: {}", e);
            return signed_outcome(broker, RpcResponse::error(0, "invalid request", now), None);
        }
    };
    let request_id = request.req.request_id;

    // Signatures cover the compact encoding of the payload array.
    let sign_bytes = match request.req.to_sign_bytes() {
        Ok(bytes) => bytes,
        Err(_) => {
            return signed_outcome(
                broker,
                RpcResponse::error(request_id, "invalid request", now),
                None,
            )
        }
    };
    let mut signers = Vec::with_capacity(request.sig.len());
    for signature in &request.sig {
        match recover_payload_signer(&sign_bytes, signature) {
            Ok(address) => signers.push(address),
            Err(_) => {
                return signed_outcome(
                    broker,
                    RpcResponse::error(request_id, "invalid signature", now),
                    None,
                );
            }
        }
    }

    let mut ctx = RequestContext::new(request.req.clone(), raw.as_bytes().to_vec(), signers);
    ctx.user_id = previous_user;
    ctx.data.store(broker.clone());

    let result = handler.handle(&mut ctx).await;
    let authenticated = ctx.user_id;

    let (payload, response_value) = match result {
        Ok(value) => {
            let method = if ctx.request.method == "ping" {
                "pong"
            } else {
                ctx.request.method.as_str()
            };
            (
                RpcPayload::new(request_id, method, value.clone(), now),
                value,
            )
        }
        Err(e) => {
            if !e.is_client_safe() {
                error!("Handler {} failed: {:#}", ctx.request.method, e);
            }
            let message = e.client_message();
            (
                RpcResponse::error(request_id, &message, now),
                serde_json::json!({ "error": message }),
            )
        }
    };

    // Journal authenticated requests with their response.
    if let Some(user) = authenticated {
        let record_payload = request.req.clone();
        let record_sigs = request.sig.clone();
        let record_response = response_value;
        let journal = broker
            .store()
            .transaction(move |tx| {
                tx.insert_rpc_record(user, &record_payload, &record_sigs, &record_response)
            })
            .await;
        if let Err(e) = journal {
            error!("Failed to journal request: {}", e);
        }
    }

    signed_outcome(broker, payload, authenticated)
}

fn signed_outcome(
    broker: &Arc<Broker>,
    payload: RpcPayload,
    authenticated: Option<Address>,
) -> ProcessOutcome {
    let frame = sign_response(broker, payload);
    ProcessOutcome {
        frame,
        authenticated,
    }
}

/// Sign an outbound payload with the broker key. Signing failures are
/// programming errors; the response falls back to an unsigned frame.
fn sign_response(broker: &Arc<Broker>, payload: RpcPayload) -> String {
    let sig = payload
        .to_sign_bytes()
        .ok()
        .and_then(|bytes| sign_payload(broker.signer(), &bytes).ok());
    let response = RpcResponse {
        res: payload,
        sig: sig.into_iter().collect(),
    };
    serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"res":[0,"error",{"error":"internal server error"},0],"sig":[]}"#.to_string()
    })
}
