//! Per-connection session: handshake, writer task, read loop
//!
//! One session per accepted transport. The handshake must be a `Subscribe`
//! frame; an invalid token means an immediate `Close` and stream end (the
//! client must not retry on its own). After `SubscribeOk`, the writer task
//! is the connection's single writer, draining the subscriber queue the hub
//! fans out into.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use shared::error::ErrorCode;
use shared::wire::{ClientFrame, ClosePayload, PROTOCOL_VERSION, ServerFrame};

use crate::hub::EventHub;
use crate::server::auth::TokenValidator;
use crate::transport::Transport;

/// Drive one client connection to completion
pub async fn serve_connection(
    hub: EventHub,
    validator: Arc<dyn TokenValidator>,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) {
    // ---- Handshake ----
    let req = match read_subscribe(transport.as_ref()).await {
        Ok(req) => req,
        Err(close) => {
            if let Some(close) = close {
                let _ = write_frame(transport.as_ref(), &ServerFrame::Close(close)).await;
            }
            return;
        }
    };

    if req.protocol_version != PROTOCOL_VERSION {
        let _ = write_frame(
            transport.as_ref(),
            &ServerFrame::Close(ClosePayload {
                code: ErrorCode::ProtocolMismatch,
                reason: format!(
                    "Protocol {} not supported, server speaks {}",
                    req.protocol_version, PROTOCOL_VERSION
                ),
            }),
        )
        .await;
        return;
    }

    if !validator.validate(&req.token) {
        tracing::warn!(client_id = %req.client_id, "Subscribe rejected: invalid token");
        let _ = write_frame(
            transport.as_ref(),
            &ServerFrame::Close(ClosePayload {
                code: ErrorCode::TokenInvalid,
                reason: "Invalid token".into(),
            }),
        )
        .await;
        return;
    }

    let (ok, mut rx, session) = match hub.subscribe(&req) {
        Ok(parts) => parts,
        Err(e) => {
            let _ = write_frame(
                transport.as_ref(),
                &ServerFrame::Close(ClosePayload {
                    code: e.code,
                    reason: e.message.clone(),
                }),
            )
            .await;
            return;
        }
    };

    if write_frame(transport.as_ref(), &ServerFrame::SubscribeOk(ok))
        .await
        .is_err()
    {
        hub.unsubscribe_session(&req.client_id, session);
        return;
    }

    let client_id = req.client_id.clone();

    // ---- Writer task (single writer for this connection) ----
    let writer_transport = transport.clone();
    let writer_hub = hub.clone();
    let writer_client = client_id.clone();
    let writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,

                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = write_frame(writer_transport.as_ref(), &frame).await {
                                tracing::info!(client_id = %writer_client, error = %e, "Client write failed");
                                writer_hub.unsubscribe_session(&writer_client, session);
                                break;
                            }
                        }
                        // Queue closed: the hub dropped this subscription
                        None => break,
                    }
                }
            }
        }
    });

    // ---- Read loop ----
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            read = transport.read_frame() => {
                let frame = match read {
                    Ok((frame_type, body)) => ClientFrame::from_parts(frame_type, &body),
                    Err(e) => {
                        tracing::info!(client_id = %client_id, error = %e, "Client read ended");
                        break;
                    }
                };
                match frame {
                    Ok(ClientFrame::Pong(pong)) => hub.handle_pong(&client_id, &pong),
                    Ok(ClientFrame::Ack(ack)) => hub.handle_ack(&ack),
                    Ok(ClientFrame::Subscribe(_)) => {
                        tracing::warn!(client_id = %client_id, "Duplicate subscribe ignored");
                    }
                    Err(e) => {
                        tracing::warn!(client_id = %client_id, error = %e, "Malformed client frame");
                    }
                }
            }
        }
    }

    hub.unsubscribe_session(&client_id, session);
}

async fn read_subscribe(
    transport: &dyn Transport,
) -> Result<shared::wire::SubscribeRequest, Option<ClosePayload>> {
    let (frame_type, body) = transport.read_frame().await.map_err(|_| None)?;
    match ClientFrame::from_parts(frame_type, &body) {
        Ok(ClientFrame::Subscribe(req)) => Ok(req),
        Ok(_) | Err(_) => Err(Some(ClosePayload {
            code: ErrorCode::InvalidRequest,
            reason: "Expected subscribe handshake".into(),
        })),
    }
}

async fn write_frame(
    transport: &dyn Transport,
    frame: &ServerFrame,
) -> shared::error::AppResult<()> {
    let body = frame.to_body()?;
    transport.write_frame(frame.frame_type(), &body).await
}
