//! Wire protocol between the hub and station clients
//!
//! # Framing
//!
//! ```text
//! ┌──────────┬───────────────┬──────────────────┐
//! │ type (1) │ length (4 LE) │ JSON body (len)  │
//! └──────────┴───────────────┴──────────────────┘
//! ```
//!
//! One byte of [`FrameType`], a little-endian u32 body length, then the JSON
//! body of the matching payload struct. Transports own the byte shuffling;
//! this module owns the frame ↔ struct mapping.
//!
//! # Message flow
//!
//! ```text
//! Client ──▶ Subscribe ─▶ (token check) ─▶ SubscribeOk ─▶ replay ─▶ live
//!        ◀── Ping {sent_at, health, pending_acks}
//!        ──▶ Pong {echo_sent_at, acks}
//!        ──▶ Ack  {event_id, status}
//!        ◀── Close {code, reason}            (fatal, no retry hint)
//! ```

use crate::ack::AckRequest;
use crate::error::{AppError, ErrorCode};
use crate::event::Event;
use crate::health::ConnectionHealth;
use crate::station::{Role, Station};
use serde::{Deserialize, Serialize};

/// Protocol version, checked at handshake
pub const PROTOCOL_VERSION: u16 = 1;

/// Frame discriminant, the first byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 0,
    SubscribeOk = 1,
    Event = 2,
    Ping = 3,
    Pong = 4,
    Ack = 5,
    Close = 6,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Subscribe),
            1 => Ok(FrameType::SubscribeOk),
            2 => Ok(FrameType::Event),
            3 => Ok(FrameType::Ping),
            4 => Ok(FrameType::Pong),
            5 => Ok(FrameType::Ack),
            6 => Ok(FrameType::Close),
            _ => Err(()),
        }
    }
}

/// Handshake: the first (and only unprompted) frame a client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub client_id: String,
    pub role: Role,
    pub station: Station,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque external credential; validation is the server's business
    pub token: String,
    /// Replay cursor: last event id this client has seen, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<u64>,
    pub protocol_version: u16,
}

/// Handshake answer on success
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOkPayload {
    /// The cursor fell outside the retention window: the client must do a
    /// full refetch instead of assuming it is caught up.
    pub resync_required: bool,
    /// Highest event id assigned so far on this hub
    pub last_event_id: u64,
}

/// Server heartbeat
///
/// Carries the latency probe (`sent_at`), the health the server measured for
/// this connection on the previous round trip, and the ids of
/// acknowledgment-required events this client still owes an ack for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Unix milliseconds, server clock; echoed back verbatim in the pong
    pub sent_at: i64,
    pub health: ConnectionHealth,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_acks: Vec<u64>,
}

/// Client heartbeat answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    /// `sent_at` of the ping being answered, verbatim
    pub echo_sent_at: i64,
    /// Acknowledgments the client accumulated since the last heartbeat
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acks: Vec<AckRequest>,
}

/// Fatal close, sent before the server drops the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePayload {
    pub code: ErrorCode,
    pub reason: String,
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Subscribe(SubscribeRequest),
    Pong(PongPayload),
    Ack(AckRequest),
}

/// Frames the server may send
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    SubscribeOk(SubscribeOkPayload),
    Event(Event),
    Ping(PingPayload),
    Close(ClosePayload),
}

impl ClientFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientFrame::Subscribe(_) => FrameType::Subscribe,
            ClientFrame::Pong(_) => FrameType::Pong,
            ClientFrame::Ack(_) => FrameType::Ack,
        }
    }

    /// Serialize the JSON body (framing is the transport's job)
    pub fn to_body(&self) -> Result<Vec<u8>, AppError> {
        let body = match self {
            ClientFrame::Subscribe(p) => serde_json::to_vec(p)?,
            ClientFrame::Pong(p) => serde_json::to_vec(p)?,
            ClientFrame::Ack(p) => serde_json::to_vec(p)?,
        };
        Ok(body)
    }

    /// Rebuild a frame from its discriminant and JSON body
    pub fn from_parts(frame_type: FrameType, body: &[u8]) -> Result<Self, AppError> {
        match frame_type {
            FrameType::Subscribe => Ok(ClientFrame::Subscribe(serde_json::from_slice(body)?)),
            FrameType::Pong => Ok(ClientFrame::Pong(serde_json::from_slice(body)?)),
            FrameType::Ack => Ok(ClientFrame::Ack(serde_json::from_slice(body)?)),
            other => Err(AppError::invalid(format!(
                "Unexpected client frame type: {:?}",
                other
            ))),
        }
    }
}

impl ServerFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            ServerFrame::SubscribeOk(_) => FrameType::SubscribeOk,
            ServerFrame::Event(_) => FrameType::Event,
            ServerFrame::Ping(_) => FrameType::Ping,
            ServerFrame::Close(_) => FrameType::Close,
        }
    }

    /// Serialize the JSON body (framing is the transport's job)
    pub fn to_body(&self) -> Result<Vec<u8>, AppError> {
        let body = match self {
            ServerFrame::SubscribeOk(p) => serde_json::to_vec(p)?,
            ServerFrame::Event(p) => serde_json::to_vec(p)?,
            ServerFrame::Ping(p) => serde_json::to_vec(p)?,
            ServerFrame::Close(p) => serde_json::to_vec(p)?,
        };
        Ok(body)
    }

    /// Rebuild a frame from its discriminant and JSON body
    ///
    /// Event bodies go through [`crate::event::IncomingEvent`] so legacy
    /// shapes are upgraded right here at the boundary.
    pub fn from_parts(frame_type: FrameType, body: &[u8]) -> Result<Self, AppError> {
        match frame_type {
            FrameType::SubscribeOk => Ok(ServerFrame::SubscribeOk(serde_json::from_slice(body)?)),
            FrameType::Event => {
                let incoming: crate::event::IncomingEvent = serde_json::from_slice(body)?;
                Ok(ServerFrame::Event(incoming.normalize()))
            }
            FrameType::Ping => Ok(ServerFrame::Ping(serde_json::from_slice(body)?)),
            FrameType::Close => Ok(ServerFrame::Close(serde_json::from_slice(body)?)),
            other => Err(AppError::invalid(format!(
                "Unexpected server frame type: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type_roundtrip() {
        for raw in 0u8..=6 {
            let ft = FrameType::try_from(raw).unwrap();
            assert_eq!(ft as u8, raw);
        }
        assert!(FrameType::try_from(7).is_err());
    }

    #[test]
    fn test_client_frame_roundtrip() {
        let frame = ClientFrame::Subscribe(SubscribeRequest {
            client_id: "c1".into(),
            role: Role::Waiter,
            station: Station::Waiter,
            user_id: Some("mario".into()),
            token: "tok".into(),
            last_event_id: Some(41),
            protocol_version: PROTOCOL_VERSION,
        });
        let body = frame.to_body().unwrap();
        let back = ClientFrame::from_parts(frame.frame_type(), &body).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_server_event_frame_upgrades_legacy() {
        // A legacy event body arriving on an Event frame is normalized
        let body = br#"{"type":"order:created","payload":{"orderId":"o1"}}"#;
        let frame = ServerFrame::from_parts(FrameType::Event, body).unwrap();
        match frame {
            ServerFrame::Event(event) => {
                assert_eq!(event.kind, "order:created");
                assert_eq!(event.payload, json!({"orderId": "o1"}));
            }
            other => panic!("expected event frame, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_frame_type_rejected() {
        let body = br#"{"resyncRequired":false,"lastEventId":0}"#;
        assert!(ClientFrame::from_parts(FrameType::SubscribeOk, body).is_err());
    }
}
