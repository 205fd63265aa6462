//! Transport layer abstraction for the push stream
//!
//! Provides a pluggable transport layer:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              EventHub                    │
//! │  ┌───────────────────────────────────┐  │
//! │  │  per-subscriber mpsc queues       │  │
//! │  └───────────────────────────────────┘  │
//! └────────────────┬────────────────────────┘
//!                  │
//!         ┌────────┴────────┐
//!         │ Transport Trait │
//!         └────────┬────────┘
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!     TcpTransport    MemoryTransport
//!     (TCP)           (in-process)
//! ```
//!
//! A transport moves raw frames (type byte + body); the frame ↔ struct
//! mapping lives in `shared::wire`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};

use shared::error::{AppError, AppResult};
use shared::wire::FrameType;

pub mod tcp_server;

pub use tcp_server::TcpServer;

/// One raw frame on the wire
pub type RawFrame = (FrameType, Vec<u8>);

// ========== Transport Trait ==========

#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_frame(&self) -> AppResult<RawFrame>;
    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> AppResult<()>;
    async fn close(&self) -> AppResult<()>;
}

// Helper functions
pub(crate) async fn read_from_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> AppResult<RawFrame> {
    // Read frame type (1 byte)
    let mut type_buf = [0u8; 1];
    reader
        .read_exact(&mut type_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read type failed: {}", e)))?;

    let frame_type =
        FrameType::try_from(type_buf[0]).map_err(|_| AppError::invalid("Invalid frame type"))?;

    // Read body length (4 bytes)
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read len failed: {}", e)))?;

    let len = u32::from_le_bytes(len_buf) as usize;

    // Read body
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| AppError::internal(format!("Read body failed: {}", e)))?;

    Ok((frame_type, body))
}

pub(crate) async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame_type: FrameType,
    body: &[u8],
) -> AppResult<()> {
    let mut data = Vec::with_capacity(5 + body.len());
    data.push(frame_type as u8);
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(body);

    writer
        .write_all(&data)
        .await
        .map_err(|e| AppError::internal(format!("Write failed: {}", e)))?;
    Ok(())
}

// ========== TCP Transport ==========

/// TCP transport implementation
#[derive(Debug, Clone)]
pub struct TcpTransport {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_frame(&self) -> AppResult<RawFrame> {
        let mut reader = self.reader.lock().await;
        read_from_stream(&mut *reader).await
    }

    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        write_to_stream(&mut *writer, frame_type, body).await
    }

    async fn close(&self) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Shutdown failed: {}", e)))?;
        Ok(())
    }
}

// ========== Memory Transport (In-Process) ==========

/// In-process memory transport for same-process sessions and tests
///
/// [`duplex`] builds a linked pair; frames written on one end are read on
/// the other.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<RawFrame>,
    rx: Mutex<mpsc::UnboundedReceiver<RawFrame>>,
}

/// Create a linked transport pair (local end, remote end)
pub fn duplex() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: a_tx,
            rx: Mutex::new(b_rx),
        },
        MemoryTransport {
            tx: b_tx,
            rx: Mutex::new(a_rx),
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_frame(&self) -> AppResult<RawFrame> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| AppError::with_message(shared::error::ErrorCode::NetworkError, "Peer closed"))
    }

    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> AppResult<()> {
        self.tx
            .send((frame_type, body.to_vec()))
            .map_err(|_| AppError::with_message(shared::error::ErrorCode::NetworkError, "Peer closed"))
    }

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_duplex() {
        let (local, remote) = duplex();

        local
            .write_frame(FrameType::Ping, b"{}")
            .await
            .unwrap();
        let (frame_type, body) = remote.read_frame().await.unwrap();
        assert_eq!(frame_type, FrameType::Ping);
        assert_eq!(body, b"{}");

        remote.write_frame(FrameType::Pong, b"{}").await.unwrap();
        let (frame_type, _) = local.read_frame().await.unwrap();
        assert_eq!(frame_type, FrameType::Pong);
    }

    #[tokio::test]
    async fn test_memory_closed_peer() {
        let (local, remote) = duplex();
        drop(remote);
        assert!(local.write_frame(FrameType::Ping, b"{}").await.is_err());
    }
}
